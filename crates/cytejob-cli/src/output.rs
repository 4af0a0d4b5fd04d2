use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use cytejob_core::normalize::{AnnotationRecord, AnnotationTable};
use serde::Serialize;
use serde_json::Value;

/// Read a finished request payload prepared by the caller.
pub fn load_payload(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload file: {}", path.display()))?;
    let payload: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in payload file: {}", path.display()))?;
    if !payload.is_object() {
        bail!("Payload file {} must contain a JSON object", path.display());
    }
    Ok(payload)
}

/// Read a `{server cluster id: original label}` JSON object.
pub fn load_labels(path: &Path) -> Result<HashMap<String, String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in labels file: {}", path.display()))?;
    let Value::Object(entries) = value else {
        bail!("Labels file {} must contain a JSON object", path.display());
    };

    entries
        .into_iter()
        .map(|(id, label)| match label {
            Value::String(s) => Ok((id, s)),
            Value::Number(n) => Ok((id, n.to_string())),
            other => bail!("Label for cluster '{id}' must be a string, got {other}"),
        })
        .collect()
}

#[derive(Serialize)]
struct CsvRow<'a> {
    cluster_id: &'a str,
    annotation: &'a str,
    ontology_term: &'a str,
    granular_annotation: &'a str,
    cell_state: &'a str,
    justification: &'a str,
    supporting_markers: String,
    conflicting_markers: String,
    missing_expression: &'a str,
    unexpected_expression: &'a str,
}

impl<'a> From<&'a AnnotationRecord> for CsvRow<'a> {
    fn from(record: &'a AnnotationRecord) -> Self {
        Self {
            cluster_id: &record.cluster_id,
            annotation: &record.annotation,
            ontology_term: &record.ontology_term,
            granular_annotation: &record.granular_annotation,
            cell_state: &record.cell_state,
            justification: &record.justification,
            supporting_markers: record.supporting_markers_joined(),
            conflicting_markers: record.conflicting_markers_joined(),
            missing_expression: &record.missing_expression,
            unexpected_expression: &record.unexpected_expression,
        }
    }
}

/// Write the table as CSV with a header row, one row per cluster.
pub fn write_csv<W: Write>(table: &AnnotationTable, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for record in table {
        csv.serialize(CsvRow::from(record))
            .context("Failed to write CSV row")?;
    }
    csv.flush().context("Failed to flush CSV output")?;
    Ok(())
}
