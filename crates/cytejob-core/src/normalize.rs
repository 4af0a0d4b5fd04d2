//! Turns the terminal result payload into an [`AnnotationTable`].
//!
//! The payload is treated as partially trustworthy: missing or mistyped
//! fields fall back to defaults instead of failing the whole table.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ApiError;

pub const MARKER_SEPARATOR: &str = "; ";
const UNKNOWN: &str = "Unknown";

/// One annotated cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    pub cluster_id: String,
    pub annotation: String,
    pub ontology_term: String,
    pub granular_annotation: String,
    pub cell_state: String,
    pub justification: String,
    pub supporting_markers: Vec<String>,
    pub conflicting_markers: Vec<String>,
    pub missing_expression: String,
    pub unexpected_expression: String,
}

impl AnnotationRecord {
    pub fn supporting_markers_joined(&self) -> String {
        self.supporting_markers.join(MARKER_SEPARATOR)
    }

    pub fn conflicting_markers_joined(&self) -> String {
        self.conflicting_markers.join(MARKER_SEPARATOR)
    }
}

/// Normalized result rows in server order, indexed by cluster id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationTable {
    records: Vec<AnnotationRecord>,
    index: HashMap<String, usize>,
}

impl AnnotationTable {
    pub fn new(records: Vec<AnnotationRecord>) -> Self {
        let mut index = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            // First occurrence wins for duplicate ids.
            index.entry(record.cluster_id.clone()).or_insert(position);
        }
        Self { records, index }
    }

    pub fn get(&self, cluster_id: &str) -> Option<&AnnotationRecord> {
        self.index.get(cluster_id).map(|&i| &self.records[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AnnotationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a AnnotationTable {
    type Item = &'a AnnotationRecord;
    type IntoIter = std::slice::Iter<'a, AnnotationRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Build the annotation table from a raw results payload.
///
/// `cluster_labels` maps server cluster ids back to caller labels; ids
/// without an entry pass through unchanged.
pub fn normalize(
    raw_result: &Value,
    cluster_labels: Option<&HashMap<String, String>>,
) -> Result<AnnotationTable, ApiError> {
    let entries = raw_result
        .get("annotations")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::api("Result payload has no 'annotations' list"))?;

    let empty = Map::new();
    let records = entries
        .iter()
        .map(|entry| {
            let annotation = entry
                .get("latest")
                .and_then(|latest| latest.get("annotation"))
                .and_then(Value::as_object)
                .unwrap_or(&empty);

            let server_id = annotation
                .get("clusterId")
                .or_else(|| entry.get("clusterId"))
                .and_then(scalar_to_string)
                .unwrap_or_default();
            let cluster_id = cluster_labels
                .and_then(|labels| labels.get(&server_id))
                .cloned()
                .unwrap_or(server_id);

            AnnotationRecord {
                cluster_id,
                annotation: text_or(annotation, "annotation", UNKNOWN),
                ontology_term: text_or(annotation, "ontologyTerm", UNKNOWN),
                granular_annotation: text_or(annotation, "granularAnnotation", ""),
                cell_state: text_or(annotation, "cellState", ""),
                justification: text_or(annotation, "justification", ""),
                supporting_markers: markers(annotation, "supportingMarkers"),
                conflicting_markers: markers(annotation, "conflictingMarkers"),
                missing_expression: text_or(annotation, "missingExpression", ""),
                unexpected_expression: text_or(annotation, "unexpectedExpression", ""),
            }
        })
        .collect();

    Ok(AnnotationTable::new(records))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_or(object: &Map<String, Value>, key: &str, default: &str) -> String {
    object
        .get(key)
        .and_then(scalar_to_string)
        .unwrap_or_else(|| default.to_string())
}

fn markers(object: &Map<String, Value>, key: &str) -> Vec<String> {
    match object.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_to_string).collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}
