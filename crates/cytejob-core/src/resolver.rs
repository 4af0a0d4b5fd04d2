//! Folds a status read and, for completed jobs, a results read into a
//! single [`JobSnapshot`].

use serde_json::Value;

use crate::error::{ApiError, ErrorKind};
use crate::job::{JobId, JobSnapshot, ServerStatus};
use crate::traits::{JobTransport, ResponseBody};

pub const RESULTS_UNAVAILABLE: &str = "results unavailable";

/// Resolve the current state of `job_id`.
///
/// Classified errors from the status read propagate unchanged. A status body
/// that cannot be interpreted yields a [`JobState::Error`](crate::job::JobState::Error)
/// snapshot instead of an error. A completed job whose results cannot be read
/// is reported as failed; only an auth failure on that read propagates.
pub async fn resolve<T: JobTransport>(
    transport: &T,
    job_id: &JobId,
    auth_token: Option<&str>,
) -> Result<JobSnapshot, ApiError> {
    let outcome = transport.fetch_status(job_id, auth_token).await?;
    if outcome.is_not_found() {
        return Ok(JobSnapshot::not_found());
    }

    let status_body = match outcome.body {
        ResponseBody::Json(value) => value,
        ResponseBody::Text(text) => {
            return Ok(JobSnapshot::error(format!(
                "Status response for job {job_id} is not JSON (HTTP {}): {}",
                outcome.status_code,
                preview(&text)
            )));
        }
    };

    let Some(raw_status) = status_body.get("jobStatus").and_then(Value::as_str) else {
        return Ok(JobSnapshot::error(format!(
            "Status response for job {job_id} has no string 'jobStatus'"
        )));
    };

    match ServerStatus::from(raw_status) {
        ServerStatus::Completed => resolve_results(transport, job_id, auth_token, status_body).await,
        ServerStatus::Failed => {
            let message = server_message(&status_body);
            Ok(JobSnapshot::failed(message, Some(status_body)))
        }
        ServerStatus::Processing => Ok(JobSnapshot::processing(status_body)),
        ServerStatus::Pending => Ok(JobSnapshot::pending(status_body)),
        ServerStatus::Other(raw) => Ok(JobSnapshot::unknown(raw, status_body)),
    }
}

async fn resolve_results<T: JobTransport>(
    transport: &T,
    job_id: &JobId,
    auth_token: Option<&str>,
    status_body: Value,
) -> Result<JobSnapshot, ApiError> {
    match transport.fetch_results(job_id, auth_token).await {
        Ok(outcome) if outcome.is_not_found() => {
            tracing::warn!(%job_id, "Job reported completed but results returned 404");
            Ok(JobSnapshot::failed(RESULTS_UNAVAILABLE, Some(status_body)))
        }
        Ok(outcome) => Ok(JobSnapshot::completed(
            outcome.body.into_value(),
            Some(status_body),
        )),
        Err(err) if err.kind == ErrorKind::Auth => Err(err),
        Err(err) => {
            tracing::warn!(%job_id, error = %err, "Job reported completed but results fetch failed");
            Ok(JobSnapshot::failed(RESULTS_UNAVAILABLE, Some(status_body)))
        }
    }
}

/// Server-supplied failure reason, if any.
fn server_message(status_body: &Value) -> String {
    ["message", "error"]
        .iter()
        .find_map(|key| status_body.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn preview(text: &str) -> String {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
