use serde_json::Value;

use crate::error::ApiError;
use crate::job::JobId;
use crate::traits::JobTransport;

/// Submit a finished annotation payload and return the new job id.
///
/// Only HTTP 200 with a non-empty `job_id` string counts as success.
/// Auth failures propagate as-is; anything else is an `Api` failure.
pub async fn submit_job<T: JobTransport>(
    transport: &T,
    payload: &Value,
    auth_token: Option<&str>,
) -> Result<JobId, ApiError> {
    let outcome = transport.submit(payload, auth_token).await?;
    if outcome.status_code != 200 {
        return Err(ApiError::api(format!(
            "Job submission failed with HTTP {}",
            outcome.status_code
        )));
    }

    let job_id = outcome
        .body
        .as_json()
        .and_then(|body| body.get("job_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::api("Submission response did not contain a job_id"))?;

    tracing::info!(%job_id, "Job submitted");
    Ok(JobId::new(job_id))
}

/// Human-facing report page for a job. Never fetched by the client.
pub fn report_url(base_url: &str, job_id: &JobId) -> String {
    format!("{}/report/{}", base_url.trim_end_matches('/'), job_id)
}
