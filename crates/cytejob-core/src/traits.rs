use std::future::Future;

use serde_json::Value;

use crate::error::ApiError;
use crate::job::{ClusterStatusMap, JobId};

/// Decoded body of one HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    /// Convert into a JSON value; text bodies become a JSON string.
    pub fn into_value(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => Value::String(text),
        }
    }
}

/// Outcome of a single HTTP attempt that was not classified as a failure.
///
/// Classified failures travel as `Err(ApiError)`, so an outcome never
/// carries both a usable body and an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiOutcome {
    pub status_code: u16,
    pub body: ResponseBody,
}

impl ApiOutcome {
    pub fn json(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            body: ResponseBody::Json(body),
        }
    }

    pub fn text(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: ResponseBody::Text(body.into()),
        }
    }

    pub fn not_found(body: impl Into<String>) -> Self {
        Self::text(404, body)
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code == 404
    }
}

/// Talks to the annotation service.
///
/// Implementations perform exactly one request per call and never retry;
/// retry policy lives in the poller. 401/403 must come back as
/// [`ErrorKind::Auth`](crate::error::ErrorKind::Auth) and 404 as an
/// `Ok` outcome with `status_code == 404`.
pub trait JobTransport: Send + Sync {
    /// `POST /annotate` with a finished request payload.
    fn submit(
        &self,
        payload: &Value,
        auth_token: Option<&str>,
    ) -> impl Future<Output = Result<ApiOutcome, ApiError>> + Send;

    /// `GET /status/{job_id}`.
    fn fetch_status(
        &self,
        job_id: &JobId,
        auth_token: Option<&str>,
    ) -> impl Future<Output = Result<ApiOutcome, ApiError>> + Send;

    /// `GET /results/{job_id}`.
    fn fetch_results(
        &self,
        job_id: &JobId,
        auth_token: Option<&str>,
    ) -> impl Future<Output = Result<ApiOutcome, ApiError>> + Send;
}

/// One progress frame handed to a [`ProgressSink`].
#[derive(Debug, Clone, Copy)]
pub struct ProgressFrame<'a> {
    pub job_id: &'a JobId,
    pub clusters: &'a ClusterStatusMap,
    /// Monotonic frame counter across the whole poll, for spinner animation.
    pub tick: u64,
    /// Set on the last frame of a job that reached a terminal state.
    pub finished: bool,
}

/// Renders per-cluster progress while a job runs.
pub trait ProgressSink: Send + Sync {
    fn render(&self, frame: &ProgressFrame<'_>);
}
