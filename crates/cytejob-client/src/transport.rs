use std::error::Error as StdError;
use std::time::Duration;

use cytejob_core::error::ApiError;
use cytejob_core::job::JobId;
use cytejob_core::submit::report_url;
use cytejob_core::traits::{ApiOutcome, JobTransport};
use reqwest::header::ACCEPT;
use reqwest::{Client, Method};
use serde_json::Value;
use url::Url;

use crate::config::{ConfigError, TransportConfig};

const UNKNOWN_ERROR: &str = "Unknown error";

/// reqwest-backed transport for the annotation service.
///
/// Performs exactly one request per call. Status codes are mapped as
/// follows: 401/403 become `Auth` errors, 404 is returned as an outcome,
/// any other non-2xx is an `Api` error carrying the response body.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    read_timeout: Duration,
    submit_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, ConfigError> {
        let base_url = config.validate()?;
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            read_timeout: config.read_timeout,
            submit_timeout: config.submit_timeout,
        })
    }

    pub fn report_url(&self, job_id: &JobId) -> String {
        report_url(self.base_url.as_str(), job_id)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::api(format!("Base URL {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Issue one request against `{base}/{segments...}`.
    pub async fn perform_request(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
        auth_token: Option<&str>,
        timeout: Duration,
    ) -> Result<ApiOutcome, ApiError> {
        let url = self.endpoint(segments)?;
        tracing::debug!(%method, %url, "Sending request");

        let mut request = self
            .client
            .request(method, url.clone())
            .timeout(timeout)
            .header(ACCEPT, "application/json");
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        let status_code = status.as_u16();
        match status_code {
            401 | 403 => {
                let text = response.text().await.unwrap_or_default();
                return Err(ApiError::auth(format!(
                    "HTTP {status_code} from {url}: {}",
                    if text.is_empty() {
                        "authentication or authorization failed"
                    } else {
                        text.as_str()
                    }
                )));
            }
            404 => {
                let text = response.text().await.unwrap_or_default();
                return Ok(ApiOutcome::not_found(text));
            }
            _ if !status.is_success() => {
                let text = match response.text().await {
                    Ok(text) if !text.is_empty() => text,
                    _ => UNKNOWN_ERROR.to_string(),
                };
                return Err(ApiError::api(format!("HTTP {status_code}: {text}")));
            }
            _ => {}
        }

        let text = response
            .text()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        if text.is_empty() {
            return Ok(ApiOutcome::text(status_code, text));
        }
        let json: Value = serde_json::from_str(&text).map_err(|e| {
            ApiError::api(format!("Failed to decode JSON response from {url}: {e}"))
        })?;
        Ok(ApiOutcome::json(status_code, json))
    }
}

impl JobTransport for HttpTransport {
    async fn submit(&self, payload: &Value, auth_token: Option<&str>) -> Result<ApiOutcome, ApiError> {
        self.perform_request(
            Method::POST,
            &["annotate"],
            Some(payload),
            auth_token,
            self.submit_timeout,
        )
        .await
    }

    async fn fetch_status(
        &self,
        job_id: &JobId,
        auth_token: Option<&str>,
    ) -> Result<ApiOutcome, ApiError> {
        self.perform_request(
            Method::GET,
            &["status", job_id.as_str()],
            None,
            auth_token,
            self.read_timeout,
        )
        .await
    }

    async fn fetch_results(
        &self,
        job_id: &JobId,
        auth_token: Option<&str>,
    ) -> Result<ApiOutcome, ApiError> {
        self.perform_request(
            Method::GET,
            &["results", job_id.as_str()],
            None,
            auth_token,
            self.read_timeout,
        )
        .await
    }
}

/// Classify a reqwest failure that happened below HTTP.
///
/// reqwest's timeout/connect flags are authoritative; everything else goes
/// through the message heuristic with the full source chain.
pub fn classify_transport_error(err: &reqwest::Error) -> ApiError {
    let message = error_chain(err);
    if err.is_timeout() || err.is_connect() {
        ApiError::network(message)
    } else {
        ApiError::from_transport_message(message)
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
