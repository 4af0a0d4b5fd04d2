use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_USER_AGENT: &str = concat!("cytejob/", env!("CARGO_PKG_VERSION"));

/// Problems building an [`HttpTransport`](crate::HttpTransport).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Connection settings for the annotation service.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Service root; endpoints are appended as path segments.
    pub base_url: String,
    /// Timeout for `status` and `results` reads.
    pub read_timeout: Duration,
    /// Timeout for the `annotate` submission.
    pub submit_timeout: Duration,
    pub user_agent: String,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Check the settings and return the parsed base URL.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason,
        };

        let url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(invalid(format!(
                    "scheme '{scheme}' is not allowed (only http/https)"
                )));
            }
        }
        if url.cannot_be_a_base() {
            return Err(invalid("URL cannot be used as a base".into()));
        }

        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("read timeout"));
        }
        if self.submit_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("submit timeout"));
        }

        Ok(url)
    }
}
