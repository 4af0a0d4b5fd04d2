use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier handed out by the annotation service on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Client-side view of a job after one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    /// The status endpoint answered 404; usually the job is not visible yet.
    NotFound,
    /// The server reported a status string this client does not know.
    Unknown,
    /// The status response could not be interpreted.
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::NotFound => "not_found",
            JobState::Unknown => "unknown",
            JobState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The `jobStatus` value reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Other(String),
}

impl From<&str> for ServerStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "pending" => ServerStatus::Pending,
            "processing" => ServerStatus::Processing,
            "completed" => ServerStatus::Completed,
            "failed" => ServerStatus::Failed,
            other => ServerStatus::Other(other.to_string()),
        }
    }
}

/// Per-cluster progress as reported in `clusterStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

pub type ClusterStatusMap = BTreeMap<String, ClusterState>;

/// One point-in-time read of a job's server-side state.
///
/// `result` is only ever present on a [`JobState::Completed`] snapshot;
/// the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    state: JobState,
    result: Option<Value>,
    message: String,
    raw_status: Option<Value>,
    observed_at: DateTime<Utc>,
}

impl JobSnapshot {
    fn build(state: JobState, message: String, raw_status: Option<Value>) -> Self {
        Self {
            state,
            result: None,
            message,
            raw_status,
            observed_at: Utc::now(),
        }
    }

    pub fn pending(raw_status: Value) -> Self {
        Self::build(JobState::Pending, String::new(), Some(raw_status))
    }

    pub fn processing(raw_status: Value) -> Self {
        Self::build(JobState::Processing, String::new(), Some(raw_status))
    }

    pub fn completed(result: Value, raw_status: Option<Value>) -> Self {
        let mut snapshot = Self::build(JobState::Completed, String::new(), raw_status);
        snapshot.result = Some(result);
        snapshot
    }

    pub fn failed(message: impl Into<String>, raw_status: Option<Value>) -> Self {
        Self::build(JobState::Failed, message.into(), raw_status)
    }

    pub fn not_found() -> Self {
        Self::build(JobState::NotFound, String::new(), None)
    }

    /// `raw_value` is the unrecognized `jobStatus` string.
    pub fn unknown(raw_value: impl Into<String>, raw_status: Value) -> Self {
        Self::build(JobState::Unknown, raw_value.into(), Some(raw_status))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::build(JobState::Error, message.into(), None)
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<Value> {
        self.result
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn raw_status(&self) -> Option<&Value> {
        self.raw_status.as_ref()
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Decode `clusterStatus` from the raw status body.
    ///
    /// Entries whose value is not a string are skipped; unknown strings map
    /// to [`ClusterState::Unknown`].
    pub fn cluster_status(&self) -> ClusterStatusMap {
        let Some(entries) = self
            .raw_status
            .as_ref()
            .and_then(|raw| raw.get("clusterStatus"))
            .and_then(Value::as_object)
        else {
            return ClusterStatusMap::new();
        };

        entries
            .iter()
            .filter(|(_, value)| value.is_string())
            .filter_map(|(id, value)| {
                serde_json::from_value::<ClusterState>(value.clone())
                    .ok()
                    .map(|state| (id.clone(), state))
            })
            .collect()
    }
}

const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Polling policy for [`JobPoller`](crate::poller::JobPoller).
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Steady-state wait between status reads.
    pub poll_interval: Duration,
    /// Overall budget measured from the first status read.
    pub timeout: Duration,
    /// Wait before the first read so the submission is visible server-side.
    pub settle_delay: Duration,
    /// Granularity of the interval sleep, one progress frame per tick.
    pub tick: Duration,
    /// Upper bound on the wait after a network failure.
    pub network_retry_cap: Duration,
    /// Consecutive 404s (with an auth token) before warning about permissions.
    pub not_found_warning_threshold: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(7200),
            settle_delay: Duration::from_secs(5),
            tick: DEFAULT_TICK,
            network_retry_cap: Duration::from_secs(5),
            not_found_warning_threshold: 3,
        }
    }
}

impl PollConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Wait between status reads. Never shorter than one tick, so a zero
    /// `poll_interval` cannot turn the loop into back-to-back requests.
    pub fn effective_poll_interval(&self) -> Duration {
        let floor = if self.tick.is_zero() {
            DEFAULT_TICK
        } else {
            self.tick
        };
        self.poll_interval.max(floor)
    }

    /// Wait applied after a network failure: `min(poll_interval, cap)`.
    pub fn network_retry_delay(&self) -> Duration {
        self.effective_poll_interval().min(self.network_retry_cap)
    }
}
