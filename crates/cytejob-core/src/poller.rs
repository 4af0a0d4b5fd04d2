use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ErrorKind};
use crate::job::{ClusterStatusMap, JobId, JobState, PollConfig};
use crate::normalize::{AnnotationTable, normalize};
use crate::resolver::resolve;
use crate::traits::{JobTransport, ProgressFrame, ProgressSink};

pub const UNKNOWN_SERVER_ERROR: &str = "Unknown server error";

/// Events emitted by the poller for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PollEvent<'a> {
    Started {
        job_id: &'a JobId,
    },
    Snapshot {
        job_id: &'a JobId,
        state: JobState,
    },
    NotFoundWarning {
        job_id: &'a JobId,
        consecutive: u32,
    },
    UnknownStatus {
        job_id: &'a JobId,
        status: &'a str,
    },
    ResolverError {
        job_id: &'a JobId,
        message: &'a str,
    },
    NetworkRetry {
        job_id: &'a JobId,
        error: &'a str,
        retry_in: Duration,
    },
    Completed {
        job_id: &'a JobId,
        elapsed: Duration,
    },
    Failed {
        job_id: &'a JobId,
        message: &'a str,
    },
    TimedOut {
        job_id: &'a JobId,
        elapsed: Duration,
    },
    Cancelled {
        job_id: &'a JobId,
    },
}

impl PollEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            PollEvent::Started { .. } => "started",
            PollEvent::Snapshot { .. } => "snapshot",
            PollEvent::NotFoundWarning { .. } => "not_found_warning",
            PollEvent::UnknownStatus { .. } => "unknown_status",
            PollEvent::ResolverError { .. } => "resolver_error",
            PollEvent::NetworkRetry { .. } => "network_retry",
            PollEvent::Completed { .. } => "completed",
            PollEvent::Failed { .. } => "failed",
            PollEvent::TimedOut { .. } => "timed_out",
            PollEvent::Cancelled { .. } => "cancelled",
        }
    }
}

/// Trait for receiving poller events (decoupled logging).
pub trait PollReporter: Send + Sync {
    fn report(&self, event: PollEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPollReporter;

impl PollReporter for TracingPollReporter {
    fn report(&self, event: PollEvent<'_>) {
        match event {
            PollEvent::Started { job_id } => {
                tracing::info!(%job_id, "Waiting for job");
            }
            PollEvent::Snapshot { job_id, state } => {
                if state.is_terminal() {
                    tracing::info!(%job_id, %state, "Job reached terminal status");
                } else {
                    tracing::debug!(%job_id, %state, "Job status");
                }
            }
            PollEvent::NotFoundWarning {
                job_id,
                consecutive,
            } => {
                tracing::warn!(
                    %job_id,
                    %consecutive,
                    "Job still not found; check that the auth token is valid and has access to this job"
                );
            }
            PollEvent::UnknownStatus { job_id, status } => {
                tracing::warn!(%job_id, %status, "Unrecognized job status, continuing to poll");
            }
            PollEvent::ResolverError { job_id, message } => {
                tracing::warn!(%job_id, %message, "Could not interpret job status, continuing to poll");
            }
            PollEvent::NetworkRetry {
                job_id,
                error,
                retry_in,
            } => {
                tracing::warn!(%job_id, %error, retry_in_secs = retry_in.as_secs_f64(), "Network error, retrying");
            }
            PollEvent::Completed { job_id, elapsed } => {
                tracing::info!(%job_id, elapsed_secs = elapsed.as_secs(), "Job completed");
            }
            PollEvent::Failed { job_id, message } => {
                tracing::error!(%job_id, %message, "Job failed");
            }
            PollEvent::TimedOut { job_id, elapsed } => {
                tracing::error!(%job_id, elapsed_secs = elapsed.as_secs(), "Timed out waiting for job");
            }
            PollEvent::Cancelled { job_id } => {
                tracing::info!(%job_id, "Polling cancelled");
            }
        }
    }
}

/// Loop-local state threaded through every poll iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollState {
    /// Consecutive `NotFound` snapshots, only counted with an auth token.
    pub consecutive_not_found: u32,
    /// Cluster map of the last frame handed to the sink.
    pub last_shown: Option<ClusterStatusMap>,
    /// Frames rendered so far.
    pub frames: u64,
}

impl PollState {
    /// Count a `NotFound` snapshot. Returns true when the warning should be
    /// emitted, which also resets the counter.
    pub fn record_not_found(&mut self, has_auth: bool, threshold: u32) -> bool {
        if !has_auth {
            return false;
        }
        self.consecutive_not_found += 1;
        if self.consecutive_not_found >= threshold {
            self.consecutive_not_found = 0;
            return true;
        }
        false
    }

    pub fn reset_not_found(&mut self) {
        self.consecutive_not_found = 0;
    }

    /// True if `clusters` differs from the last frame shown.
    pub fn is_new_frame(&self, clusters: &ClusterStatusMap) -> bool {
        self.last_shown.as_ref() != Some(clusters)
    }

    fn render(
        &mut self,
        sink: &dyn ProgressSink,
        job_id: &JobId,
        clusters: &ClusterStatusMap,
        finished: bool,
    ) {
        sink.render(&ProgressFrame {
            job_id,
            clusters,
            tick: self.frames,
            finished,
        });
        self.frames += 1;
        if self.is_new_frame(clusters) {
            self.last_shown = Some(clusters.clone());
        }
    }
}

/// Drives a submitted job to a terminal state.
pub struct JobPoller<T: JobTransport> {
    transport: T,
    config: PollConfig,
    cluster_labels: Option<HashMap<String, String>>,
}

impl<T: JobTransport> JobPoller<T> {
    pub fn new(transport: T, config: PollConfig) -> Self {
        Self {
            transport,
            config,
            cluster_labels: None,
        }
    }

    /// Map server cluster ids back to caller labels in the final table.
    pub fn with_cluster_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.cluster_labels = Some(labels);
        self
    }

    /// Poll until the job completes and return its normalized table.
    pub async fn run<R: PollReporter>(
        &self,
        job_id: &JobId,
        auth_token: Option<&str>,
        sink: Option<&dyn ProgressSink>,
        reporter: &R,
        cancel: &CancellationToken,
    ) -> Result<AnnotationTable, ApiError> {
        let raw = self
            .wait_for_result(job_id, auth_token, sink, reporter, cancel)
            .await?;
        normalize(&raw, self.cluster_labels.as_ref())
    }

    /// Poll until the job completes and return the raw result payload.
    ///
    /// Fails with `Timeout` once the budget is spent, `Auth` on 401/403,
    /// `Api` when the job fails or answers with something unusable, and
    /// `Cancelled` when `cancel` fires. Network failures are retried.
    pub async fn wait_for_result<R: PollReporter>(
        &self,
        job_id: &JobId,
        auth_token: Option<&str>,
        sink: Option<&dyn ProgressSink>,
        reporter: &R,
        cancel: &CancellationToken,
    ) -> Result<Value, ApiError> {
        reporter.report(PollEvent::Started { job_id });

        let outcome = self
            .poll(job_id, auth_token, sink, reporter, cancel)
            .await;

        if let Err(ApiError {
            kind: ErrorKind::Cancelled,
            ..
        }) = &outcome
        {
            reporter.report(PollEvent::Cancelled { job_id });
        }
        outcome
    }

    async fn poll<R: PollReporter>(
        &self,
        job_id: &JobId,
        auth_token: Option<&str>,
        sink: Option<&dyn ProgressSink>,
        reporter: &R,
        cancel: &CancellationToken,
    ) -> Result<Value, ApiError> {
        sleep_or_cancel(self.config.settle_delay, cancel).await?;

        let started = Instant::now();
        let mut state = PollState::default();

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }

            let elapsed = started.elapsed();
            if elapsed > self.config.timeout {
                reporter.report(PollEvent::TimedOut { job_id, elapsed });
                return Err(ApiError::timeout(format!(
                    "Job {job_id} did not finish within {}s",
                    self.config.timeout.as_secs()
                )));
            }

            let snapshot = match resolve(&self.transport, job_id, auth_token).await {
                Ok(snapshot) => snapshot,
                Err(err) if err.is_retryable() => {
                    let retry_in = self.config.network_retry_delay();
                    reporter.report(PollEvent::NetworkRetry {
                        job_id,
                        error: &err.message,
                        retry_in,
                    });
                    sleep_or_cancel(retry_in, cancel).await?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let job_state = snapshot.state();
            reporter.report(PollEvent::Snapshot {
                job_id,
                state: job_state,
            });
            if job_state != JobState::NotFound {
                state.reset_not_found();
            }
            let clusters = snapshot.cluster_status();

            match job_state {
                JobState::Completed => {
                    if let Some(sink) = sink {
                        if !clusters.is_empty() {
                            state.render(sink, job_id, &clusters, true);
                        }
                    }
                    let result = snapshot.into_result().unwrap_or(Value::Null);
                    if !(result.is_object() || result.is_array()) {
                        return Err(ApiError::api(format!(
                            "Job {job_id} completed but its result is not a JSON object or array"
                        )));
                    }
                    reporter.report(PollEvent::Completed {
                        job_id,
                        elapsed: started.elapsed(),
                    });
                    return Ok(result);
                }
                JobState::Failed => {
                    if let Some(sink) = sink {
                        if !clusters.is_empty() && state.is_new_frame(&clusters) {
                            state.render(sink, job_id, &clusters, true);
                        }
                    }
                    let message = match snapshot.message() {
                        "" => UNKNOWN_SERVER_ERROR.to_string(),
                        message => message.to_string(),
                    };
                    reporter.report(PollEvent::Failed {
                        job_id,
                        message: &message,
                    });
                    return Err(ApiError::api(message));
                }
                JobState::Pending | JobState::Processing => {
                    self.wait_with_progress(job_id, &clusters, sink, &mut state, cancel)
                        .await?;
                }
                JobState::NotFound => {
                    let threshold = self.config.not_found_warning_threshold;
                    if state.record_not_found(auth_token.is_some(), threshold) {
                        reporter.report(PollEvent::NotFoundWarning {
                            job_id,
                            consecutive: threshold,
                        });
                    }
                    sleep_or_cancel(self.config.effective_poll_interval(), cancel).await?;
                }
                JobState::Unknown => {
                    reporter.report(PollEvent::UnknownStatus {
                        job_id,
                        status: snapshot.message(),
                    });
                    sleep_or_cancel(self.config.effective_poll_interval(), cancel).await?;
                }
                JobState::Error => {
                    reporter.report(PollEvent::ResolverError {
                        job_id,
                        message: snapshot.message(),
                    });
                    sleep_or_cancel(self.config.effective_poll_interval(), cancel).await?;
                }
            }
        }
    }

    /// Sleep one poll interval, rendering a frame per tick when there is
    /// something to show.
    async fn wait_with_progress(
        &self,
        job_id: &JobId,
        clusters: &ClusterStatusMap,
        sink: Option<&dyn ProgressSink>,
        state: &mut PollState,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let interval = self.config.effective_poll_interval();
        let sink = match sink {
            Some(sink) if !clusters.is_empty() => sink,
            _ => return sleep_or_cancel(interval, cancel).await,
        };
        let tick = if self.config.tick.is_zero() {
            interval
        } else {
            self.config.tick
        };

        state.render(sink, job_id, clusters, false);
        let mut remaining = interval;
        while !remaining.is_zero() {
            let step = remaining.min(tick);
            sleep_or_cancel(step, cancel).await?;
            remaining -= step;
            if !remaining.is_zero() {
                state.render(sink, job_id, clusters, false);
            }
        }
        Ok(())
    }
}

fn cancelled() -> ApiError {
    ApiError::cancelled("Polling cancelled")
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), ApiError> {
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => Ok(()),
        () = cancel.cancelled() => Err(cancelled()),
    }
}
