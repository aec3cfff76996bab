use std::time::Duration;

use alkemy_contracts::events::EventWriter;
use alkemy_contracts::jobs::{JobHandle, JobStatus};
use alkemy_contracts::progress::{ProgressUpdate, RunPhase};
use alkemy_contracts::request::GenerationRequest;
use serde_json::{json, Value};

use crate::adapter::ProviderAdapter;
use crate::cancel::CancellationToken;
use crate::clock::{Clock, SleepOutcome};
use crate::error::GenerationError;
use crate::progress::{progress_hint, ProgressSink};

const MIN_INTERVAL_S: f64 = 0.2;
const MIN_INTERVAL: Duration = Duration::from_millis(200);
const MAX_INTERVAL_S: f64 = 60.0;
const MIN_WAIT_S: f64 = 1.0;
const MAX_WAIT_S: f64 = 1800.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_wait: Duration,
    /// Consecutive transient `fetch_status` failures tolerated before giving up.
    pub max_transient_failures: u32,
    pub transient_retry_delay: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(60),
            max_transient_failures: 3,
            transient_retry_delay: Duration::from_secs(1),
        }
    }
}

impl PollOptions {
    /// `interval` is floored at 200ms.
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            max_wait,
            ..Self::default()
        }
    }

    /// Applies `poll_interval` / `poll_timeout` request parameters (seconds).
    pub fn with_request_overrides(mut self, request: &GenerationRequest) -> Self {
        if let Some(seconds) = request.param_f64("poll_interval") {
            self.interval = Duration::from_secs_f64(seconds.clamp(MIN_INTERVAL_S, MAX_INTERVAL_S));
        }
        if let Some(seconds) = request.param_f64("poll_timeout") {
            self.max_wait = Duration::from_secs_f64(seconds.clamp(MIN_WAIT_S, MAX_WAIT_S));
        }
        self
    }

    fn sleep_interval(&self) -> Duration {
        self.interval.max(MIN_INTERVAL)
    }

    fn retry_delay(&self) -> Duration {
        self.transient_retry_delay.min(self.sleep_interval())
    }
}

/// Drives `fetch_status` at a fixed interval until the job is terminal, the
/// budget runs out, or the caller cancels.
pub struct JobPoller<'a> {
    clock: &'a dyn Clock,
    events: &'a EventWriter,
}

impl<'a> JobPoller<'a> {
    pub fn new(clock: &'a dyn Clock, events: &'a EventWriter) -> Self {
        Self { clock, events }
    }

    pub fn poll_until_done(
        &self,
        handle: &JobHandle,
        adapter: &dyn ProviderAdapter,
        options: &PollOptions,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<JobStatus, GenerationError> {
        let started = self.clock.now();
        let mut poll_count: u32 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            let elapsed = self.elapsed_since(started);
            if elapsed >= options.max_wait {
                return Err(GenerationError::PollTimeout { waited: elapsed });
            }

            let status = match adapter.fetch_status(handle) {
                Ok(status) => status,
                Err(err) if err.is_transient() => {
                    consecutive_failures += 1;
                    self.record(
                        "poll_retry",
                        json!({
                            "job_id": handle.provider_job_id,
                            "provider": handle.adapter_name,
                            "attempt": consecutive_failures,
                            "error": err.to_string(),
                        }),
                    );
                    if consecutive_failures >= options.max_transient_failures {
                        return Err(err);
                    }
                    if self.clock.sleep(options.retry_delay(), cancel) == SleepOutcome::Cancelled {
                        return Err(GenerationError::Cancelled);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };
            consecutive_failures = 0;
            poll_count += 1;

            let elapsed = self.elapsed_since(started);
            let hint = progress_hint(&status, elapsed, options.max_wait);
            self.record(
                "job_polled",
                json!({
                    "job_id": handle.provider_job_id,
                    "provider": handle.adapter_name,
                    "state": status.state.as_str(),
                    "progress": hint,
                    "poll_count": poll_count,
                    "elapsed_ms": millis(elapsed),
                }),
            );
            progress.publish(ProgressUpdate {
                phase: RunPhase::Polling,
                state: Some(status.state),
                progress: hint,
                elapsed_ms: millis(elapsed),
                poll_count,
                job_id: Some(handle.provider_job_id.clone()),
                message: None,
            });
            if status.is_terminal() {
                return Ok(status);
            }

            let remaining = options.max_wait.saturating_sub(elapsed);
            if remaining.is_zero() {
                continue;
            }
            if self.clock.sleep(options.sleep_interval().min(remaining), cancel)
                == SleepOutcome::Cancelled
            {
                return Err(GenerationError::Cancelled);
            }
        }
    }

    fn elapsed_since(&self, started: Duration) -> Duration {
        self.clock.now().saturating_sub(started)
    }

    fn record(&self, event_type: &str, payload: Value) {
        if let Value::Object(map) = payload {
            let _ = self.events.emit(event_type, map);
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
