use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use alkemy_contracts::jobs::{JobHandle, JobState, JobStatus};
use alkemy_contracts::request::{GenerationKind, GenerationRequest};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::adapter::{ensure_supported, ProviderAdapter, ProviderKind};
use crate::clock::Clock;
use crate::error::GenerationError;
use crate::poller::PollOptions;

const PROVIDER: &str = "dryrun";
const DEFAULT_LATENCY_MS: u64 = 1_500;
const MAX_LATENCY_MS: u64 = 600_000;
/// How long a finished job stays readable before the next submit drops it.
const FINISHED_RETENTION: Duration = Duration::from_secs(600);

struct DryrunJob {
    kind: GenerationKind,
    prompt: String,
    submitted: Duration,
    latency: Duration,
    failure: Option<String>,
    cancelled: bool,
}

impl DryrunJob {
    fn finished_at(&self) -> Duration {
        self.submitted + self.latency
    }
}

/// In-process provider for offline runs and tests. Jobs advance with the
/// injected clock: pending for the first quarter of their latency, running
/// until it elapses, then terminal.
///
/// `dryrun_latency_ms` sets the latency; `dryrun_fail` (a message or `true`)
/// makes the job fail instead of succeed.
pub struct DryrunAdapter {
    clock: Arc<dyn Clock>,
    jobs: Mutex<HashMap<String, DryrunJob>>,
}

impl DryrunAdapter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, DryrunJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune_finished(jobs: &mut HashMap<String, DryrunJob>, now: Duration) {
        jobs.retain(|_, job| {
            let finished = job.cancelled || now >= job.finished_at();
            !finished || now.saturating_sub(job.finished_at()) < FINISHED_RETENTION
        });
    }
}

impl ProviderAdapter for DryrunAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Dryrun
    }

    fn supported_kinds(&self) -> &[GenerationKind] {
        &GenerationKind::ALL
    }

    fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, GenerationError> {
        ensure_supported(self, request)?;
        let latency_ms = match request.param_i64("dryrun_latency_ms") {
            Some(value) => u64::try_from(value)
                .ok()
                .filter(|value| *value <= MAX_LATENCY_MS)
                .ok_or_else(|| {
                    GenerationError::InvalidRequest(format!(
                        "dryrun_latency_ms must be between 0 and {MAX_LATENCY_MS}, got {value}"
                    ))
                })?,
            None => DEFAULT_LATENCY_MS,
        };
        let failure = match request.parameters.get("dryrun_fail") {
            Some(Value::Bool(true)) => Some("dryrun failure requested".to_string()),
            Some(Value::String(message)) if !message.trim().is_empty() => {
                Some(message.trim().to_string())
            }
            _ => None,
        };

        let id = format!("dryrun-{}", Uuid::new_v4().simple());
        let now = self.clock.now();
        let mut jobs = self.jobs();
        Self::prune_finished(&mut jobs, now);
        jobs.insert(
            id.clone(),
            DryrunJob {
                kind: request.kind,
                prompt: request.prompt.trim().to_string(),
                submitted: now,
                latency: Duration::from_millis(latency_ms),
                failure,
                cancelled: false,
            },
        );
        Ok(JobHandle::new(PROVIDER, id))
    }

    fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus, GenerationError> {
        let now = self.clock.now();
        let jobs = self.jobs();
        let Some(job) = jobs.get(&handle.provider_job_id) else {
            return Ok(JobStatus::failed(json!({
                "error": format!("dryrun job {} not found", handle.provider_job_id),
            })));
        };
        if job.cancelled {
            return Ok(JobStatus::cancelled());
        }
        let elapsed = now.saturating_sub(job.submitted);
        if elapsed >= job.latency {
            return Ok(match &job.failure {
                Some(message) => JobStatus::failed(json!({"error": message})),
                None => JobStatus::succeeded(json!({
                    "sample": sample_url(job.kind, &handle.provider_job_id),
                    "kind": job.kind.as_str(),
                    "prompt": job.prompt,
                })),
            });
        }
        if elapsed < job.latency / 4 {
            return Ok(JobStatus::pending());
        }
        let percent = elapsed.as_secs_f64() / job.latency.as_secs_f64() * 100.0;
        Ok(JobStatus::in_flight(JobState::Running, Some(percent as u8)))
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), GenerationError> {
        if let Some(job) = self.jobs().get_mut(&handle.provider_job_id) {
            job.cancelled = true;
        }
        Ok(())
    }

    fn default_poll_options(&self, request: &GenerationRequest) -> PollOptions {
        PollOptions::new(Duration::from_millis(250), Duration::from_secs(30))
            .with_request_overrides(request)
    }
}

fn sample_url(kind: GenerationKind, job_id: &str) -> String {
    let ext = match kind {
        GenerationKind::Image => "png",
        GenerationKind::Video => "mp4",
        GenerationKind::World => "glb",
        GenerationKind::Speech => "mp3",
    };
    format!("https://dryrun.alkemy.local/{}/{job_id}.{ext}", kind.as_str())
}

#[cfg(test)]
mod tests {
    use alkemy_contracts::events::EventWriter;
    use alkemy_contracts::result::ErrorKind;

    use super::*;
    use crate::clock::ManualClock;
    use crate::coordinator::{RunOptions, TaskCoordinator};

    #[test]
    fn job_walks_pending_running_succeeded() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new());
        let adapter = DryrunAdapter::new(clock.clone());
        let request = GenerationRequest::new(GenerationKind::Video, "surf")
            .with_param("dryrun_latency_ms", 1000);
        let handle = adapter.submit(&request)?;

        assert_eq!(adapter.fetch_status(&handle)?.state, JobState::Pending);
        clock.advance(Duration::from_millis(500));
        let running = adapter.fetch_status(&handle)?;
        assert_eq!(running.state, JobState::Running);
        assert_eq!(running.progress_hint, Some(50));
        clock.advance(Duration::from_millis(500));
        let done = adapter.fetch_status(&handle)?;
        assert_eq!(done.state, JobState::Succeeded);
        // repeated reads of a finished job agree
        assert_eq!(adapter.fetch_status(&handle)?, done);
        Ok(())
    }

    #[test]
    fn full_run_through_the_coordinator() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new());
        let adapter = DryrunAdapter::new(clock.clone());
        let coordinator = TaskCoordinator::new(clock.clone(), EventWriter::disabled());

        let result = coordinator.run(
            &GenerationRequest::new(GenerationKind::Image, "a red fox"),
            &adapter,
            RunOptions::default(),
        )?;
        let url = result.primary_url().unwrap_or_default();
        assert!(url.starts_with("https://dryrun.alkemy.local/image/dryrun-"));
        assert!(url.ends_with(".png"));
        assert_eq!(result.elapsed_ms, 1500);

        let failed = coordinator.run(
            &GenerationRequest::new(GenerationKind::Speech, "hello")
                .with_param("dryrun_fail", "voice unavailable"),
            &adapter,
            RunOptions::default(),
        )?;
        assert_eq!(failed.error_kind, Some(ErrorKind::ProviderRejected));
        assert_eq!(failed.error_message.as_deref(), Some("voice unavailable"));
        Ok(())
    }

    #[test]
    fn cancel_marks_the_job() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new());
        let adapter = DryrunAdapter::new(clock.clone());
        let handle = adapter.submit(&GenerationRequest::new(GenerationKind::World, "dunes"))?;
        adapter.cancel(&handle)?;
        assert_eq!(adapter.fetch_status(&handle)?.state, JobState::Cancelled);
        Ok(())
    }

    #[test]
    fn finished_jobs_are_dropped_after_retention() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new());
        let adapter = DryrunAdapter::new(clock.clone());
        let request =
            GenerationRequest::new(GenerationKind::Image, "x").with_param("dryrun_latency_ms", 0);
        let old = adapter.submit(&request)?;
        let long = adapter.submit(
            &GenerationRequest::new(GenerationKind::Video, "y")
                .with_param("dryrun_latency_ms", MAX_LATENCY_MS as i64),
        )?;

        clock.advance(Duration::from_secs(60));
        adapter.submit(&request)?;
        assert_eq!(adapter.jobs().len(), 3);
        assert_eq!(adapter.fetch_status(&old)?.state, JobState::Succeeded);

        clock.advance(FINISHED_RETENTION);
        adapter.submit(&request)?;
        // `old` and the 60s submit are gone; the long job finished at 600s
        assert_eq!(adapter.jobs().len(), 2);
        assert_eq!(adapter.fetch_status(&old)?.state, JobState::Failed);
        assert_eq!(adapter.fetch_status(&long)?.state, JobState::Succeeded);
        Ok(())
    }

    #[test]
    fn negative_latency_is_invalid() {
        let adapter = DryrunAdapter::new(Arc::new(ManualClock::new()));
        let request = GenerationRequest::new(GenerationKind::Image, "x")
            .with_param("dryrun_latency_ms", -5);
        assert!(matches!(
            adapter.submit(&request),
            Err(GenerationError::InvalidRequest(_))
        ));
    }
}
