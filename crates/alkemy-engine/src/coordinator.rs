use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use alkemy_contracts::events::EventWriter;
use alkemy_contracts::jobs::{JobHandle, JobState};
use alkemy_contracts::progress::{ProgressUpdate, RunPhase};
use alkemy_contracts::request::GenerationRequest;
use alkemy_contracts::result::GenerationResult;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::adapter::{ensure_supported, ProviderAdapter};
use crate::cancel::CancellationToken;
use crate::clock::{Clock, SystemClock};
use crate::error::GenerationError;
use crate::normalize::normalize;
use crate::poller::{millis, JobPoller, PollOptions};
use crate::progress::ProgressSink;

/// Per-run knobs. `poll` overrides the adapter's defaults when set.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub poll: Option<PollOptions>,
    pub cancel: CancellationToken,
    pub progress: ProgressSink,
}

impl RunOptions {
    pub fn with_poll(mut self, poll: PollOptions) -> Self {
        self.poll = Some(poll);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }
}

/// Runs one request end to end: validate, submit, poll, normalize.
///
/// Provider-side outcomes (rejected, cancelled remotely) come back as
/// `Ok(GenerationResult)` with `error_kind` set. Failures of the run itself
/// (bad input, submit errors, timeouts, caller cancellation) are `Err`.
#[derive(Clone)]
pub struct TaskCoordinator {
    clock: Arc<dyn Clock>,
    events: EventWriter,
}

impl TaskCoordinator {
    pub fn new(clock: Arc<dyn Clock>, events: EventWriter) -> Self {
        Self { clock, events }
    }

    pub fn with_system_clock(events: EventWriter) -> Self {
        Self::new(Arc::new(SystemClock::new()), events)
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn run(
        &self,
        request: &GenerationRequest,
        adapter: &dyn ProviderAdapter,
        options: RunOptions,
    ) -> Result<GenerationResult, GenerationError> {
        let mut run = RunTracker::new(self, adapter.name(), &options.progress);
        run.record(
            "run_started",
            json!({
                "kind": request.kind.as_str(),
                "prompt_chars": request.prompt.chars().count(),
                "param_keys": request.parameters.keys().collect::<Vec<_>>(),
            }),
        );

        let checked = request
            .validate()
            .map_err(GenerationError::InvalidRequest)
            .and_then(|()| ensure_supported(adapter, request));
        if let Err(err) = checked {
            run.transition(RunPhase::SubmitRejected, Some(err.to_string()));
            return run.finish(Err(err));
        }

        run.transition(RunPhase::Submitting, None);
        if options.cancel.is_cancelled() {
            run.transition(RunPhase::Cancelled, None);
            return run.finish(Err(GenerationError::Cancelled));
        }
        let handle = match adapter.submit(request) {
            Ok(handle) => handle,
            Err(err) => {
                run.transition(RunPhase::SubmitRejected, Some(err.to_string()));
                return run.finish(Err(err));
            }
        };
        run.job_id = Some(handle.provider_job_id.clone());
        run.record(
            "job_submitted",
            json!({
                "job_id": handle.provider_job_id,
                "poll_url": handle.poll_url,
                "submitted_at": handle.submitted_at.to_rfc3339(),
            }),
        );

        let poll = options
            .poll
            .unwrap_or_else(|| adapter.default_poll_options(request));
        run.transition(RunPhase::Polling, None);
        let polled = JobPoller::new(self.clock.as_ref(), &self.events).poll_until_done(
            &handle,
            adapter,
            &poll,
            &options.cancel,
            &options.progress,
        );
        let elapsed_ms = millis(run.elapsed());

        let outcome = match polled {
            Ok(status) => match normalize(&status, &handle, adapter.kind(), elapsed_ms) {
                Ok(result) => {
                    let phase = match status.state {
                        JobState::Succeeded => RunPhase::Succeeded,
                        JobState::Cancelled => RunPhase::Cancelled,
                        _ => RunPhase::Failed,
                    };
                    run.transition(phase, result.error_message.clone());
                    Ok(result)
                }
                Err(err) => {
                    run.record(
                        "provider_contract_violation",
                        json!({
                            "job_id": handle.provider_job_id,
                            "error": err.to_string(),
                            "payload": status.terminal_payload,
                        }),
                    );
                    run.transition(RunPhase::Failed, Some(err.to_string()));
                    Err(err)
                }
            },
            Err(GenerationError::PollTimeout { waited }) => {
                run.cancel_remote(adapter, &handle, "timeout");
                let err = GenerationError::GenerationTimeout {
                    job_id: handle.provider_job_id.clone(),
                    waited,
                };
                run.transition(RunPhase::TimedOut, Some(err.to_string()));
                Err(err)
            }
            Err(GenerationError::Cancelled) => {
                run.cancel_remote(adapter, &handle, "caller");
                run.transition(RunPhase::Cancelled, None);
                Err(GenerationError::Cancelled)
            }
            Err(err) => {
                run.transition(RunPhase::Failed, Some(err.to_string()));
                Err(err)
            }
        };
        run.finish(outcome)
    }

    /// Runs on a dedicated thread. The handle carries the progress stream and
    /// the token that cancels the run.
    pub fn spawn(
        &self,
        request: GenerationRequest,
        adapter: Arc<dyn ProviderAdapter>,
        poll: Option<PollOptions>,
    ) -> RunHandle {
        let (progress, rx) = ProgressSink::channel();
        let cancel = CancellationToken::new();
        let options = RunOptions {
            poll,
            cancel: cancel.clone(),
            progress,
        };
        let coordinator = self.clone();
        let join = thread::spawn(move || coordinator.run(&request, adapter.as_ref(), options));
        RunHandle {
            progress: rx,
            cancel,
            join,
        }
    }
}

pub struct RunHandle {
    progress: Receiver<ProgressUpdate>,
    cancel: CancellationToken,
    join: JoinHandle<Result<GenerationResult, GenerationError>>,
}

impl RunHandle {
    pub fn progress(&self) -> &Receiver<ProgressUpdate> {
        &self.progress
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn wait(self) -> Result<GenerationResult, GenerationError> {
        self.join.join().unwrap_or_else(|_| {
            Err(GenerationError::ProviderUnavailable(
                "generation thread panicked".to_string(),
            ))
        })
    }
}

struct RunTracker<'a> {
    coordinator: &'a TaskCoordinator,
    progress: &'a ProgressSink,
    run_id: String,
    provider: String,
    phase: RunPhase,
    started: Duration,
    job_id: Option<String>,
}

impl<'a> RunTracker<'a> {
    fn new(coordinator: &'a TaskCoordinator, provider: &str, progress: &'a ProgressSink) -> Self {
        Self {
            coordinator,
            progress,
            run_id: Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            phase: RunPhase::Idle,
            started: coordinator.clock.now(),
            job_id: None,
        }
    }

    fn elapsed(&self) -> Duration {
        self.coordinator.clock.now().saturating_sub(self.started)
    }

    fn transition(&mut self, next: RunPhase, message: Option<String>) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal run transition {} -> {}",
            self.phase,
            next
        );
        let from = self.phase;
        self.phase = next;
        let elapsed_ms = millis(self.elapsed());
        self.record(
            "phase_changed",
            json!({
                "from": from.as_str(),
                "to": next.as_str(),
                "job_id": self.job_id,
                "message": message,
                "elapsed_ms": elapsed_ms,
            }),
        );

        let progress = if next.is_terminal() { 100 } else { 0 };
        let mut update = ProgressUpdate::phase(next, progress, elapsed_ms);
        if let Some(job_id) = &self.job_id {
            update = update.with_job_id(job_id.clone());
        }
        if let Some(message) = message {
            update = update.with_message(message);
        }
        self.progress.publish(update);
    }

    fn cancel_remote(&self, adapter: &dyn ProviderAdapter, handle: &JobHandle, reason: &str) {
        self.record(
            "cancel_requested",
            json!({"job_id": handle.provider_job_id, "reason": reason}),
        );
        if let Err(err) = adapter.cancel(handle) {
            self.record(
                "cancel_failed",
                json!({"job_id": handle.provider_job_id, "error": err.to_string()}),
            );
        }
    }

    fn finish(
        &self,
        outcome: Result<GenerationResult, GenerationError>,
    ) -> Result<GenerationResult, GenerationError> {
        let summary = match &outcome {
            Ok(result) => json!({
                "ok": result.is_success(),
                "result_urls": result.result_urls,
                "error_kind": result.error_kind.map(|kind| kind.as_str()),
                "error_message": result.error_message,
            }),
            Err(err) => json!({
                "ok": false,
                "error_kind": err.kind().as_str(),
                "error_message": err.to_string(),
            }),
        };
        let mut payload = json!({
            "phase": self.phase.as_str(),
            "job_id": self.job_id,
            "elapsed_ms": millis(self.elapsed()),
        });
        if let (Value::Object(target), Value::Object(extra)) = (&mut payload, summary) {
            target.extend(extra);
        }
        self.record("run_finished", payload);
        outcome
    }

    fn record(&self, event_type: &str, payload: Value) {
        let Value::Object(mut map) = payload else {
            return;
        };
        map.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        map.insert("provider".to_string(), Value::String(self.provider.clone()));
        let _ = self.coordinator.events.emit(event_type, map);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use alkemy_contracts::jobs::JobStatus;
    use alkemy_contracts::request::GenerationKind;
    use alkemy_contracts::result::ErrorKind;
    use serde_json::json;

    use super::*;
    use crate::adapter::ProviderKind;
    use crate::clock::ManualClock;
    use crate::test_support::{ScriptedAdapter, Step};

    fn coordinator(clock: &Arc<ManualClock>) -> TaskCoordinator {
        TaskCoordinator::new(clock.clone(), EventWriter::disabled())
    }

    fn phases(rx: &Receiver<ProgressUpdate>) -> Vec<RunPhase> {
        let mut out: Vec<RunPhase> = Vec::new();
        for update in rx.try_iter() {
            if out.last() != Some(&update.phase) {
                out.push(update.phase);
            }
        }
        out
    }

    fn one_second_polls() -> PollOptions {
        PollOptions::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    #[test]
    fn empty_prompt_is_rejected_before_submit() {
        let clock = Arc::new(ManualClock::new());
        let adapter = ScriptedAdapter::new("scripted", &[GenerationKind::Image]);
        let (progress, rx) = ProgressSink::channel();

        let err = coordinator(&clock)
            .run(
                &GenerationRequest::new(GenerationKind::Image, "   "),
                &adapter,
                RunOptions::default().with_progress(progress),
            )
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(adapter.submit_count(), 0);
        assert_eq!(adapter.fetch_count(), 0);
        assert_eq!(phases(&rx), vec![RunPhase::SubmitRejected]);
    }

    #[test]
    fn unsupported_kind_is_rejected_before_submit() {
        let clock = Arc::new(ManualClock::new());
        let adapter = ScriptedAdapter::new("images-only", &[GenerationKind::Image]);
        let err = coordinator(&clock)
            .run(
                &GenerationRequest::new(GenerationKind::Speech, "hello"),
                &adapter,
                RunOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRequest(_)));
        assert_eq!(adapter.submit_count(), 0);
    }

    #[test]
    fn image_success_returns_result_urls() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new());
        let adapter = ScriptedAdapter::new("bfl", &[GenerationKind::Image])
            .with_provider_kind(ProviderKind::Bfl)
            .with_clock(clock.clone())
            .with_steps(vec![
                Step::Status(JobStatus::pending()),
                Step::Status(JobStatus::running(None)),
                Step::Status(JobStatus::succeeded(
                    json!({"status": "Ready", "result": {"sample": "https://x/1.jpg"}}),
                )),
            ]);
        let (progress, rx) = ProgressSink::channel();

        let result = coordinator(&clock).run(
            &GenerationRequest::new(GenerationKind::Image, "a red fox"),
            &adapter,
            RunOptions::default()
                .with_poll(one_second_polls())
                .with_progress(progress),
        )?;

        assert_eq!(result.result_urls, vec!["https://x/1.jpg"]);
        assert_eq!(result.error_kind, None);
        assert_eq!(result.provider, "bfl");
        assert_eq!(result.elapsed_ms, 2000);
        assert_eq!(
            phases(&rx),
            vec![RunPhase::Submitting, RunPhase::Polling, RunPhase::Succeeded]
        );
        Ok(())
    }

    #[test]
    fn provider_failure_is_a_result_not_an_error() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new());
        let adapter = ScriptedAdapter::new("kie", &[GenerationKind::Video])
            .with_provider_kind(ProviderKind::Kie)
            .with_clock(clock.clone())
            .with_steps(vec![
                Step::Status(JobStatus::running(None)),
                Step::Status(JobStatus::failed(
                    json!({"code": 200, "msg": "content policy violation", "data": {"successFlag": 2}}),
                )),
            ]);

        let result = coordinator(&clock).run(
            &GenerationRequest::new(GenerationKind::Video, "explosion"),
            &adapter,
            RunOptions::default().with_poll(one_second_polls()),
        )?;

        assert!(result.result_urls.is_empty());
        assert_eq!(result.error_kind, Some(ErrorKind::ProviderRejected));
        assert_eq!(
            result.error_message.as_deref(),
            Some("content policy violation")
        );
        Ok(())
    }

    #[test]
    fn caller_cancel_stops_polling_and_cancels_remote_once() {
        let clock = Arc::new(ManualClock::new());
        let adapter = ScriptedAdapter::new("scripted", &[GenerationKind::Video])
            .with_clock(clock.clone())
            .with_fallback(Step::Status(JobStatus::running(None)));
        let cancel = CancellationToken::new();
        clock.cancel_at(Duration::from_millis(2000), cancel.clone());
        let (progress, rx) = ProgressSink::channel();

        let err = coordinator(&clock)
            .run(
                &GenerationRequest::new(GenerationKind::Video, "slow pan"),
                &adapter,
                RunOptions::default()
                    .with_poll(one_second_polls())
                    .with_cancel(cancel)
                    .with_progress(progress),
            )
            .unwrap_err();

        assert_eq!(err, GenerationError::Cancelled);
        assert_eq!(adapter.fetch_count(), 2);
        assert!(adapter
            .fetch_times()
            .iter()
            .all(|at| *at < Duration::from_millis(2000)));
        assert_eq!(adapter.cancel_count(), 1);
        assert_eq!(phases(&rx).last(), Some(&RunPhase::Cancelled));
    }

    #[test]
    fn timeout_reports_job_id_and_cancels_remote() {
        let clock = Arc::new(ManualClock::new());
        let adapter = ScriptedAdapter::new("scripted", &[GenerationKind::World])
            .with_clock(clock.clone())
            .with_fallback(Step::Status(JobStatus::running(Some(40))));

        let err = coordinator(&clock)
            .run(
                &GenerationRequest::new(GenerationKind::World, "mountain valley"),
                &adapter,
                RunOptions::default().with_poll(PollOptions::new(
                    Duration::from_secs(1),
                    Duration::from_secs(3),
                )),
            )
            .unwrap_err();

        match err {
            GenerationError::GenerationTimeout { job_id, waited } => {
                assert_eq!(job_id, "scripted-1");
                assert!(waited >= Duration::from_secs(3));
                assert!(waited < Duration::from_secs(4));
            }
            other => panic!("expected GenerationTimeout, got {other:?}"),
        }
        assert_eq!(adapter.cancel_count(), 1);
    }

    #[test]
    fn submit_errors_end_the_run_without_polling() {
        let clock = Arc::new(ManualClock::new());
        let adapter = ScriptedAdapter::new("scripted", &[GenerationKind::Image]).with_submit_error(
            GenerationError::RateLimited {
                message: "quota".to_string(),
                retry_after: None,
            },
        );
        let (progress, rx) = ProgressSink::channel();

        let err = coordinator(&clock)
            .run(
                &GenerationRequest::new(GenerationKind::Image, "a cat"),
                &adapter,
                RunOptions::default().with_progress(progress),
            )
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(adapter.fetch_count(), 0);
        assert_eq!(adapter.cancel_count(), 0);
        assert_eq!(
            phases(&rx),
            vec![RunPhase::Submitting, RunPhase::SubmitRejected]
        );
    }

    #[test]
    fn success_without_urls_is_logged_as_contract_violation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = temp.path().join("events.jsonl");
        let clock = Arc::new(ManualClock::new());
        let adapter = ScriptedAdapter::new("scripted", &[GenerationKind::Image])
            .with_clock(clock.clone())
            .with_steps(vec![Step::Status(JobStatus::succeeded(json!({"sample": ""})))]);

        let err = TaskCoordinator::new(clock.clone(), EventWriter::new(&log, "session-1"))
            .run(
                &GenerationRequest::new(GenerationKind::Image, "a cat"),
                &adapter,
                RunOptions::default(),
            )
            .unwrap_err();

        assert!(matches!(err, GenerationError::MalformedResponse(_)));
        let types: Vec<String> = fs::read_to_string(&log)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert!(types.contains(&"provider_contract_violation".to_string()));
        assert_eq!(types.first().map(String::as_str), Some("run_started"));
        assert_eq!(types.last().map(String::as_str), Some("run_finished"));
        Ok(())
    }

    #[test]
    fn remote_cancellation_is_reported_in_the_result() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new());
        let adapter = ScriptedAdapter::new("replicate", &[GenerationKind::Image])
            .with_provider_kind(ProviderKind::Replicate)
            .with_clock(clock.clone())
            .with_steps(vec![Step::Status(JobStatus::cancelled())]);

        let result = coordinator(&clock).run(
            &GenerationRequest::new(GenerationKind::Image, "a cat"),
            &adapter,
            RunOptions::default(),
        )?;

        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(adapter.cancel_count(), 0);
        Ok(())
    }

    #[test]
    fn spawned_runs_stream_progress_and_join() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new());
        let adapter = Arc::new(
            ScriptedAdapter::new("scripted", &[GenerationKind::Image])
                .with_clock(clock.clone())
                .with_steps(vec![
                    Step::Status(JobStatus::running(Some(30))),
                    Step::Status(JobStatus::succeeded(json!({"sample": "https://x/2.jpg"}))),
                ]),
        );

        let handle = coordinator(&clock).spawn(
            GenerationRequest::new(GenerationKind::Image, "a dog"),
            adapter,
            Some(one_second_polls()),
        );
        let result = handle.wait()?;
        assert_eq!(result.primary_url(), Some("https://x/2.jpg"));
        Ok(())
    }

    #[test]
    fn spawned_run_wakes_promptly_on_cancel() {
        let adapter = Arc::new(
            ScriptedAdapter::new("scripted", &[GenerationKind::Video])
                .with_fallback(Step::Status(JobStatus::running(None))),
        );
        let handle = TaskCoordinator::with_system_clock(EventWriter::disabled()).spawn(
            GenerationRequest::new(GenerationKind::Video, "waves"),
            adapter.clone(),
            Some(PollOptions::new(Duration::from_secs(30), Duration::from_secs(600))),
        );

        let first_poll = handle
            .progress()
            .iter()
            .find(|update| update.phase == RunPhase::Polling && update.poll_count == 1);
        assert!(first_poll.is_some());
        handle.cancel();

        assert_eq!(handle.wait(), Err(GenerationError::Cancelled));
        assert_eq!(adapter.fetch_count(), 1);
        assert_eq!(adapter.cancel_count(), 1);
    }
}
