use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a job accepted by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub provider_job_id: String,
    pub submitted_at: DateTime<Utc>,
    pub adapter_name: String,
    /// Status URL handed back by providers that issue one (BFL, Replicate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_url: Option<String>,
}

impl JobHandle {
    pub fn new(adapter_name: impl Into<String>, provider_job_id: impl Into<String>) -> Self {
        Self {
            provider_job_id: provider_job_id.into(),
            submitted_at: Utc::now(),
            adapter_name: adapter_name.into(),
            poll_url: None,
        }
    }

    pub fn with_poll_url(mut self, poll_url: Option<String>) -> Self {
        self.poll_url = poll_url.filter(|url| !url.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One poll observation. A fresh value is produced on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub progress_hint: Option<u8>,
    /// Raw provider payload; only carried for `Succeeded` and `Failed`.
    pub terminal_payload: Option<Value>,
}

impl JobStatus {
    pub fn pending() -> Self {
        Self::in_flight(JobState::Pending, None)
    }

    pub fn running(progress_hint: Option<u8>) -> Self {
        Self::in_flight(JobState::Running, progress_hint)
    }

    pub fn succeeded(payload: Value) -> Self {
        Self {
            state: JobState::Succeeded,
            progress_hint: Some(100),
            terminal_payload: Some(payload),
        }
    }

    pub fn failed(payload: Value) -> Self {
        Self {
            state: JobState::Failed,
            progress_hint: None,
            terminal_payload: Some(payload),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            state: JobState::Cancelled,
            progress_hint: None,
            terminal_payload: None,
        }
    }

    /// Builds a non-terminal observation. Terminal states go through the
    /// dedicated constructors so the payload rule holds.
    pub fn in_flight(state: JobState, progress_hint: Option<u8>) -> Self {
        debug_assert!(!state.is_terminal(), "in_flight used for {state}");
        Self {
            state,
            progress_hint: progress_hint.map(|value| value.min(100)),
            terminal_payload: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn only_success_and_failure_carry_payload() {
        assert!(JobStatus::pending().terminal_payload.is_none());
        assert!(JobStatus::running(Some(40)).terminal_payload.is_none());
        assert!(JobStatus::cancelled().terminal_payload.is_none());
        assert!(JobStatus::succeeded(json!({"sample": "https://x/1.jpg"}))
            .terminal_payload
            .is_some());
        assert!(JobStatus::failed(json!({"msg": "nope"}))
            .terminal_payload
            .is_some());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn progress_hint_is_capped() {
        assert_eq!(JobStatus::running(Some(250)).progress_hint, Some(100));
    }

    #[test]
    fn handle_drops_blank_poll_url() {
        let handle = JobHandle::new("bfl", "abc").with_poll_url(Some("  ".to_string()));
        assert_eq!(handle.poll_url, None);
        assert_eq!(handle.adapter_name, "bfl");
    }
}
