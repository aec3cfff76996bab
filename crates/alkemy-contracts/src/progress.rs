use std::fmt;

use serde::{Deserialize, Serialize};

use crate::jobs::JobState;

/// Lifecycle of a single coordinated run.
///
/// ```text
/// Idle -> Submitting -> Polling -> {Succeeded, Failed, TimedOut, Cancelled}
///                    \-> SubmitRejected
/// ```
/// Cancellation is also accepted while submitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Submitting,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    SubmitRejected,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Succeeded
                | RunPhase::Failed
                | RunPhase::TimedOut
                | RunPhase::SubmitRejected
                | RunPhase::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (RunPhase::Idle, RunPhase::Submitting)
                | (RunPhase::Idle, RunPhase::SubmitRejected)
                | (RunPhase::Submitting, RunPhase::Polling)
                | (RunPhase::Submitting, RunPhase::SubmitRejected)
                | (RunPhase::Submitting, RunPhase::Cancelled)
                | (RunPhase::Polling, RunPhase::Succeeded)
                | (RunPhase::Polling, RunPhase::Failed)
                | (RunPhase::Polling, RunPhase::TimedOut)
                | (RunPhase::Polling, RunPhase::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Submitting => "submitting",
            RunPhase::Polling => "polling",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Failed => "failed",
            RunPhase::TimedOut => "timed_out",
            RunPhase::SubmitRejected => "submit_rejected",
            RunPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published on the progress channel after every phase change and poll tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub phase: RunPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    pub progress: u8,
    pub elapsed_ms: u64,
    pub poll_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn phase(phase: RunPhase, progress: u8, elapsed_ms: u64) -> Self {
        Self {
            phase,
            state: None,
            progress: progress.min(100),
            elapsed_ms,
            poll_count: 0,
            job_id: None,
            message: None,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
