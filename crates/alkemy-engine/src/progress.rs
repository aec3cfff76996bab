use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

use alkemy_contracts::jobs::JobStatus;
use alkemy_contracts::progress::ProgressUpdate;

/// Sending half of a run's progress channel. Updates are dropped silently
/// once the receiver goes away; progress is informational only.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<Sender<ProgressUpdate>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, Receiver<ProgressUpdate>) {
        let (tx, rx) = channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_sender(tx: Sender<ProgressUpdate>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn publish(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(update);
        }
    }
}

/// Synthetic ceiling for in-flight progress; only a terminal state reaches 100.
pub(crate) const IN_FLIGHT_CEILING: u8 = 90;

/// Percentage shown for a poll observation. Native provider progress wins
/// (held below 100 until terminal); otherwise elapsed time over the budget,
/// scaled into `[0, 90]`.
pub(crate) fn progress_hint(status: &JobStatus, elapsed: Duration, max_wait: Duration) -> u8 {
    if status.is_terminal() {
        return 100;
    }
    if let Some(native) = status.progress_hint {
        return native.min(99);
    }
    if max_wait.is_zero() {
        return IN_FLIGHT_CEILING;
    }
    let ratio = elapsed.as_secs_f64() / max_wait.as_secs_f64();
    (ratio * f64::from(IN_FLIGHT_CEILING)).clamp(0.0, f64::from(IN_FLIGHT_CEILING)) as u8
}
