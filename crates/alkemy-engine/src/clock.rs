#[cfg(test)]
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Cancelled,
}

/// Time source for polling. Injected so loops can be driven by a fake clock.
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    /// Blocks for `duration` unless `cancel` fires first.
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> SleepOutcome;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> SleepOutcome {
        if cancel.wait_timeout(duration) {
            SleepOutcome::Cancelled
        } else {
            SleepOutcome::Elapsed
        }
    }
}

/// Virtual clock: time only moves when something sleeps or calls `advance`.
///
/// Cancellations can be scheduled at a virtual instant with
/// [`ManualClock::cancel_at`]; a sleep spanning that instant stops there and
/// fires the token, which is how tests model "the caller aborted at t".
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ManualClock {
    now: Mutex<Duration>,
    scheduled: Mutex<Vec<(Duration, CancellationToken)>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn cancel_at(&self, at: Duration, token: CancellationToken) {
        self.scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((at, token));
    }

    fn advance_to(&self, at: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if at > *now {
            *now = at;
        }
    }

    fn take_next_due(&self, until: Duration) -> Option<(Duration, CancellationToken)> {
        let mut scheduled = self
            .scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let index = scheduled
            .iter()
            .enumerate()
            .filter(|(_, (at, _))| *at <= until)
            .min_by_key(|(_, (at, _))| *at)
            .map(|(index, _)| index)?;
        Some(scheduled.remove(index))
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> SleepOutcome {
        let target = self.now() + duration;
        loop {
            if cancel.is_cancelled() {
                return SleepOutcome::Cancelled;
            }
            match self.take_next_due(target) {
                Some((at, token)) => {
                    self.advance_to(at);
                    token.cancel();
                }
                None => {
                    self.advance_to(target);
                    return SleepOutcome::Elapsed;
                }
            }
        }
    }
}
