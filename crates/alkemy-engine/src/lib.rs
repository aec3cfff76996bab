//! Submit, poll and resolve long-running generation jobs across providers.

pub mod adapter;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
mod http;
mod media;
pub mod normalize;
pub mod poller;
pub mod progress;
pub mod providers;

#[cfg(test)]
mod test_support;

pub use adapter::{AdapterRegistry, ProviderAdapter, ProviderHealth, ProviderKind};
pub use cancel::CancellationToken;
pub use clock::{Clock, SleepOutcome, SystemClock};
pub use config::{ProviderEndpoint, ProviderSettings};
pub use coordinator::{RunHandle, RunOptions, TaskCoordinator};
pub use error::GenerationError;
pub use poller::{JobPoller, PollOptions};
pub use progress::ProgressSink;
