use std::time::Duration;

use alkemy_contracts::result::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// The caller's input is wrong; retrying without changes cannot help.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The provider answered with a shape we do not understand.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("polling timed out after {:.1}s", .waited.as_secs_f64())]
    PollTimeout { waited: Duration },

    /// The job may still finish remotely; the client stopped waiting.
    #[error("generation {job_id} still running after {:.1}s", .waited.as_secs_f64())]
    GenerationTimeout { job_id: String, waited: Duration },

    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            GenerationError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            GenerationError::RateLimited { .. } => ErrorKind::RateLimited,
            GenerationError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            GenerationError::PollTimeout { .. } | GenerationError::GenerationTimeout { .. } => {
                ErrorKind::Timeout
            }
            GenerationError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Failures the poller may retry in place without involving the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::ProviderUnavailable(_))
    }
}
