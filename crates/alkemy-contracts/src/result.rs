use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse failure category carried on results and used by callers to pick a
/// user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The provider finished the job and reported failure.
    ProviderRejected,
    InvalidRequest,
    ProviderUnavailable,
    RateLimited,
    MalformedResponse,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ProviderRejected => "ProviderRejected",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::MalformedResponse => "MalformedResponse",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
        }
    }

    /// Whether the same request may succeed if the caller tries again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderUnavailable | ErrorKind::RateLimited | ErrorKind::Timeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one coordinated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub result_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
    pub provider: String,
    pub job_id: String,
}

impl GenerationResult {
    /// Successful outcome. Returns `None` when `result_urls` is empty: a
    /// success without media is not representable.
    pub fn succeeded(
        result_urls: Vec<String>,
        elapsed_ms: u64,
        provider: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Option<Self> {
        if result_urls.is_empty() {
            return None;
        }
        Some(Self {
            result_urls,
            error_kind: None,
            error_message: None,
            elapsed_ms,
            provider: provider.into(),
            job_id: job_id.into(),
        })
    }

    pub fn failed(
        error_kind: ErrorKind,
        error_message: impl Into<String>,
        elapsed_ms: u64,
        provider: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            result_urls: Vec::new(),
            error_kind: Some(error_kind),
            error_message: Some(error_message.into()),
            elapsed_ms,
            provider: provider.into(),
            job_id: job_id.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_kind.is_none() && !self.result_urls.is_empty()
    }

    pub fn primary_url(&self) -> Option<&str> {
        self.result_urls.first().map(String::as_str)
    }
}
