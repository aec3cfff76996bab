use std::fmt;
use std::sync::Arc;

use alkemy_contracts::jobs::{JobHandle, JobStatus};
use alkemy_contracts::request::{GenerationKind, GenerationRequest};
use indexmap::IndexMap;

use crate::error::GenerationError;
use crate::poller::PollOptions;

/// Tag used to pick provider-specific payload handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Bfl,
    Kie,
    Replicate,
    Luma,
    Ttm,
    Dryrun,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Bfl => "bfl",
            ProviderKind::Kie => "kie",
            ProviderKind::Replicate => "replicate",
            ProviderKind::Luma => "luma",
            ProviderKind::Ttm => "ttm",
            ProviderKind::Dryrun => "dryrun",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderHealth {
    Ready,
    /// Reachable but not able to serve yet (e.g. model still loading).
    Degraded(String),
    Unavailable(String),
    NotConfigured(String),
}

impl ProviderHealth {
    pub fn is_usable(&self) -> bool {
        matches!(self, ProviderHealth::Ready | ProviderHealth::Degraded(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProviderHealth::Ready => "ready",
            ProviderHealth::Degraded(_) => "degraded",
            ProviderHealth::Unavailable(_) => "unavailable",
            ProviderHealth::NotConfigured(_) => "not_configured",
        }
    }
}

/// Submit/poll/cancel surface of one remote generation provider.
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn supported_kinds(&self) -> &[GenerationKind];

    /// Issues the provider's create call. Implementations validate provider
    /// requirements first and fail with `InvalidRequest` before any I/O.
    fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, GenerationError>;

    /// Reads the current job state. Must be safe to call repeatedly.
    fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus, GenerationError>;

    /// Advisory: providers without a cancel endpoint accept and ignore it.
    fn cancel(&self, _handle: &JobHandle) -> Result<(), GenerationError> {
        Ok(())
    }

    fn health(&self) -> ProviderHealth {
        ProviderHealth::Ready
    }

    fn default_poll_options(&self, request: &GenerationRequest) -> PollOptions {
        PollOptions::default().with_request_overrides(request)
    }

    fn supports(&self, kind: GenerationKind) -> bool {
        self.supported_kinds().contains(&kind)
    }
}

pub(crate) fn ensure_supported(
    adapter: &dyn ProviderAdapter,
    request: &GenerationRequest,
) -> Result<(), GenerationError> {
    if adapter.supports(request.kind) {
        return Ok(());
    }
    Err(GenerationError::InvalidRequest(format!(
        "provider {} does not generate {}",
        adapter.name(),
        request.kind
    )))
}

/// Adapters in registration order, keyed by name.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: IndexMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: ProviderAdapter + 'static>(&mut self, adapter: A) {
        self.register_shared(Arc::new(adapter));
    }

    pub fn register_shared(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.adapters.values()
    }

    /// Honours `provider_hint`; otherwise the first registered adapter that
    /// generates the requested kind.
    pub fn resolve(
        &self,
        request: &GenerationRequest,
    ) -> Result<Arc<dyn ProviderAdapter>, GenerationError> {
        if let Some(hint) = request.provider_hint.as_deref() {
            return self.get(hint).ok_or_else(|| {
                GenerationError::InvalidRequest(format!(
                    "unknown provider {hint}; registered: {}",
                    self.names().join(", ")
                ))
            });
        }
        self.adapters
            .values()
            .find(|adapter| adapter.supports(request.kind))
            .cloned()
            .ok_or_else(|| {
                GenerationError::InvalidRequest(format!(
                    "no registered provider generates {}",
                    request.kind
                ))
            })
    }
}
