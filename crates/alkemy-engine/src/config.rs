use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::AdapterRegistry;
use crate::clock::Clock;
use crate::http::{build_http_client, DEFAULT_HTTP_TIMEOUT};
use crate::providers::{BflAdapter, DryrunAdapter, KieAdapter, LumaAdapter, ReplicateAdapter, TtmAdapter};

pub const DEFAULT_BFL_BASE: &str = "https://api.bfl.ml/v1";
pub const DEFAULT_KIE_BASE: &str = "https://api.kie.ai";
pub const DEFAULT_REPLICATE_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_LUMA_BASE: &str = "https://api.lumalabs.ai/dream-machine/v1";

/// Base URL plus credential for one provider. The base may point at a
/// pass-through proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub base: String,
    pub api_key: Option<String>,
}

impl ProviderEndpoint {
    pub fn new(base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base: base.into().trim().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub bfl: ProviderEndpoint,
    pub kie: ProviderEndpoint,
    pub replicate: ProviderEndpoint,
    pub luma: ProviderEndpoint,
    /// The motion service is self-hosted and keyless; `None` unless `TTM_API_URL` is set.
    pub ttm: Option<String>,
    pub http_timeout: Duration,
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let base = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let http_timeout = get("ALKEMY_HTTP_TIMEOUT")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|seconds| *seconds > 0.0)
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);

        Self {
            bfl: ProviderEndpoint::new(
                base("BFL_API_BASE", DEFAULT_BFL_BASE),
                get("BFL_API_KEY").or_else(|| get("FLUX_API_KEY")),
            ),
            kie: ProviderEndpoint::new(base("KIE_API_BASE", DEFAULT_KIE_BASE), get("KIE_API_KEY")),
            replicate: ProviderEndpoint::new(
                base("REPLICATE_API_BASE", DEFAULT_REPLICATE_BASE),
                get("REPLICATE_API_TOKEN").or_else(|| get("REPLICATE_API_KEY")),
            ),
            luma: ProviderEndpoint::new(base("LUMA_API_BASE", DEFAULT_LUMA_BASE), get("LUMA_API_KEY")),
            ttm: get("TTM_API_URL").map(|url| url.trim_end_matches('/').to_string()),
            http_timeout,
        }
    }

    /// Providers left out of the registry, with the variable that enables each.
    pub fn missing(&self) -> Vec<(&'static str, &'static str)> {
        let mut out = Vec::new();
        if !self.bfl.is_configured() {
            out.push(("bfl", "BFL_API_KEY"));
        }
        if !self.kie.is_configured() {
            out.push(("kie", "KIE_API_KEY"));
        }
        if !self.luma.is_configured() {
            out.push(("luma", "LUMA_API_KEY"));
        }
        if !self.replicate.is_configured() {
            out.push(("replicate", "REPLICATE_API_TOKEN"));
        }
        if self.ttm.is_none() {
            out.push(("ttm", "TTM_API_URL"));
        }
        out
    }

    /// Every configured provider, then `dryrun`. Registration order is the
    /// fallback order used when a request carries no provider hint.
    pub fn build_registry(&self, clock: Arc<dyn Clock>) -> AdapterRegistry {
        let http = build_http_client(self.http_timeout);
        let mut registry = AdapterRegistry::new();
        if self.bfl.is_configured() {
            registry.register(BflAdapter::new(self.bfl.clone(), http.clone()));
        }
        if self.kie.is_configured() {
            registry.register(KieAdapter::new(self.kie.clone(), http.clone()));
        }
        if self.luma.is_configured() {
            registry.register(LumaAdapter::new(self.luma.clone(), http.clone()));
        }
        if self.replicate.is_configured() {
            registry.register(ReplicateAdapter::new(self.replicate.clone(), http.clone()));
        }
        if let Some(base) = &self.ttm {
            registry.register(TtmAdapter::new(base.clone(), http));
        }
        registry.register(DryrunAdapter::new(clock));
        registry
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
