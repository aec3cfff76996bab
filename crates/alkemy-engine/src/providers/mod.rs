//! Concrete adapters, one per remote provider, plus the in-process `dryrun`.

mod bfl;
mod dryrun;
mod kie;
mod luma;
mod replicate;
mod ttm;

pub use bfl::BflAdapter;
pub use dryrun::DryrunAdapter;
pub use kie::KieAdapter;
pub use luma::LumaAdapter;
pub use replicate::ReplicateAdapter;
pub use ttm::TtmAdapter;

use serde_json::Value;

use crate::config::ProviderEndpoint;
use crate::error::GenerationError;
use crate::http::trimmed_str;

pub(crate) fn require_api_key<'a>(
    provider: &str,
    endpoint: &'a ProviderEndpoint,
    env_key: &str,
) -> Result<&'a str, GenerationError> {
    endpoint.api_key.as_deref().ok_or_else(|| {
        GenerationError::ProviderUnavailable(format!("{provider} not configured: {env_key} not set"))
    })
}

/// Job identifier from a create response, looked up under `keys` in order.
pub(crate) fn required_id(
    provider: &str,
    payload: &Value,
    keys: &[&str],
) -> Result<String, GenerationError> {
    keys.iter()
        .find_map(|key| trimmed_str(payload.get(*key)))
        .ok_or_else(|| {
            GenerationError::MalformedResponse(format!(
                "{provider} create response has no {}: {payload}",
                keys.join("/")
            ))
        })
}

/// Lower-cased status string at `key`, empty when absent.
pub(crate) fn status_text(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Provider progress reported either as a 0..1 fraction or a percentage.
pub(crate) fn progress_percent(value: Option<&Value>) -> Option<u8> {
    let raw = value.and_then(Value::as_f64)?;
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let percent = if raw <= 1.0 { raw * 100.0 } else { raw };
    Some(percent.round().min(100.0) as u8)
}
