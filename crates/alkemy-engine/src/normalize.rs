use alkemy_contracts::jobs::{JobHandle, JobState, JobStatus};
use alkemy_contracts::result::{ErrorKind, GenerationResult};
use reqwest::Url;
use serde_json::Value;

use crate::adapter::ProviderKind;
use crate::error::GenerationError;
use crate::http::{trimmed_str, truncate_text};

const FALLBACK_FAILURE: &str = "generation failed";

/// Turns a terminal job status into the caller-facing result.
///
/// A success payload without a usable URL is a provider contract violation and
/// surfaces as `MalformedResponse` instead of an empty success.
pub fn normalize(
    status: &JobStatus,
    handle: &JobHandle,
    provider: ProviderKind,
    elapsed_ms: u64,
) -> Result<GenerationResult, GenerationError> {
    let empty = Value::Null;
    let payload = status.terminal_payload.as_ref().unwrap_or(&empty);
    match status.state {
        JobState::Succeeded => {
            let urls = result_urls(payload, provider)?;
            GenerationResult::succeeded(
                urls,
                elapsed_ms,
                handle.adapter_name.clone(),
                handle.provider_job_id.clone(),
            )
            .ok_or_else(|| no_urls(provider, payload))
        }
        JobState::Failed => Ok(GenerationResult::failed(
            ErrorKind::ProviderRejected,
            failure_message(payload, provider),
            elapsed_ms,
            handle.adapter_name.clone(),
            handle.provider_job_id.clone(),
        )),
        JobState::Cancelled => Ok(GenerationResult::failed(
            ErrorKind::Cancelled,
            "cancelled by provider",
            elapsed_ms,
            handle.adapter_name.clone(),
            handle.provider_job_id.clone(),
        )),
        JobState::Pending | JobState::Running => Err(GenerationError::MalformedResponse(format!(
            "{provider} job {} is not terminal ({})",
            handle.provider_job_id,
            status.state.as_str()
        ))),
    }
}

/// Ordered, de-duplicated http(s) URLs from a provider's success payload.
pub fn result_urls(payload: &Value, provider: ProviderKind) -> Result<Vec<String>, GenerationError> {
    let mut urls = Vec::new();
    match provider {
        ProviderKind::Bfl | ProviderKind::Dryrun => {
            let sample = payload
                .get("result")
                .and_then(|result| result.get("sample"))
                .or_else(|| payload.get("sample"));
            if let Some(sample) = sample {
                collect_urls(sample, &mut urls);
            }
        }
        ProviderKind::Kie => {
            let data = payload.get("data").unwrap_or(payload);
            let raw = data
                .get("resultUrls")
                .or_else(|| data.get("response").and_then(|inner| inner.get("resultUrls")));
            match raw {
                Some(Value::String(encoded)) => {
                    let decoded: Value = serde_json::from_str(encoded).map_err(|err| {
                        GenerationError::MalformedResponse(format!(
                            "kie resultUrls is not a JSON array ({err}): {}",
                            truncate_text(encoded, 256)
                        ))
                    })?;
                    collect_urls(&decoded, &mut urls);
                }
                Some(other) => collect_urls(other, &mut urls),
                None => {}
            }
        }
        ProviderKind::Replicate => {
            if let Some(output) = payload.get("output") {
                collect_urls(output, &mut urls);
            }
        }
        ProviderKind::Luma => {
            if let Some(assets) = payload.get("assets") {
                for key in ["video", "image", "glb", "gltf"] {
                    if let Some(value) = assets.get(key) {
                        collect_urls(value, &mut urls);
                    }
                }
            }
        }
        ProviderKind::Ttm => {
            let result = payload.get("result").unwrap_or(payload);
            for key in ["videoUrl", "thumbnailUrl"] {
                if let Some(value) = result.get(key) {
                    collect_urls(value, &mut urls);
                }
            }
        }
    }
    if urls.is_empty() {
        return Err(no_urls(provider, payload));
    }
    Ok(urls)
}

/// Best human-readable reason from a failed job's payload.
pub fn failure_message(payload: &Value, provider: ProviderKind) -> String {
    let specific = match provider {
        ProviderKind::Luma => trimmed_str(payload.get("failure_reason")),
        ProviderKind::Ttm => payload
            .get("result")
            .and_then(|result| trimmed_str(result.get("error"))),
        ProviderKind::Kie => payload
            .get("data")
            .and_then(|data| trimmed_str(data.get("errorMessage")))
            .or_else(|| trimmed_str(payload.get("msg")).filter(|msg| msg != "success")),
        ProviderKind::Bfl | ProviderKind::Replicate | ProviderKind::Dryrun => None,
    };
    if let Some(message) = specific {
        return message;
    }
    if let Some(text) = payload.as_str().map(str::trim).filter(|text| !text.is_empty()) {
        return text.to_string();
    }
    for key in ["msg", "error", "failure_reason", "message", "detail"] {
        let Some(value) = payload.get(key) else {
            continue;
        };
        if let Some(text) = trimmed_str(Some(value)) {
            return text;
        }
        if let Some(text) = trimmed_str(value.get("message")) {
            return text;
        }
    }
    if let Some(text) = payload
        .get("result")
        .and_then(|result| trimmed_str(result.get("error")))
    {
        return text;
    }
    trimmed_str(payload.get("status")).unwrap_or_else(|| FALLBACK_FAILURE.to_string())
}

fn collect_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            if is_http_url(trimmed) && !out.iter().any(|existing| existing == trimmed) {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(rows) => {
            for row in rows {
                collect_urls(row, out);
            }
        }
        Value::Object(obj) => {
            for key in ["url", "urls", "output"] {
                if let Some(inner) = obj.get(key) {
                    collect_urls(inner, out);
                }
            }
        }
        _ => {}
    }
}

fn is_http_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

fn no_urls(provider: ProviderKind, payload: &Value) -> GenerationError {
    GenerationError::MalformedResponse(format!(
        "{provider} reported success without a result URL: {}",
        truncate_text(&payload.to_string(), 512)
    ))
}
