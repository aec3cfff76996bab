use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;

use crate::error::GenerationError;

pub(crate) const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_http_client(timeout: Duration) -> HttpClient {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Reads a provider response and maps HTTP failures onto the error taxonomy.
pub(crate) fn response_json_or_error(
    provider: &str,
    response: HttpResponse,
) -> Result<Value, GenerationError> {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response
        .text()
        .map_err(|err| transport_error(provider, "response body read", err))?;
    if !status.is_success() {
        return Err(classify_status(provider, status.as_u16(), &body, retry_after));
    }
    parse_json_body(provider, &body)
}

pub(crate) fn parse_json_body(provider: &str, body: &str) -> Result<Value, GenerationError> {
    serde_json::from_str(body).map_err(|err| {
        GenerationError::MalformedResponse(format!(
            "{provider} returned invalid JSON ({err}): {}",
            truncate_text(body, 512)
        ))
    })
}

pub(crate) fn classify_status(
    provider: &str,
    code: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> GenerationError {
    match code {
        429 => GenerationError::RateLimited {
            message: format!("{provider} request throttled ({code}): {body}"),
            retry_after,
        },
        400..=499 => {
            GenerationError::InvalidRequest(format!("{provider} rejected request ({code}): {body}"))
        }
        _ => GenerationError::ProviderUnavailable(format!(
            "{provider} request failed ({code}): {}",
            truncate_text(body, 512)
        )),
    }
}

pub(crate) fn transport_error(provider: &str, action: &str, err: reqwest::Error) -> GenerationError {
    let reason = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "transport error"
    };
    GenerationError::ProviderUnavailable(format!("{provider} {action} {reason}: {err}"))
}

pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn trimmed_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
