use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::jobs::JobHandle;
use crate::request::GenerationRequest;
use crate::result::GenerationResult;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Diagnostic record of one finished run. Receipts are written for humans and
/// tooling; nothing reads them back to resume a job.
pub fn build_receipt(
    request: &GenerationRequest,
    handle: Option<&JobHandle>,
    result: &GenerationResult,
) -> Value {
    let request_value = serde_json::to_value(request).unwrap_or(Value::Null);
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "request_hash".to_string(),
        Value::String(request_hash(&request_value)),
    );
    root.insert("request".to_string(), sanitize_payload(&request_value));
    root.insert(
        "handle".to_string(),
        handle
            .and_then(|handle| serde_json::to_value(handle).ok())
            .unwrap_or(Value::Null),
    );
    root.insert(
        "result".to_string(),
        serde_json::to_value(result).unwrap_or(Value::Null),
    );
    root.insert(
        "ts".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
    );
    Value::Object(root)
}

pub fn receipt_path(out_dir: &Path, job_id: &str) -> PathBuf {
    let safe: String = job_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    out_dir.join(format!("receipt-{safe}.json"))
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Hex sha256 of the compact JSON form. `serde_json::Map` keeps keys sorted,
/// so equal requests hash equally.
pub fn request_hash(request: &Value) -> String {
    let bytes = serde_json::to_vec(request).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                let inline_media = row
                    .as_str()
                    .map(|raw| raw.starts_with("data:"))
                    .unwrap_or(false);
                if inline_media || lowered.contains("api_key") || lowered == "token" {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}
