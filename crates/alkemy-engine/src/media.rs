use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;

use crate::error::GenerationError;
use crate::http::transport_error;

/// Where a reference image named in request parameters lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MediaSource {
    Url(String),
    DataUrl(String),
    Path(PathBuf),
}

impl MediaSource {
    pub(crate) fn classify(raw: &str) -> Result<Self, GenerationError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(GenerationError::InvalidRequest(
                "reference image value is empty".to_string(),
            ));
        }
        let lowered = value.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            return Ok(MediaSource::Url(value.to_string()));
        }
        if lowered.starts_with("data:") {
            return Ok(MediaSource::DataUrl(value.to_string()));
        }
        let path = PathBuf::from(value);
        if path.is_file() {
            return Ok(MediaSource::Path(path));
        }
        Err(GenerationError::InvalidRequest(format!(
            "reference image {value} is neither a URL nor a readable file"
        )))
    }
}

/// Remote URL or data URL suitable for providers that accept either.
pub(crate) fn as_url_or_data_url(raw: &str) -> Result<String, GenerationError> {
    match MediaSource::classify(raw)? {
        MediaSource::Url(url) | MediaSource::DataUrl(url) => Ok(url),
        MediaSource::Path(path) => path_to_data_url(&path),
    }
}

/// Only publicly reachable URLs; for providers that fetch media themselves.
pub(crate) fn require_remote_url(provider: &str, raw: &str) -> Result<String, GenerationError> {
    match MediaSource::classify(raw)? {
        MediaSource::Url(url) => Ok(url),
        _ => Err(GenerationError::InvalidRequest(format!(
            "{provider} only accepts http(s) reference image URLs, got {}",
            raw.trim()
        ))),
    }
}

pub(crate) struct MediaBytes {
    pub(crate) bytes: Vec<u8>,
    pub(crate) file_name: String,
    pub(crate) mime_type: String,
}

/// Materializes a reference image for multipart upload.
pub(crate) fn load_media_bytes(
    provider: &str,
    http: &HttpClient,
    raw: &str,
) -> Result<MediaBytes, GenerationError> {
    match MediaSource::classify(raw)? {
        MediaSource::Path(path) => {
            let bytes = fs::read(&path).map_err(|err| {
                GenerationError::InvalidRequest(format!("failed reading {}: {err}", path.display()))
            })?;
            Ok(MediaBytes {
                bytes,
                file_name: path
                    .file_name()
                    .and_then(|value| value.to_str())
                    .unwrap_or("input.jpg")
                    .to_string(),
                mime_type: mime_for_path(&path).unwrap_or("image/jpeg").to_string(),
            })
        }
        MediaSource::DataUrl(data_url) => {
            let (mime_type, payload) = split_data_url(&data_url)?;
            let bytes = BASE64.decode(payload).map_err(|err| {
                GenerationError::InvalidRequest(format!("reference data URL is not base64: {err}"))
            })?;
            Ok(MediaBytes {
                bytes,
                file_name: "input.jpg".to_string(),
                mime_type,
            })
        }
        MediaSource::Url(url) => {
            let response = http
                .get(&url)
                .send()
                .map_err(|err| transport_error(provider, "reference download", err))?;
            if !response.status().is_success() {
                return Err(GenerationError::InvalidRequest(format!(
                    "reference image {url} could not be fetched ({})",
                    response.status().as_u16()
                )));
            }
            let mime_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("image/jpeg")
                .to_string();
            let bytes = response
                .bytes()
                .map_err(|err| transport_error(provider, "reference download", err))?
                .to_vec();
            Ok(MediaBytes {
                bytes,
                file_name: "input.jpg".to_string(),
                mime_type,
            })
        }
    }
}

fn path_to_data_url(path: &Path) -> Result<String, GenerationError> {
    let bytes = fs::read(path).map_err(|err| {
        GenerationError::InvalidRequest(format!("failed reading {}: {err}", path.display()))
    })?;
    let mime = mime_for_path(path).unwrap_or("image/png");
    Ok(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
}

fn split_data_url(data_url: &str) -> Result<(String, &str), GenerationError> {
    let rest = &data_url["data:".len()..];
    let Some((meta, payload)) = rest.split_once(',') else {
        return Err(GenerationError::InvalidRequest(
            "reference data URL has no payload".to_string(),
        ));
    };
    let Some(mime) = meta.strip_suffix(";base64") else {
        return Err(GenerationError::InvalidRequest(
            "reference data URL must be base64 encoded".to_string(),
        ));
    };
    let mime = if mime.is_empty() { "image/jpeg" } else { mime };
    Ok((mime.to_string(), payload))
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
