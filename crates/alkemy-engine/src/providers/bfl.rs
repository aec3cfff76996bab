use std::time::Duration;

use alkemy_contracts::jobs::{JobHandle, JobStatus};
use alkemy_contracts::request::{GenerationKind, GenerationRequest};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{progress_percent, require_api_key, required_id, status_text};
use crate::adapter::{ensure_supported, ProviderAdapter, ProviderKind};
use crate::config::ProviderEndpoint;
use crate::error::GenerationError;
use crate::http::{response_json_or_error, transport_error};
use crate::media::as_url_or_data_url;
use crate::poller::PollOptions;

const PROVIDER: &str = "bfl";
const DEFAULT_MODEL: &str = "flux-pro-1.1";
const DEFAULT_ASPECT_RATIO: &str = "16:9";
const DIMENSION_STEP: u32 = 32;
const MIN_DIMENSION: u32 = 256;
const MAX_DIMENSION: u32 = 1440;

const DEFAULT_DIMENSIONS: (u32, u32) = (1344, 768);
const ASPECT_DIMENSIONS: [(&str, u32, u32); 7] = [
    ("1:1", 1024, 1024),
    ("16:9", 1344, 768),
    ("9:16", 768, 1344),
    ("4:3", 1152, 896),
    ("3:4", 896, 1152),
    ("21:9", 1536, 640),
    ("9:21", 640, 1536),
];

/// Black Forest Labs FLUX image generation.
pub struct BflAdapter {
    endpoint: ProviderEndpoint,
    http: HttpClient,
}

impl BflAdapter {
    pub fn new(endpoint: ProviderEndpoint, http: HttpClient) -> Self {
        Self { endpoint, http }
    }

    fn model(request: &GenerationRequest) -> String {
        request
            .param_str("model")
            .unwrap_or(DEFAULT_MODEL)
            .trim_start_matches('/')
            .to_string()
    }
}

impl ProviderAdapter for BflAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Bfl
    }

    fn supported_kinds(&self) -> &[GenerationKind] {
        &[GenerationKind::Image]
    }

    fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, GenerationError> {
        ensure_supported(self, request)?;
        let payload = build_payload(request)?;
        let api_key = require_api_key(PROVIDER, &self.endpoint, "BFL_API_KEY")?;

        let endpoint = format!("{}/{}", self.endpoint.base, Self::model(request));
        let response = self
            .http
            .post(&endpoint)
            .header("x-key", api_key)
            .json(&Value::Object(payload))
            .send()
            .map_err(|err| transport_error(PROVIDER, "submit", err))?;
        let created = response_json_or_error(PROVIDER, response)?;
        let id = required_id(PROVIDER, &created, &["id"])?;
        let poll_url = created
            .get("polling_url")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(JobHandle::new(PROVIDER, id).with_poll_url(poll_url))
    }

    fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus, GenerationError> {
        let api_key = require_api_key(PROVIDER, &self.endpoint, "BFL_API_KEY")?;
        let builder = match handle.poll_url.as_deref() {
            Some(url) => self.http.get(url),
            None => self
                .http
                .get(format!("{}/get_result", self.endpoint.base))
                .query(&[("id", handle.provider_job_id.as_str())]),
        };
        let response = builder
            .header("x-key", api_key)
            .send()
            .map_err(|err| transport_error(PROVIDER, "poll", err))?;
        let payload = response_json_or_error(PROVIDER, response)?;
        Ok(map_status(payload))
    }

    fn default_poll_options(&self, request: &GenerationRequest) -> PollOptions {
        PollOptions::new(Duration::from_secs(1), Duration::from_secs(60))
            .with_request_overrides(request)
    }
}

pub(crate) fn map_status(payload: Value) -> JobStatus {
    match status_text(&payload, "status").as_str() {
        "pending" => JobStatus::pending(),
        "ready" => JobStatus::succeeded(payload),
        "error" | "failed" | "request moderated" | "content moderated" | "task not found" => {
            JobStatus::failed(payload)
        }
        _ => JobStatus::running(progress_percent(payload.get("progress"))),
    }
}

pub(crate) fn dimensions_for(aspect_ratio: Option<&str>) -> (u32, u32) {
    let wanted = aspect_ratio.unwrap_or(DEFAULT_ASPECT_RATIO).trim();
    ASPECT_DIMENSIONS
        .iter()
        .find(|(ratio, _, _)| *ratio == wanted)
        .map(|(_, width, height)| (*width, *height))
        .unwrap_or(DEFAULT_DIMENSIONS)
}

pub(crate) fn build_payload(request: &GenerationRequest) -> Result<Map<String, Value>, GenerationError> {
    let (mut width, mut height) = dimensions_for(request.param_str("aspect_ratio"));
    if let Some(explicit) = request.param_i64("width") {
        width = checked_dimension("width", explicit)?;
    }
    if let Some(explicit) = request.param_i64("height") {
        height = checked_dimension("height", explicit)?;
    }
    let safety_tolerance = request.param_i64("safety_tolerance").unwrap_or(2);
    if !(0..=6).contains(&safety_tolerance) {
        return Err(GenerationError::InvalidRequest(format!(
            "bfl safety_tolerance must be between 0 and 6, got {safety_tolerance}"
        )));
    }
    let output_format = match request.param_str("output_format").unwrap_or("jpeg") {
        "jpg" | "jpeg" => "jpeg",
        "png" => "png",
        other => {
            return Err(GenerationError::InvalidRequest(format!(
                "bfl output_format must be jpeg or png, got {other}"
            )))
        }
    };

    let prompt_upsampling = request
        .parameters
        .get("prompt_upsampling")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut payload = Map::new();
    payload.insert("prompt".to_string(), json!(request.prompt.trim()));
    payload.insert("width".to_string(), json!(width));
    payload.insert("height".to_string(), json!(height));
    payload.insert("prompt_upsampling".to_string(), json!(prompt_upsampling));
    payload.insert("safety_tolerance".to_string(), json!(safety_tolerance));
    payload.insert("output_format".to_string(), json!(output_format));
    if let Some(seed) = request.param_i64("seed") {
        payload.insert("seed".to_string(), json!(seed));
    }
    if let Some(reference) = request.reference_images().first() {
        payload.insert(
            "image_prompt".to_string(),
            Value::String(as_url_or_data_url(reference)?),
        );
    }
    Ok(payload)
}

fn checked_dimension(label: &str, value: i64) -> Result<u32, GenerationError> {
    let valid = u32::try_from(value)
        .ok()
        .filter(|value| (MIN_DIMENSION..=MAX_DIMENSION).contains(value))
        .filter(|value| value % DIMENSION_STEP == 0);
    valid.ok_or_else(|| {
        GenerationError::InvalidRequest(format!(
            "bfl {label} must be a multiple of {DIMENSION_STEP} between {MIN_DIMENSION} and {MAX_DIMENSION}, got {value}"
        ))
    })
}
