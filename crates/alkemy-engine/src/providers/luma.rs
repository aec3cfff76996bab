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
use crate::media::require_remote_url;
use crate::poller::PollOptions;

const PROVIDER: &str = "luma";
const DEFAULT_VIDEO_MODEL: &str = "ray-2";
const DEFAULT_WORLD_MODEL: &str = "genie-1.0";
const LANDSCAPE_KEYWORDS: [&str; 10] = [
    "landscape",
    "terrain",
    "environment",
    "scene",
    "world",
    "mountains",
    "forest",
    "desert",
    "city",
    "urban",
];

/// Luma Dream Machine: video clips, and 3D worlds through the genie model.
pub struct LumaAdapter {
    endpoint: ProviderEndpoint,
    http: HttpClient,
}

impl LumaAdapter {
    pub fn new(endpoint: ProviderEndpoint, http: HttpClient) -> Self {
        Self { endpoint, http }
    }
}

impl ProviderAdapter for LumaAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Luma
    }

    fn supported_kinds(&self) -> &[GenerationKind] {
        &[GenerationKind::Video, GenerationKind::World]
    }

    fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, GenerationError> {
        ensure_supported(self, request)?;
        let payload = build_payload(request)?;
        let api_key = require_api_key(PROVIDER, &self.endpoint, "LUMA_API_KEY")?;

        let response = self
            .http
            .post(format!("{}/generations", self.endpoint.base))
            .bearer_auth(api_key)
            .json(&Value::Object(payload))
            .send()
            .map_err(|err| transport_error(PROVIDER, "submit", err))?;
        let generation = response_json_or_error(PROVIDER, response)?;
        Ok(JobHandle::new(
            PROVIDER,
            required_id(PROVIDER, &generation, &["id"])?,
        ))
    }

    fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus, GenerationError> {
        let api_key = require_api_key(PROVIDER, &self.endpoint, "LUMA_API_KEY")?;
        let response = self
            .http
            .get(format!(
                "{}/generations/{}",
                self.endpoint.base, handle.provider_job_id
            ))
            .bearer_auth(api_key)
            .send()
            .map_err(|err| transport_error(PROVIDER, "poll", err))?;
        Ok(map_status(response_json_or_error(PROVIDER, response)?))
    }

    fn default_poll_options(&self, request: &GenerationRequest) -> PollOptions {
        PollOptions::new(Duration::from_secs(1), Duration::from_secs(120))
            .with_request_overrides(request)
    }
}

pub(crate) fn map_status(generation: Value) -> JobStatus {
    match status_text(&generation, "state").as_str() {
        "pending" | "queued" => JobStatus::pending(),
        "completed" => JobStatus::succeeded(generation),
        "failed" => JobStatus::failed(generation),
        _ => JobStatus::running(progress_percent(generation.get("progress"))),
    }
}

/// Frames a world prompt as a cinematic environment unless it already reads
/// like one.
pub(crate) fn enhance_world_prompt(prompt: &str) -> String {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return "Cinematic 3D environment reconstructed from the reference image, detailed terrain with atmospheric perspective".to_string();
    }
    let lowered = prompt.to_lowercase();
    if LANDSCAPE_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        format!("Cinematic 3D {prompt}, high detail, professional production quality")
    } else {
        format!("Cinematic 3D environment: {prompt}, detailed terrain with atmospheric perspective")
    }
}

pub(crate) fn build_payload(request: &GenerationRequest) -> Result<Map<String, Value>, GenerationError> {
    let is_world = request.kind == GenerationKind::World;
    let default_model = if is_world {
        DEFAULT_WORLD_MODEL
    } else {
        DEFAULT_VIDEO_MODEL
    };
    let prompt = if is_world {
        enhance_world_prompt(&request.prompt)
    } else {
        request.prompt.trim().to_string()
    };

    let mut payload = Map::new();
    payload.insert("prompt".to_string(), json!(prompt));
    payload.insert(
        "model".to_string(),
        json!(request.param_str("model").unwrap_or(default_model)),
    );
    payload.insert(
        "aspect_ratio".to_string(),
        json!(request.param_str("aspect_ratio").unwrap_or("16:9")),
    );
    if let Some(looped) = request.parameters.get("loop").and_then(Value::as_bool) {
        payload.insert("loop".to_string(), json!(looped));
    }
    if let Some(reference) = request.reference_images().first() {
        let url = require_remote_url(PROVIDER, reference)?;
        payload.insert(
            "keyframes".to_string(),
            json!({"frame0": {"type": "image", "url": url}}),
        );
    }
    Ok(payload)
}
