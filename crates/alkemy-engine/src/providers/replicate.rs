use std::time::Duration;

use alkemy_contracts::jobs::{JobHandle, JobStatus};
use alkemy_contracts::request::{GenerationKind, GenerationRequest};
use reqwest::blocking::Client as HttpClient;
use serde_json::{Map, Value};

use super::{require_api_key, required_id, status_text};
use crate::adapter::{ensure_supported, ProviderAdapter, ProviderKind};
use crate::config::ProviderEndpoint;
use crate::error::GenerationError;
use crate::http::{response_json_or_error, transport_error, trimmed_str};
use crate::media::as_url_or_data_url;
use crate::poller::PollOptions;

const PROVIDER: &str = "replicate";
const DEFAULT_WORLD_MODEL: &str = "baaivision/emu3-gen";
const RESERVED_PARAMS: [&str; 8] = [
    "model",
    "version",
    "poll_interval",
    "poll_timeout",
    "image_url",
    "image_urls",
    "reference_images",
    "replicate_model",
];

/// Replicate predictions API; the model is picked per request.
pub struct ReplicateAdapter {
    endpoint: ProviderEndpoint,
    http: HttpClient,
}

impl ReplicateAdapter {
    pub fn new(endpoint: ProviderEndpoint, http: HttpClient) -> Self {
        Self { endpoint, http }
    }

    fn predictions_endpoint(&self) -> String {
        format!("{}/predictions", self.endpoint.base)
    }
}

impl ProviderAdapter for ReplicateAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Replicate
    }

    fn supported_kinds(&self) -> &[GenerationKind] {
        &GenerationKind::ALL
    }

    fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, GenerationError> {
        ensure_supported(self, request)?;
        let payload = build_payload(request)?;
        let api_key = require_api_key(PROVIDER, &self.endpoint, "REPLICATE_API_TOKEN")?;

        let response = self
            .http
            .post(self.predictions_endpoint())
            .bearer_auth(api_key)
            .json(&Value::Object(payload))
            .send()
            .map_err(|err| transport_error(PROVIDER, "submit", err))?;
        let prediction = response_json_or_error(PROVIDER, response)?;
        let id = required_id(PROVIDER, &prediction, &["id"])?;
        let poll_url = prediction
            .get("urls")
            .and_then(|urls| trimmed_str(urls.get("get")));
        Ok(JobHandle::new(PROVIDER, id).with_poll_url(poll_url))
    }

    fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus, GenerationError> {
        let api_key = require_api_key(PROVIDER, &self.endpoint, "REPLICATE_API_TOKEN")?;
        let url = handle.poll_url.clone().unwrap_or_else(|| {
            format!("{}/{}", self.predictions_endpoint(), handle.provider_job_id)
        });
        let response = self
            .http
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .map_err(|err| transport_error(PROVIDER, "poll", err))?;
        let prediction = response_json_or_error(PROVIDER, response)?;
        Ok(map_status(prediction))
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), GenerationError> {
        let api_key = require_api_key(PROVIDER, &self.endpoint, "REPLICATE_API_TOKEN")?;
        let url = format!(
            "{}/{}/cancel",
            self.predictions_endpoint(),
            handle.provider_job_id
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .send()
            .map_err(|err| transport_error(PROVIDER, "cancel", err))?;
        response_json_or_error(PROVIDER, response).map(|_| ())
    }

    fn default_poll_options(&self, request: &GenerationRequest) -> PollOptions {
        PollOptions::new(Duration::from_secs(1), Duration::from_secs(120))
            .with_request_overrides(request)
    }
}

pub(crate) fn map_status(prediction: Value) -> JobStatus {
    match status_text(&prediction, "status").as_str() {
        "starting" => JobStatus::pending(),
        "succeeded" => JobStatus::succeeded(prediction),
        "failed" => JobStatus::failed(prediction),
        "canceled" | "cancelled" => JobStatus::cancelled(),
        _ => JobStatus::running(None),
    }
}

/// `{version|model, input}`. Request parameters pass through as model input
/// except the ones consumed here.
pub(crate) fn build_payload(request: &GenerationRequest) -> Result<Map<String, Value>, GenerationError> {
    let version = request.param_str("version");
    let model = request
        .param_str("replicate_model")
        .or_else(|| request.param_str("model"))
        .or((request.kind == GenerationKind::World).then_some(DEFAULT_WORLD_MODEL));

    let mut input = Map::new();
    if !request.prompt.trim().is_empty() {
        input.insert(
            "prompt".to_string(),
            Value::String(request.prompt.trim().to_string()),
        );
    }
    if let Some(reference) = request.reference_images().first() {
        input.insert(
            "image".to_string(),
            Value::String(as_url_or_data_url(reference)?),
        );
    }
    for (key, value) in &request.parameters {
        if RESERVED_PARAMS.contains(&key.as_str()) || input.contains_key(key) {
            continue;
        }
        input.insert(key.clone(), value.clone());
    }

    let mut payload = Map::new();
    match (version, model) {
        (Some(version), _) => {
            payload.insert("version".to_string(), Value::String(version.to_string()));
        }
        (None, Some(model)) => {
            payload.insert("model".to_string(), Value::String(model.to_string()));
        }
        (None, None) => {
            return Err(GenerationError::InvalidRequest(format!(
                "replicate {} generation needs a model or version parameter",
                request.kind
            )))
        }
    }
    payload.insert("input".to_string(), Value::Object(input));
    Ok(payload)
}
