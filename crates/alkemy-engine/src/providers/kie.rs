use std::time::Duration;

use alkemy_contracts::jobs::{JobHandle, JobStatus};
use alkemy_contracts::request::{GenerationKind, GenerationRequest};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{require_api_key, required_id};
use crate::adapter::{ensure_supported, ProviderAdapter, ProviderKind};
use crate::config::ProviderEndpoint;
use crate::error::GenerationError;
use crate::http::{classify_status, response_json_or_error, transport_error, trimmed_str};
use crate::media::require_remote_url;
use crate::poller::PollOptions;

const PROVIDER: &str = "kie";
const DEFAULT_MODEL: &str = "veo3_fast";
const MODELS: [&str; 2] = ["veo3", "veo3_fast"];
const ASPECT_RATIOS: [&str; 3] = ["16:9", "9:16", "Auto"];
const TEXT_TO_VIDEO: &str = "TEXT_2_VIDEO";
const FRAMES_TO_VIDEO: &str = "FIRST_AND_LAST_FRAMES_2_VIDEO";
const REFERENCE_TO_VIDEO: &str = "REFERENCE_2_VIDEO";

/// Kie.ai hosted Veo video generation. Every response is wrapped in a
/// `{code, msg, data}` envelope whose `code` carries the real outcome.
pub struct KieAdapter {
    endpoint: ProviderEndpoint,
    http: HttpClient,
}

impl KieAdapter {
    pub fn new(endpoint: ProviderEndpoint, http: HttpClient) -> Self {
        Self { endpoint, http }
    }
}

impl ProviderAdapter for KieAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Kie
    }

    fn supported_kinds(&self) -> &[GenerationKind] {
        &[GenerationKind::Video]
    }

    fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, GenerationError> {
        ensure_supported(self, request)?;
        let payload = build_payload(request)?;
        let api_key = require_api_key(PROVIDER, &self.endpoint, "KIE_API_KEY")?;

        let response = self
            .http
            .post(format!("{}/api/v1/veo/generate", self.endpoint.base))
            .bearer_auth(api_key)
            .json(&Value::Object(payload))
            .send()
            .map_err(|err| transport_error(PROVIDER, "submit", err))?;
        let envelope = unwrap_envelope(response_json_or_error(PROVIDER, response)?)?;
        let data = envelope.get("data").cloned().unwrap_or(Value::Null);
        let task_id = required_id(PROVIDER, &data, &["taskId"])?;
        Ok(JobHandle::new(PROVIDER, task_id))
    }

    fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus, GenerationError> {
        let api_key = require_api_key(PROVIDER, &self.endpoint, "KIE_API_KEY")?;
        let response = self
            .http
            .get(format!("{}/api/v1/veo/record-info", self.endpoint.base))
            .query(&[("taskId", handle.provider_job_id.as_str())])
            .bearer_auth(api_key)
            .send()
            .map_err(|err| transport_error(PROVIDER, "poll", err))?;
        let envelope = unwrap_envelope(response_json_or_error(PROVIDER, response)?)?;
        map_status(envelope)
    }

    fn default_poll_options(&self, request: &GenerationRequest) -> PollOptions {
        PollOptions::new(Duration::from_secs(30), Duration::from_secs(600))
            .with_request_overrides(request)
    }
}

/// A `code` other than 200 is the provider's HTTP-equivalent failure.
pub(crate) fn unwrap_envelope(envelope: Value) -> Result<Value, GenerationError> {
    let code = envelope.get("code").and_then(Value::as_u64);
    match code {
        Some(200) => Ok(envelope),
        Some(code) => {
            let message =
                trimmed_str(envelope.get("msg")).unwrap_or_else(|| "unknown error".to_string());
            let code = u16::try_from(code).unwrap_or(500);
            Err(classify_status(PROVIDER, code, &message, None))
        }
        None => Err(GenerationError::MalformedResponse(format!(
            "kie response has no envelope code: {envelope}"
        ))),
    }
}

pub(crate) fn map_status(envelope: Value) -> Result<JobStatus, GenerationError> {
    let Some(data) = envelope.get("data").filter(|data| data.is_object()) else {
        return Err(GenerationError::MalformedResponse(format!(
            "kie status has no data: {envelope}"
        )));
    };
    match data.get("successFlag").and_then(Value::as_i64) {
        Some(0) => Ok(JobStatus::running(None)),
        // The URLs can land a poll after the flag flips.
        Some(1) if has_result_urls(data) => Ok(JobStatus::succeeded(envelope)),
        Some(1) => Ok(JobStatus::running(Some(99))),
        Some(2) | Some(3) => Ok(JobStatus::failed(envelope)),
        other => Err(GenerationError::MalformedResponse(format!(
            "kie successFlag {other:?} is not recognised"
        ))),
    }
}

fn has_result_urls(data: &Value) -> bool {
    let raw = data
        .get("resultUrls")
        .or_else(|| data.get("response").and_then(|inner| inner.get("resultUrls")));
    match raw {
        Some(Value::String(encoded)) => !encoded.trim().is_empty(),
        Some(Value::Array(rows)) => !rows.is_empty(),
        _ => false,
    }
}

pub(crate) fn build_payload(request: &GenerationRequest) -> Result<Map<String, Value>, GenerationError> {
    let model = request.param_str("model").unwrap_or(DEFAULT_MODEL);
    if !MODELS.contains(&model) {
        return Err(GenerationError::InvalidRequest(format!(
            "kie model must be one of {}, got {model}",
            MODELS.join(", ")
        )));
    }
    let aspect_ratio = request.param_str("aspect_ratio").unwrap_or("16:9");
    if !ASPECT_RATIOS.contains(&aspect_ratio) {
        return Err(GenerationError::InvalidRequest(format!(
            "kie aspect_ratio must be one of {}, got {aspect_ratio}",
            ASPECT_RATIOS.join(", ")
        )));
    }
    let image_urls = request
        .reference_images()
        .iter()
        .map(|raw| require_remote_url(PROVIDER, raw))
        .collect::<Result<Vec<_>, _>>()?;
    let generation_type = request.param_str("generation_type");
    match generation_type {
        None | Some(TEXT_TO_VIDEO) => {}
        Some(FRAMES_TO_VIDEO) | Some(REFERENCE_TO_VIDEO) if image_urls.is_empty() => {
            return Err(GenerationError::InvalidRequest(format!(
                "kie {} requires at least one image URL",
                generation_type.unwrap_or_default()
            )));
        }
        Some(FRAMES_TO_VIDEO) | Some(REFERENCE_TO_VIDEO) => {}
        Some(other) => {
            return Err(GenerationError::InvalidRequest(format!(
                "kie generation_type {other} is not supported"
            )))
        }
    }

    let mut payload = Map::new();
    payload.insert("prompt".to_string(), json!(request.prompt.trim()));
    payload.insert("model".to_string(), json!(model));
    payload.insert("aspectRatio".to_string(), json!(aspect_ratio));
    payload.insert(
        "enableTranslation".to_string(),
        json!(request
            .parameters
            .get("enable_translation")
            .and_then(Value::as_bool)
            .unwrap_or(true)),
    );
    if !image_urls.is_empty() {
        payload.insert("imageUrls".to_string(), json!(image_urls));
    }
    if let Some(generation_type) = generation_type {
        payload.insert("generationType".to_string(), json!(generation_type));
    }
    if let Some(seed) = request.param_i64("seed") {
        payload.insert("seeds".to_string(), json!(seed));
    }
    if let Some(watermark) = request.param_str("watermark") {
        payload.insert("watermark".to_string(), json!(watermark));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use alkemy_contracts::jobs::JobState;

    use super::*;
    use crate::test_support::{test_http, MockServer};

    #[test]
    fn success_flag_vocabulary() -> anyhow::Result<()> {
        let status = |data: Value| map_status(json!({"code": 200, "msg": "success", "data": data}));
        assert_eq!(status(json!({"successFlag": 0}))?.state, JobState::Running);
        assert_eq!(
            status(json!({"successFlag": 1, "resultUrls": "[\"https://v/1.mp4\"]"}))?.state,
            JobState::Succeeded
        );
        assert_eq!(status(json!({"successFlag": 1}))?.state, JobState::Running);
        assert_eq!(status(json!({"successFlag": 2}))?.state, JobState::Failed);
        assert_eq!(status(json!({"successFlag": 3}))?.state, JobState::Failed);
        assert!(status(json!({"successFlag": 9})).is_err());
        Ok(())
    }

    #[test]
    fn frame_modes_need_images() {
        let request = GenerationRequest::new(GenerationKind::Video, "dolly in")
            .with_param("generation_type", FRAMES_TO_VIDEO);
        assert!(matches!(
            build_payload(&request),
            Err(GenerationError::InvalidRequest(message)) if message.contains("image URL")
        ));
        let with_image = request.with_param("image_urls", json!(["https://cdn/a.jpg"]));
        assert!(build_payload(&with_image).is_ok());
    }

    #[test]
    fn unknown_model_and_ratio_are_rejected() {
        let bad_model = GenerationRequest::new(GenerationKind::Video, "x").with_param("model", "sora");
        assert!(build_payload(&bad_model).is_err());
        let bad_ratio =
            GenerationRequest::new(GenerationKind::Video, "x").with_param("aspect_ratio", "4:3");
        assert!(build_payload(&bad_ratio).is_err());
    }

    #[test]
    fn envelope_codes_map_onto_errors() {
        assert!(matches!(
            unwrap_envelope(json!({"code": 402, "msg": "insufficient credits"})),
            Err(GenerationError::InvalidRequest(message)) if message.contains("insufficient credits")
        ));
        assert!(matches!(
            unwrap_envelope(json!({"code": 429, "msg": "slow"})),
            Err(GenerationError::RateLimited { .. })
        ));
        assert!(matches!(
            unwrap_envelope(json!({"code": 500, "msg": "boom"})),
            Err(GenerationError::ProviderUnavailable(_))
        ));
        assert!(matches!(
            unwrap_envelope(json!({"msg": "??"})),
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn repeated_status_reads_agree() -> anyhow::Result<()> {
        let body = json!({
            "code": 200,
            "msg": "success",
            "data": {"taskId": "veo-3", "successFlag": 0},
        })
        .to_string();
        let server = MockServer::start(vec![(200, body.clone()), (200, body)])?;
        let adapter = KieAdapter::new(
            ProviderEndpoint::new(server.base_url(), Some("kie-key".to_string())),
            test_http(),
        );
        let handle = JobHandle::new(PROVIDER, "veo-3");

        let first = adapter.fetch_status(&handle)?;
        let second = adapter.fetch_status(&handle)?;
        assert_eq!(first.state, JobState::Running);
        assert_eq!(first, second);

        let requests = server.finish();
        assert_eq!(requests[1].path, "/api/v1/veo/record-info?taskId=veo-3");
        Ok(())
    }

    #[test]
    fn submit_reads_task_id_from_envelope() -> anyhow::Result<()> {
        let server = MockServer::start(vec![
            (
                200,
                json!({"code": 200, "msg": "success", "data": {"taskId": "veo-1"}}).to_string(),
            ),
            (
                200,
                json!({"code": 200, "msg": "success", "data": {"taskId": "veo-1", "successFlag": 0}})
                    .to_string(),
            ),
        ])?;
        let adapter = KieAdapter::new(
            ProviderEndpoint::new(server.base_url(), Some("kie-key".to_string())),
            test_http(),
        );

        let handle = adapter.submit(&GenerationRequest::new(GenerationKind::Video, "waves"))?;
        assert_eq!(handle.provider_job_id, "veo-1");
        assert_eq!(adapter.fetch_status(&handle)?.state, JobState::Running);

        let requests = server.finish();
        assert_eq!(requests[0].path, "/api/v1/veo/generate");
        assert_eq!(requests[0].header("authorization"), Some("Bearer kie-key"));
        let body: Value = serde_json::from_str(&requests[0].body)?;
        assert_eq!(body["model"], "veo3_fast");
        assert_eq!(body["enableTranslation"], true);
        assert_eq!(requests[1].path, "/api/v1/veo/record-info?taskId=veo-1");
        Ok(())
    }
}
