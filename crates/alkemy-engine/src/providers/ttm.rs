use std::time::Duration;

use alkemy_contracts::jobs::{JobHandle, JobState, JobStatus};
use alkemy_contracts::request::{GenerationKind, GenerationRequest};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{progress_percent, required_id, status_text};
use crate::adapter::{ensure_supported, ProviderAdapter, ProviderHealth, ProviderKind};
use crate::error::GenerationError;
use crate::http::{response_json_or_error, transport_error};
use crate::media::load_media_bytes;
use crate::poller::PollOptions;

const PROVIDER: &str = "ttm";
const NUM_FRAMES: i64 = 81;
const GUIDANCE_SCALE: f64 = 3.5;
const MAX_DENOISE_INDEX: i64 = 50;
const CAMERA_MOVEMENTS: [&str; 4] = ["pan", "zoom", "orbit", "dolly"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MotionType {
    Object,
    Camera,
}

impl MotionType {
    fn as_str(&self) -> &'static str {
        match self {
            MotionType::Object => "object",
            MotionType::Camera => "camera",
        }
    }

    /// `(tweakIndex, tstrongIndex)` when the request leaves them unset.
    fn denoise_defaults(&self) -> (i64, i64) {
        match self {
            MotionType::Object => (3, 7),
            MotionType::Camera => (2, 5),
        }
    }
}

/// Self-hosted Time-to-Move service: animates a still image along an object
/// trajectory or a camera move.
pub struct TtmAdapter {
    base: String,
    http: HttpClient,
}

impl TtmAdapter {
    pub fn new(base: impl Into<String>, http: HttpClient) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            http,
        }
    }
}

impl ProviderAdapter for TtmAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ttm
    }

    fn supported_kinds(&self) -> &[GenerationKind] {
        &[GenerationKind::Video]
    }

    fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, GenerationError> {
        ensure_supported(self, request)?;
        let request_json = build_request_json(request)?;
        let Some(source) = request.reference_images().into_iter().next() else {
            return Err(GenerationError::InvalidRequest(
                "ttm requires a source image (image_url)".to_string(),
            ));
        };
        let media = load_media_bytes(PROVIDER, &self.http, &source)?;

        let image = Part::bytes(media.bytes)
            .file_name(media.file_name)
            .mime_str(&media.mime_type)
            .map_err(|err| {
                GenerationError::InvalidRequest(format!(
                    "ttm source image has an invalid mime type {}: {err}",
                    media.mime_type
                ))
            })?;
        let form = Form::new()
            .part("image", image)
            .text("request_json", Value::Object(request_json).to_string());
        let response = self
            .http
            .post(format!("{}/api/ttm/generate", self.base))
            .multipart(form)
            .send()
            .map_err(|err| transport_error(PROVIDER, "submit", err))?;
        let job = response_json_or_error(PROVIDER, response)?;
        Ok(JobHandle::new(
            PROVIDER,
            required_id(PROVIDER, &job, &["jobId", "job_id"])?,
        ))
    }

    fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus, GenerationError> {
        let response = self
            .http
            .get(format!("{}/api/ttm/status/{}", self.base, handle.provider_job_id))
            .send()
            .map_err(|err| transport_error(PROVIDER, "poll", err))?;
        Ok(map_status(response_json_or_error(PROVIDER, response)?))
    }

    fn health(&self) -> ProviderHealth {
        let response = match self.http.get(format!("{}/", self.base)).send() {
            Ok(response) => response,
            Err(err) => {
                return ProviderHealth::Unavailable(
                    transport_error(PROVIDER, "health", err).to_string(),
                )
            }
        };
        match response_json_or_error(PROVIDER, response) {
            Ok(body) if body.get("pipeline_loaded").and_then(Value::as_bool) == Some(true) => {
                ProviderHealth::Ready
            }
            Ok(_) => ProviderHealth::Degraded("pipeline still loading".to_string()),
            Err(err) => ProviderHealth::Unavailable(err.to_string()),
        }
    }

    fn default_poll_options(&self, request: &GenerationRequest) -> PollOptions {
        PollOptions::new(Duration::from_secs(1), Duration::from_secs(120))
            .with_request_overrides(request)
    }
}

pub(crate) fn map_status(job: Value) -> JobStatus {
    let hint = progress_percent(job.get("progress"));
    match status_text(&job, "status").as_str() {
        "pending" => JobStatus::in_flight(JobState::Pending, hint),
        "completed" => {
            let inner_failed = job
                .get("result")
                .map(|result| status_text(result, "status") == "failed")
                .unwrap_or(false);
            if inner_failed {
                JobStatus::failed(job)
            } else {
                JobStatus::succeeded(job)
            }
        }
        "failed" => JobStatus::failed(job),
        _ => JobStatus::running(hint),
    }
}

/// The `request_json` form field, with motion defaults filled in.
pub(crate) fn build_request_json(
    request: &GenerationRequest,
) -> Result<Map<String, Value>, GenerationError> {
    let trajectory = request.parameters.get("trajectory");
    let camera_movement = request.parameters.get("camera_movement");
    let motion = match request.param_str("motion_type") {
        Some("object") => MotionType::Object,
        Some("camera") => MotionType::Camera,
        Some(other) => {
            return Err(GenerationError::InvalidRequest(format!(
                "ttm motion_type must be object or camera, got {other}"
            )))
        }
        None if trajectory.is_some() => MotionType::Object,
        None => MotionType::Camera,
    };

    let mut out = Map::new();
    out.insert("motionType".to_string(), json!(motion.as_str()));
    out.insert("prompt".to_string(), json!(request.prompt.trim()));
    match motion {
        MotionType::Object => {
            let Some(trajectory) = trajectory else {
                return Err(GenerationError::InvalidRequest(
                    "ttm object motion requires a trajectory".to_string(),
                ));
            };
            validate_trajectory(trajectory)?;
            out.insert("trajectory".to_string(), trajectory.clone());
        }
        MotionType::Camera => {
            let Some(movement) = camera_movement else {
                return Err(GenerationError::InvalidRequest(
                    "ttm camera motion requires camera_movement".to_string(),
                ));
            };
            validate_camera_movement(movement)?;
            out.insert("cameraMovement".to_string(), movement.clone());
        }
    }

    let (tweak, tstrong) = motion.denoise_defaults();
    out.insert(
        "tweakIndex".to_string(),
        json!(denoise_index(request, "tweak_index", tweak)?),
    );
    out.insert(
        "tstrongIndex".to_string(),
        json!(denoise_index(request, "tstrong_index", tstrong)?),
    );
    out.insert(
        "numFrames".to_string(),
        json!(request.param_i64("num_frames").unwrap_or(NUM_FRAMES)),
    );
    out.insert(
        "guidanceScale".to_string(),
        json!(request.param_f64("guidance_scale").unwrap_or(GUIDANCE_SCALE)),
    );
    if let Some(seed) = request.param_i64("seed") {
        out.insert("seed".to_string(), json!(seed));
    }
    Ok(out)
}

fn denoise_index(request: &GenerationRequest, key: &str, default: i64) -> Result<i64, GenerationError> {
    let value = request.param_i64(key).unwrap_or(default);
    if !(0..=MAX_DENOISE_INDEX).contains(&value) {
        return Err(GenerationError::InvalidRequest(format!(
            "ttm {key} must be between 0 and {MAX_DENOISE_INDEX}, got {value}"
        )));
    }
    Ok(value)
}

/// At least two points, each with normalized `x`/`y` in `[0, 1]`.
fn validate_trajectory(trajectory: &Value) -> Result<(), GenerationError> {
    let invalid = |reason: &str| GenerationError::InvalidRequest(format!("ttm trajectory {reason}"));
    let points = trajectory
        .as_array()
        .ok_or_else(|| invalid("must be an array of {x, y} points"))?;
    if points.len() < 2 {
        return Err(invalid("needs at least two points"));
    }
    let in_unit = |point: &Value, axis: &str| {
        point
            .get(axis)
            .and_then(Value::as_f64)
            .is_some_and(|value| (0.0..=1.0).contains(&value))
    };
    if points
        .iter()
        .any(|point| !in_unit(point, "x") || !in_unit(point, "y"))
    {
        return Err(invalid("points must have x and y between 0 and 1"));
    }
    Ok(())
}

fn validate_camera_movement(movement: &Value) -> Result<(), GenerationError> {
    let kind = movement
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !CAMERA_MOVEMENTS.contains(&kind) {
        return Err(GenerationError::InvalidRequest(format!(
            "ttm camera_movement.type must be one of {}, got {kind:?}",
            CAMERA_MOVEMENTS.join(", ")
        )));
    }
    Ok(())
}
