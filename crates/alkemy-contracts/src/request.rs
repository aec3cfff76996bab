use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a request asks a provider to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Image,
    Video,
    World,
    Speech,
}

impl GenerationKind {
    pub const ALL: [GenerationKind; 4] = [
        GenerationKind::Image,
        GenerationKind::Video,
        GenerationKind::World,
        GenerationKind::Speech,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Image => "image",
            GenerationKind::Video => "video",
            GenerationKind::World => "world",
            GenerationKind::Speech => "speech",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" => Some(GenerationKind::Image),
            "video" => Some(GenerationKind::Video),
            "world" | "3d" => Some(GenerationKind::World),
            "speech" | "voice" => Some(GenerationKind::Speech),
            _ => None,
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-agnostic description of one generation.
///
/// Requests are plain values: the caller builds one, hands a reference to the
/// coordinator, and may reuse it for a fresh run if it wants to retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<String>,
}

impl GenerationRequest {
    pub fn new(kind: GenerationKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            parameters: Map::new(),
            provider_hint: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider_hint = Some(provider.into());
        self
    }

    /// Whether this request cannot be submitted without a prompt.
    ///
    /// Worlds may be lifted from a reference image alone; every other kind is
    /// text-driven.
    pub fn requires_prompt(&self) -> bool {
        !(self.kind == GenerationKind::World && !self.reference_images().is_empty())
    }

    /// Shape check that needs no provider knowledge.
    pub fn validate(&self) -> Result<(), String> {
        if self.requires_prompt() && self.prompt.trim().is_empty() {
            return Err(format!("{} generation requires a non-empty prompt", self.kind));
        }
        if let Some(hint) = &self.provider_hint {
            if hint.trim().is_empty() {
                return Err("provider hint must not be blank".to_string());
            }
        }
        Ok(())
    }

    /// Reference media named by `image_urls`, `image_url` or `reference_images`,
    /// in that order, blank entries dropped.
    pub fn reference_images(&self) -> Vec<String> {
        let mut out = Vec::new();
        for key in ["image_urls", "image_url", "reference_images"] {
            match self.parameters.get(key) {
                Some(Value::String(raw)) => push_non_empty(&mut out, raw),
                Some(Value::Array(rows)) => {
                    for row in rows {
                        if let Some(raw) = row.as_str() {
                            push_non_empty(&mut out, raw);
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        match self.parameters.get(key)? {
            Value::Number(number) => number.as_f64(),
            Value::String(raw) => raw.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        match self.parameters.get(key)? {
            Value::Number(number) => number.as_i64(),
            Value::String(raw) => raw.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

fn push_non_empty(out: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && !out.iter().any(|existing| existing == trimmed) {
        out.push(trimmed.to_string());
    }
}
