//! Cloud classification tiers.
//!
//! Both tiers speak plain REST against configurable endpoints:
//!
//! - **FastCloud** posts the PNG to a prediction endpoint and reads back
//!   tag probabilities.
//! - **DeepCloud** posts a vision chat-completion request with the PNG
//!   embedded base64 and parses the model's JSON reply, tolerating
//!   markdown code fences and falling back to keyword detection when the
//!   reply is not JSON at all.
//!
//! Connection failures and timeouts map to `Unreachable` so the
//! dispatcher can rank the spectrogram into the offline sync queue;
//! HTTP 429 maps to `RateLimited`.

use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;

use guardian_types::{threat_level_for, ClassificationResult, Label, ThreatLevel};

use crate::classifier::{Classifier, ClassifyInput};
use crate::{ClassifyError, Result};

/// Request timeout for both tiers.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const VISION_SYSTEM_PROMPT: &str = "You are an audio spectrogram analyst for a forest \
protection system. Classify 32x32 mel spectrograms (time left to right, low frequencies at \
the bottom, brighter = louder). Chainsaws show strong sustained horizontal bands with a \
periodic engine pattern; vehicles show a low-frequency rumble; natural sounds are bursty or \
diffuse. Respond with JSON only: {\"classification\": \"chainsaw\"|\"vehicle\"|\"natural\"|\
\"unknown\", \"confidence\": 0-100, \"threat_level\": \"CRITICAL\"|\"HIGH\"|\"MEDIUM\"|\
\"LOW\"|\"NONE\", \"reasoning\": \"...\", \"features_detected\": [\"...\"]}";

fn map_transport_error(e: reqwest::Error) -> ClassifyError {
    if e.is_timeout() || e.is_connect() {
        ClassifyError::Unreachable(e.to_string())
    } else {
        ClassifyError::BadResponse(e.to_string())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<()> {
    if status.as_u16() == 429 {
        return Err(ClassifyError::RateLimited);
    }
    if !status.is_success() {
        return Err(ClassifyError::BadResponse(format!("HTTP {status}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Fast tier
// ---------------------------------------------------------------------------

/// Prediction-endpoint classifier.
pub struct FastCloudClassifier {
    endpoint: String,
    key: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(rename = "tagName")]
    tag_name: String,
    #[serde(default)]
    probability: f64,
}

impl FastCloudClassifier {
    pub fn new(endpoint: String, key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClassifyError::Unsupported(e.to_string()))?;
        Ok(Self {
            endpoint,
            key,
            client,
        })
    }
}

/// Parse a prediction-endpoint body into a result.
pub fn parse_prediction_response(body: &str) -> Result<ClassificationResult> {
    let parsed: PredictionResponse =
        serde_json::from_str(body).map_err(|e| ClassifyError::BadResponse(e.to_string()))?;
    let top = parsed
        .predictions
        .iter()
        .max_by(|a, b| a.probability.total_cmp(&b.probability))
        .ok_or_else(|| ClassifyError::BadResponse("no predictions".into()))?;
    let label = Label::parse(&top.tag_name);
    let confidence = (top.probability * 100.0).round().clamp(0.0, 100.0) as u8;
    Ok(ClassificationResult::new(label, confidence))
}

impl Classifier for FastCloudClassifier {
    fn name(&self) -> &'static str {
        "fast_cloud"
    }

    fn classify(&self, input: &ClassifyInput) -> Result<ClassificationResult> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Prediction-Key", &self.key)
            .header("Content-Type", "application/octet-stream")
            .body(input.png.clone())
            .send()
            .map_err(map_transport_error)?;
        check_status(response.status())?;
        let body = response.text().map_err(map_transport_error)?;
        let result = parse_prediction_response(&body)?;
        tracing::info!(label = %result.label, confidence = result.confidence, "fast cloud classification");
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Deep tier
// ---------------------------------------------------------------------------

/// Vision chat-completion classifier.
pub struct DeepCloudClassifier {
    endpoint: String,
    key: String,
    model: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct VisionVerdict {
    #[serde(default)]
    classification: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    threat_level: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    features_detected: Vec<String>,
}

impl DeepCloudClassifier {
    pub fn new(endpoint: String, key: String, model: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClassifyError::Unsupported(e.to_string()))?;
        Ok(Self {
            endpoint,
            key,
            model,
            client,
        })
    }
}

/// Strip an optional markdown code fence from a model reply.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the optional language tag on the fence line.
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map_or(rest, str::trim)
}

/// Parse the free-form model reply into a result: JSON first, keyword
/// fallback second.
pub fn parse_vision_reply(content: &str) -> ClassificationResult {
    let stripped = strip_code_fence(content);
    if let Ok(verdict) = serde_json::from_str::<VisionVerdict>(stripped) {
        let label = Label::parse(&verdict.classification);
        let confidence = verdict.confidence.round().clamp(0.0, 100.0) as u8;
        let threat_level = verdict
            .threat_level
            .as_deref()
            .map(ThreatLevel::parse)
            .unwrap_or_else(|| threat_level_for(label, confidence));
        return ClassificationResult {
            label,
            confidence,
            threat_level,
            reasoning: verdict.reasoning,
            features: verdict.features_detected,
        };
    }

    // The model wandered off-format; salvage what we can.
    let lower = content.to_ascii_lowercase();
    let result = if lower.contains("chainsaw") {
        ClassificationResult::new(Label::Chainsaw, 75)
    } else if lower.contains("vehicle") || lower.contains("truck") {
        ClassificationResult::new(Label::Vehicle, 60)
    } else {
        ClassificationResult::new(Label::Natural, 50)
    };
    result.with_reasoning(content.trim().to_string())
}

impl Classifier for DeepCloudClassifier {
    fn name(&self) -> &'static str {
        "deep_cloud"
    }

    fn classify(&self, input: &ClassifyInput) -> Result<ClassificationResult> {
        let image = base64::engine::general_purpose::STANDARD.encode(&input.png);
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.1,
            "max_tokens": 500,
            "messages": [
                {"role": "system", "content": VISION_SYSTEM_PROMPT},
                {"role": "user", "content": [
                    {"type": "text", "text": "Classify this spectrogram and assess threat level."},
                    {"type": "image_url", "image_url": {
                        "url": format!("data:image/png;base64,{image}"),
                        "detail": "high",
                    }},
                ]},
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.key)
            .json(&body)
            .send()
            .map_err(map_transport_error)?;
        check_status(response.status())?;

        let chat: ChatResponse = response.json().map_err(map_transport_error)?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ClassifyError::BadResponse("empty choices".into()))?;
        let result = parse_vision_reply(content);
        tracing::info!(label = %result.label, confidence = result.confidence, "deep cloud classification");
        Ok(result)
    }
}
