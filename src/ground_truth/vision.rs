use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, warn};
use serde_json::{json, Value};

use super::{GroundTruthReader, Reading};
use crate::error::TelemetryError;
use crate::models::ReadMethod;
use crate::sensing::RoiImage;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT_SECS: u64 = 30;

const SYSTEM_PROMPT: &str = "You are an OCR helper for a game XP bar. \
You ONLY output the numeric XP percentage between 0 and 100 with 4 decimals, \
no percent sign, no extra text.";
const USER_PROMPT: &str = "Read the white XP percentage text (e.g. \"54.4444%\") in this image. \
Return only a number like 54.4444 (no %). If you truly cannot read it, answer -1.";

/// Generative vision backend speaking the chat-completions protocol.
pub struct VisionReader {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl VisionReader {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Reads the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Option<Self> {
        std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .map(Self::new)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn request_body(&self, png_base64: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": USER_PROMPT },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:image/png;base64,{png_base64}") }
                        }
                    ]
                }
            ],
            "max_tokens": 20,
            "temperature": 0
        })
    }
}

#[async_trait]
impl GroundTruthReader for VisionReader {
    async fn read(&self, image: &RoiImage) -> Result<Reading, TelemetryError> {
        let failure = |msg: String| TelemetryError::GroundTruthReadFailure(msg);

        let png = image
            .to_png()
            .map_err(|err| failure(format!("{err:#}")))?;
        let body = self.request_body(&STANDARD.encode(png));

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| failure(format!("vision request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("vision backend returned HTTP {status}: {text}");
            return Err(failure(format!("vision backend returned HTTP {status}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| failure(format!("vision reply was not JSON: {err}")))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim();
        debug!("vision reply: {content:?}");

        let percent = parse_percentage_reply(content)?;
        Ok(Reading {
            percent,
            method: ReadMethod::Vision,
        })
    }
}

/// First signed decimal number in `text`, accepting `,` as the separator.
/// `-1` (the "cannot read" answer) and anything outside [0, 100] fail.
pub fn parse_percentage_reply(text: &str) -> Result<f64, TelemetryError> {
    let failure = |msg: String| TelemetryError::GroundTruthReadFailure(msg);

    if text.is_empty() {
        return Err(failure("empty reply".into()));
    }

    let chars: Vec<char> = text.chars().collect();
    let start = (0..chars.len())
        .find(|&i| {
            chars[i].is_ascii_digit()
                || (chars[i] == '-' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()))
        })
        .ok_or_else(|| failure(format!("no number in reply {text:?}")))?;

    let mut number = String::new();
    let mut i = start;
    if chars[i] == '-' {
        number.push('-');
        i += 1;
    }
    while i < chars.len() && chars[i].is_ascii_digit() {
        number.push(chars[i]);
        i += 1;
    }
    if i + 1 < chars.len() && (chars[i] == '.' || chars[i] == ',') && chars[i + 1].is_ascii_digit()
    {
        number.push('.');
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            number.push(chars[i]);
            i += 1;
        }
    }

    let value: f64 = number
        .parse()
        .map_err(|_| failure(format!("unparseable number {number:?}")))?;
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(failure(format!("value {value} outside 0-100")));
    }
    Ok(value)
}
