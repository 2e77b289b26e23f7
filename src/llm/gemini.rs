use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::llm::media::{detect_mime_type, normalize_image_mime_type};
use crate::llm::{GenerationFailure, HeadshotGenerator};
use crate::state::UploadedImage;
use crate::utils::http::get_http_client;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

/// Headshot generator backed by the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiHeadshotGenerator {
    client: Client,
    api_key: String,
    model: String,
    base_url: Url,
    timeout: Duration,
}

impl GeminiHeadshotGenerator {
    pub fn from_config(config: &Config) -> Result<Self> {
        if !config.has_gemini_api_key() {
            return Err(anyhow!("GEMINI_API_KEY is required for headshot generation"));
        }
        Ok(Self {
            client: get_http_client().clone(),
            api_key: config.gemini_api_key.clone(),
            model: config.gemini_image_model.clone(),
            base_url: config.gemini_api_base_url.clone(),
            timeout: config.generation_timeout(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.as_str().trim_end_matches('/'),
            self.model
        )
    }

    fn redact(&self, text: &str) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    async fn call_generate_content(&self, payload: &Value) -> Result<GeminiResponse> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(payload);
            debug!(target: "llm.gemini", model = %self.model, payload = %payload_summary);
        }

        let response = match self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err_text = self.redact(&err.to_string());
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect()
                );
                if err.is_timeout() {
                    return Err(anyhow!(
                        "Gemini request timed out after {}s",
                        self.timeout.as_secs()
                    ));
                }
                return Err(anyhow!("Gemini request failed: {}", err_text));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(
                        "Failed to read Gemini error body (status={}): {}",
                        status,
                        self.redact(&err.to_string())
                    );
                    String::new()
                }
            };
            let (message, body_summary) = summarize_error_body(&self.redact(&body));
            warn!("Gemini API error: status={}, body={}", status, body_summary);
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "Gemini request failed with status {}: {}",
                status,
                detail
            ));
        }

        let value = response.json::<GeminiResponse>().await.map_err(|err| {
            anyhow!(
                "Gemini returned a malformed response: {}",
                self.redact(&err.to_string())
            )
        })?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let response_summary = summarize_gemini_response(&value);
            debug!(target: "llm.gemini", model = %self.model, response = %response_summary);
        }
        Ok(value)
    }
}

#[async_trait]
impl HeadshotGenerator for GeminiHeadshotGenerator {
    fn provider(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_headshot(
        &self,
        image: &UploadedImage,
        instructions: &str,
    ) -> Result<String, GenerationFailure> {
        let payload = build_headshot_payload(image, instructions);
        let response = self.call_generate_content(&payload).await?;
        match extract_first_image(&response) {
            Some((mime_type, data)) => Ok(format!("data:{};base64,{}", mime_type, data)),
            None => Err(GenerationFailure::new(describe_missing_image(
                &response,
                &self.model,
            ))),
        }
    }
}

fn gemini_supports_image_mime(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "image/png" | "image/jpeg" | "image/webp" | "image/heic" | "image/heif"
    )
}

fn gemini_mime_for_image(image: &UploadedImage) -> String {
    let mut candidates = Vec::new();
    if !image.mime_type.trim().is_empty() {
        candidates.push(normalize_image_mime_type(&image.mime_type));
    }
    if let Some(detected) = detect_mime_type(image.bytes()) {
        candidates.push(detected);
    }

    candidates
        .into_iter()
        .find(|candidate| gemini_supports_image_mime(candidate))
        .unwrap_or_else(|| "image/png".to_string())
}

fn build_headshot_payload(image: &UploadedImage, instructions: &str) -> Value {
    let mime_type = gemini_mime_for_image(image);
    let encoded = general_purpose::STANDARD.encode(image.bytes());
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "inlineData": { "mimeType": mime_type, "data": encoded } },
                { "text": instructions }
            ]
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"]
        }
    })
}

fn extract_first_image(response: &GeminiResponse) -> Option<(String, String)> {
    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    for candidate in candidates {
        let Some(parts) = candidate.content.as_ref().and_then(|c| c.parts.as_ref()) else {
            continue;
        };
        for part in parts {
            if let GeminiPart::InlineData { inline_data } = part {
                if inline_data.mime_type.starts_with("image/") && !inline_data.data.is_empty() {
                    return Some((inline_data.mime_type.clone(), inline_data.data.clone()));
                }
            }
        }
    }
    None
}

fn extract_text(response: &GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.as_deref().unwrap_or(&[]) {
        if let Some(parts) = candidate.content.as_ref().and_then(|c| c.parts.as_ref()) {
            for part in parts {
                if let GeminiPart::Text { text } = part {
                    if !text.trim().is_empty() {
                        text_parts.push(text.trim());
                    }
                }
            }
        }
    }
    text_parts.join("\n")
}

fn describe_missing_image(response: &GeminiResponse, model: &str) -> String {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        return format!("Gemini blocked the request ({})", reason);
    }

    let mut message = format!("No image returned by Gemini (model: {})", model);
    let finish_reason = response
        .candidates
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .find_map(|candidate| candidate.finish_reason.as_deref())
        .filter(|reason| *reason != "STOP");
    if let Some(reason) = finish_reason {
        message.push_str(&format!(", finish reason {}", reason));
    }
    let text = extract_text(response);
    if !text.is_empty() {
        message.push_str(": ");
        message.push_str(&truncate_for_log(&text, 300));
    }
    message
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_gemini_payload(payload: &Value) -> Value {
    let mut summary = Map::new();
    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| {
                    parts
                        .iter()
                        .map(|part| {
                            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                                json!({ "text": truncate_for_log(text, 200) })
                            } else if let Some(inline_data) = part.get("inlineData") {
                                let mime_type = inline_data
                                    .get("mimeType")
                                    .and_then(|value| value.as_str())
                                    .unwrap_or("unknown");
                                let data_len = inline_data
                                    .get("data")
                                    .and_then(|value| value.as_str())
                                    .map(|value| value.len())
                                    .unwrap_or(0);
                                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
                            } else {
                                json!({ "unknownPart": true })
                            }
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            summarized_contents.push(json!({ "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }
    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }
    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut other_keys: Vec<String> = Vec::new();
    for candidate in response.candidates.as_deref().unwrap_or(&[]) {
        if let Some(parts) = candidate.content.as_ref().and_then(|c| c.parts.as_ref()) {
            for part in parts {
                match part {
                    GeminiPart::Text { .. } => text_parts += 1,
                    GeminiPart::InlineData { inline_data } => {
                        if inline_data.mime_type.starts_with("image/") {
                            image_parts += 1;
                        }
                    }
                    GeminiPart::Other(value) => {
                        if let Some(object) = value.as_object() {
                            other_keys.extend(object.keys().cloned());
                        }
                    }
                }
            }
        }
    }

    json!({
        "candidates": response.candidates.as_ref().map(|candidates| candidates.len()).unwrap_or(0),
        "textParts": text_parts,
        "imageParts": image_parts,
        "otherPartKeys": other_keys,
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}
