//! Chat-completion transports: the OpenAI-compatible shape (Groq, OpenRouter)
//! and Gemini's native `generateContent` call.

use crate::error::ConfigError;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Raw provider failure text, classified later in one place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

pub trait CompletionTransport {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiShape {
    /// `POST {base_url}/chat/completions` with a bearer key.
    OpenAiCompatible {
        base_url: &'static str,
        extra_headers: &'static [(&'static str, &'static str)],
    },
    /// `POST {base_url}/models/{model}:generateContent`; no system role, so the
    /// framing text is prepended to the prompt.
    GeminiNative { base_url: &'static str },
}

pub struct HttpTransport {
    client: Client,
    shape: ApiShape,
    api_key: String,
}

impl HttpTransport {
    pub fn new(shape: ApiShape, api_key: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            client,
            shape,
            api_key: api_key.trim().to_string(),
        })
    }

    fn post(&self, request: reqwest::blocking::RequestBuilder, body: &Value) -> Result<Value, TransportError> {
        let response = request
            .json(body)
            .send()
            .map_err(|e| TransportError(format!("request failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|e| TransportError(format!("response body unreadable: {e}")))?;
        if !status.is_success() {
            return Err(TransportError(format!("HTTP {}: {}", status.as_u16(), text.trim())));
        }
        serde_json::from_str(&text).map_err(|e| TransportError(format!("malformed response: {e}")))
    }
}

impl CompletionTransport for HttpTransport {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError> {
        let text = match self.shape {
            ApiShape::OpenAiCompatible {
                base_url,
                extra_headers,
            } => {
                let mut body = json!({
                    "model": request.model,
                    "messages": [
                        {"role": "system", "content": request.system},
                        {"role": "user", "content": request.prompt},
                    ],
                    "temperature": request.temperature,
                });
                if let Some(max_tokens) = request.max_tokens {
                    body["max_tokens"] = json!(max_tokens);
                }
                let mut builder = self
                    .client
                    .post(format!("{base_url}/chat/completions"))
                    .bearer_auth(&self.api_key);
                for (name, value) in extra_headers {
                    builder = builder.header(*name, *value);
                }
                let json = self.post(builder, &body)?;
                openai_text(&json)
            }
            ApiShape::GeminiNative { base_url } => {
                let body = json!({
                    "contents": [{
                        "role": "user",
                        "parts": [{"text": format!("{}\n\n{}", request.system, request.prompt)}],
                    }],
                    "generationConfig": {"temperature": request.temperature},
                });
                let builder = self
                    .client
                    .post(format!("{base_url}/models/{}:generateContent", request.model))
                    .header("x-goog-api-key", &self.api_key);
                let json = self.post(builder, &body)?;
                gemini_text(&json)
            }
        };
        text.filter(|t| !t.trim().is_empty())
            .ok_or_else(|| TransportError("provider returned an empty completion".to_string()))
    }
}

fn openai_text(json: &Value) -> Option<String> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
}

fn gemini_text(json: &Value) -> Option<String> {
    let parts = json["candidates"][0]["content"]["parts"].as_array()?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_openai_style_content() {
        let json = json!({"choices": [{"message": {"role": "assistant", "content": "## Executive Summary"}}]});
        assert_eq!(openai_text(&json).as_deref(), Some("## Executive Summary"));
        assert_eq!(openai_text(&json!({"choices": []})), None);
    }

    #[test]
    fn joins_gemini_parts() {
        let json = json!({"candidates": [{"content": {"parts": [{"text": "## Executive"}, {"text": " Summary"}]}}]});
        assert_eq!(gemini_text(&json).as_deref(), Some("## Executive Summary"));
        assert_eq!(gemini_text(&json!({"promptFeedback": {"blockReason": "SAFETY"}})), None);
    }
}
