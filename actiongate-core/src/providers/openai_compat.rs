//! OpenAI-compatible model provider.
//!
//! Works against OpenAI, Ollama, vLLM, LM Studio, and any endpoint that
//! follows the chat completions API format.

use crate::config::ModelConfig;
use crate::error::ModelError;
use crate::model::{ModelPort, ModelRequest};
use crate::types::ChatTurn;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Chat-completions client.
pub struct OpenAiCompatModel {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    timeout_secs: u64,
}

impl OpenAiCompatModel {
    /// Create a provider from configuration.
    ///
    /// Reads the API key from the environment variable named in `config.api_key_env`.
    /// Local endpoints (localhost / 127.0.0.1) work without a key.
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let is_local = config
            .base_url
            .as_ref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local provider; using placeholder bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| ModelError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a provider with an explicitly provided API key.
    pub fn new_with_key(config: &ModelConfig, api_key: String) -> Result<Self, ModelError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ModelError::ApiRequest {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn turns_to_json(turns: &[ChatTurn]) -> Vec<Value> {
        turns
            .iter()
            .map(|t| json!({"role": t.role.to_string(), "content": t.content}))
            .collect()
    }

    fn request_body(&self, request: &ModelRequest, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": Self::turns_to_json(&request.turns()),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": stream,
        })
    }

    /// Pull the assistant text out of a non-streaming response body.
    fn parse_response(body: &Value) -> Result<String, ModelError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ModelError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;
        choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ModelError::ResponseParse {
                message: "No text content in choice".to_string(),
            })
    }

    /// Parse a single SSE data line. Returns the parsed JSON if valid.
    fn parse_sse_line(line: &str) -> Option<Value> {
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            return None;
        }
        serde_json::from_str(data).ok()
    }

    /// Content delta carried by one streamed chunk, if any.
    fn delta_text(chunk: &Value) -> Option<&str> {
        chunk
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
            .filter(|s| !s.is_empty())
    }

    fn map_send_error(&self, e: reqwest::Error) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            ModelError::ApiRequest {
                message: format!("Request failed: {}", e),
            }
        }
    }

    /// Map an HTTP status code to the appropriate ModelError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> ModelError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed");
                ModelError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        // "Rate limit reached ... try again in 20s"
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim().trim_end_matches(['s', '.']).parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                ModelError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            code if code >= 500 => ModelError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => ModelError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }
}

#[async_trait]
impl ModelPort for OpenAiCompatModel {
    async fn ask(&self, request: ModelRequest) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, false);

        debug!(
            url = %url,
            model = %self.model,
            turns = request.context.len() + 1,
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| ModelError::ApiRequest {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| ModelError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        Self::parse_response(&json)
    }

    async fn ask_streaming(
        &self,
        request: ModelRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, true);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body_text));
        }

        let mut full = String::new();
        let mut pending = String::new();
        let mut stream = response.bytes_stream();
        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ModelError::Streaming {
                message: format!("Failed to read stream: {}", e),
            })?;
            pending.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(idx) = pending.find('\n') {
                let line: String = pending.drain(..=idx).collect();
                let line = line.trim();
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                if line == "data: [DONE]" {
                    break 'outer;
                }
                if let Some(data) = Self::parse_sse_line(line)
                    && let Some(delta) = Self::delta_text(&data)
                {
                    full.push_str(delta);
                    let _ = tx.send(delta.to_string()).await;
                }
            }
        }

        debug!(chars = full.len(), "Stream finished");
        Ok(full)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
