//! Generative model abstraction and streaming client.
//!
//! [`ChatModel`] opens a streaming completion and hands back a channel of
//! text fragments. A call that cannot be established fails up front with
//! `Generation`; failures after the first fragment arrive on the channel
//! so the orchestrator can take the truncated-append path.
//!
//! [`OpenAiCompatChat`] speaks the OpenAI chat-completions wire format
//! (`stream: true`, `data:` SSE lines terminated by `data: [DONE]`),
//! which covers both supported providers:
//!
//! | provider | endpoint | API key env |
//! |----------|----------|-------------|
//! | `groq`   | `https://api.groq.com/openai/v1` | `GROQ_API_KEY` |
//! | `openai` | `https://api.openai.com/v1` | `OPENAI_API_KEY` |

use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::GenerationConfig;
use crate::error::{Result, ServiceError};

/// One message of an assembled prompt.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    /// `user` or `assistant` on the wire.
    pub role: &'static str,
    pub content: String,
}

/// A fully assembled, bounded prompt.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system: String,
    pub messages: Vec<PromptMessage>,
}

/// Streaming generative model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Start a streaming completion. Fragments arrive on the returned
    /// channel; the channel closes when the stream finishes. Dropping the
    /// receiver aborts the upstream call.
    async fn stream_chat(&self, prompt: &ChatPrompt) -> Result<mpsc::Receiver<Result<String>>>;
}

/// Build the configured chat model.
pub fn create_chat_model(config: &GenerationConfig) -> Result<Arc<dyn ChatModel>> {
    Ok(Arc::new(OpenAiCompatChat::new(config)?))
}

pub struct OpenAiCompatChat {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let (base_url, key_var) = match config.provider.as_str() {
            "groq" => ("https://api.groq.com/openai/v1", "GROQ_API_KEY"),
            "openai" => ("https://api.openai.com/v1", "OPENAI_API_KEY"),
            other => {
                return Err(ServiceError::Generation(format!(
                    "unknown generation provider: {}",
                    other
                )))
            }
        };

        let api_key = std::env::var(key_var).map_err(|_| {
            ServiceError::Generation(format!("{} environment variable not set", key_var))
        })?;

        let client = reqwest::Client::new();

        Ok(Self {
            base_url: base_url.to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, prompt: &ChatPrompt) -> Result<mpsc::Receiver<Result<String>>> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": prompt.system,
        })];
        for msg in &prompt.messages {
            messages.push(serde_json::json!({
                "role": msg.role,
                "content": msg.content,
            }));
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "model": self.model,
                "messages": messages,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Generation(format!(
                "API error {}: {}",
                status, body
            )));
        }

        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            // SSE events can split across network chunks; assemble lines
            // before parsing.
            let mut buf: Vec<u8> = Vec::new();

            'outer: while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        buf.extend_from_slice(&bytes);
                        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = buf.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line);
                            let line = line.trim();

                            let Some(payload) = line.strip_prefix("data:") else {
                                continue;
                            };
                            let payload = payload.trim();

                            if payload == "[DONE]" {
                                break 'outer;
                            }

                            if let Some(delta) = extract_delta(payload) {
                                if !delta.is_empty() && tx.send(Ok(delta)).await.is_err() {
                                    // Consumer went away; dropping the
                                    // response stream aborts the call.
                                    debug!("chat stream consumer dropped, aborting");
                                    break 'outer;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(ServiceError::Generation(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Pull `choices[0].delta.content` out of a streamed completion event.
fn extract_delta(payload: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(payload).ok()?;
    parsed
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_content_delta() {
        let payload = r#"{"choices":[{"delta":{"content":"Hello"},"index":0}]}"#;
        assert_eq!(extract_delta(payload), Some("Hello".to_string()));
    }

    #[test]
    fn role_only_delta_yields_nothing() {
        let payload = r#"{"choices":[{"delta":{"role":"assistant"},"index":0}]}"#;
        assert_eq!(extract_delta(payload), None);
    }

    #[test]
    fn garbage_payload_yields_nothing() {
        assert_eq!(extract_delta("not json"), None);
    }
}
