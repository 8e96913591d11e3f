//! External inference capability ("the Agent").
//!
//! The core never computes embeddings or retrieval itself; it hands the
//! document text and the conversation so far to an [`Agent`] and persists
//! whatever streams back. [`OpenAiAgent`] speaks the OpenAI-compatible
//! `/chat/completions` API with `stream: true`, forwarding each delta as it
//! arrives.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::models::MessageRole;

/// Grounding instructions for the document assistant.
const AGENT_INSTRUCTIONS: &str = "\
You are a document assistant that helps users understand and find information within their uploaded documents.

## Core Behavior
- Answer questions using ONLY the information found in the provided document context.
- When answering, cite the relevant section or quote from the document when possible.
- If the document doesn't contain enough information to fully answer a question, clearly state what you found and what is missing.

## Handling Scope
- For questions unrelated to the document content, politely explain that you can only answer questions about the uploaded documents.
- For partially related questions, answer what you can from the document and clarify what falls outside its scope.

## Response Style
- Be concise but thorough.
- Use bullet points or numbered lists for multi-part answers.
- If the user asks a vague question, ask for clarification before guessing.

## Limitations
- Do not invent or assume information not present in the documents.
- Do not provide general knowledge answers unless they directly relate to interpreting the document content.
";

/// One prior turn of the conversation, oldest first.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

/// Narrow inference contract. `on_delta` receives each partial chunk of the
/// reply as the model streams it; the full reply text is returned when the
/// stream terminates. Any failure is [`Error::Agent`] and is surfaced
/// per-message — it never invalidates the thread.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn send(
        &self,
        document_text: &str,
        transcript: &[ChatTurn],
        user_text: &str,
        on_delta: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<String>;
}

// ─── OpenAI-compatible client ───────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, PartialEq, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

pub struct OpenAiAgent {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiAgent {
    /// Build a client from config; the API key is read from the configured
    /// environment variable and may be absent for keyless local endpoints.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Agent(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }
}

fn build_messages(
    document_text: &str,
    transcript: &[ChatTurn],
    user_text: &str,
) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(transcript.len() + 2);
    messages.push(WireMessage {
        role: "system".to_string(),
        content: format!("{}\n## Document\n\n{}", AGENT_INSTRUCTIONS, document_text),
    });
    for turn in transcript {
        messages.push(WireMessage {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        });
    }
    messages.push(WireMessage {
        role: "user".to_string(),
        content: user_text.to_string(),
    });
    messages
}

#[async_trait]
impl Agent for OpenAiAgent {
    async fn send(
        &self,
        document_text: &str,
        transcript: &[ChatTurn],
        user_text: &str,
        on_delta: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<String> {
        let body = WireRequest {
            model: self.model.clone(),
            messages: build_messages(document_text, transcript, user_text),
            stream: true,
        };

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Agent(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Agent(format!("API returned {}: {}", status, text)));
        }

        let mut full_content = String::new();
        let mut stream = resp.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Agent(format!("stream read failed: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer = buffer[pos + 1..].to_string();

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(full_content);
                }
                if let Ok(parsed) = serde_json::from_str::<StreamResponse>(data) {
                    if let Some(choice) = parsed.choices.first() {
                        if let Some(content) = &choice.delta.content {
                            full_content.push_str(content);
                            on_delta(content);
                        }
                        if choice.finish_reason.is_some() {
                            return Ok(full_content);
                        }
                    }
                }
            }
        }

        Ok(full_content)
    }
}
