use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::llm::backend::{BackendError, GenerationBackend};

// ── Ollama API types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    pub size: u64,
    pub modified_at: String,
}

#[derive(Debug, Deserialize)]
pub struct OllamaTagsResponse {
    pub models: Vec<OllamaModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

#[derive(Debug, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: ChatOptions,
}

#[derive(Debug, Deserialize)]
pub struct OllamaChatStreamChunk {
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaStatus {
    pub running: bool,
    pub models: Vec<OllamaModel>,
}

/// Connection and sampling settings for [`OllamaClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            temperature: 0.0,
            max_tokens: 2000,
            request_timeout_secs: 300,
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────

pub struct OllamaClient {
    http: reqwest::Client,
    settings: OllamaSettings,
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(OllamaSettings::default())
    }
}

/// 429 and 503 mean the server is busy; everything else is a hard failure.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

impl OllamaClient {
    pub fn new(settings: OllamaSettings) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(settings.request_timeout_secs))
                .build()
                .unwrap_or_default(),
            settings,
        }
    }

    pub fn settings(&self) -> &OllamaSettings {
        &self.settings
    }

    fn base_url(&self) -> &str {
        self.settings.base_url.trim_end_matches('/')
    }

    pub async fn check_status(&self) -> OllamaStatus {
        match self.list_models().await {
            Ok(models) => OllamaStatus {
                running: true,
                models,
            },
            Err(e) => {
                log::debug!("Ollama status probe failed: {}", e);
                OllamaStatus {
                    running: false,
                    models: vec![],
                }
            }
        }
    }

    pub async fn list_models(&self) -> anyhow::Result<Vec<OllamaModel>> {
        let resp = self
            .http
            .get(format!("{}/api/tags", self.base_url()))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        let tags: OllamaTagsResponse = resp.json().await?;
        Ok(tags.models)
    }

    /// Check if a model is already available locally.
    pub async fn has_model(&self, name: &str) -> bool {
        match self.list_models().await {
            Ok(models) => models.iter().any(|m| model_matches(&m.name, name)),
            Err(_) => false,
        }
    }

    /// Stream a chat completion, returning the full response text.
    pub async fn chat_stream(&self, messages: Vec<ChatMessage>) -> Result<String, BackendError> {
        let body = OllamaChatRequest {
            model: self.settings.model.clone(),
            messages,
            stream: true,
            options: ChatOptions {
                temperature: self.settings.temperature,
                num_predict: self.settings.max_tokens,
            },
        };

        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Failed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let message = format!("Ollama returned {}: {}", status, text);
            return Err(if is_transient_status(status) {
                BackendError::Transient(message)
            } else {
                BackendError::Failed(message)
            });
        }

        let mut full_response = String::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk_bytes = chunk_result.map_err(|e| BackendError::Failed(e.to_string()))?;
            if feed_chunk(&mut pending, &chunk_bytes, &mut full_response)? {
                return Ok(full_response);
            }
        }

        accumulate_line(decode_line(&pending)?.trim(), &mut full_response)?;
        Ok(full_response)
    }
}

/// Append raw stream bytes and fold every complete line. Chunk boundaries
/// can split a multi-byte character, so decoding waits for the newline.
fn feed_chunk(
    pending: &mut Vec<u8>,
    chunk: &[u8],
    full_response: &mut String,
) -> Result<bool, BackendError> {
    pending.extend_from_slice(chunk);
    while let Some(newline) = pending.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = pending.drain(..=newline).collect();
        if accumulate_line(decode_line(&line)?.trim(), full_response)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn decode_line(bytes: &[u8]) -> Result<&str, BackendError> {
    std::str::from_utf8(bytes)
        .map_err(|e| BackendError::Failed(format!("invalid UTF-8 in stream: {}", e)))
}

/// Fold one NDJSON line into the response. Returns true once the stream
/// reports completion.
fn accumulate_line(line: &str, full_response: &mut String) -> Result<bool, BackendError> {
    if line.is_empty() {
        return Ok(false);
    }
    match serde_json::from_str::<OllamaChatStreamChunk>(line) {
        Ok(parsed) => {
            if let Some(error) = parsed.error {
                return Err(BackendError::Failed(error));
            }
            if let Some(msg) = &parsed.message {
                full_response.push_str(&msg.content);
            }
            Ok(parsed.done)
        }
        Err(e) => {
            log::debug!("Skipping unparsable stream line: {}", e);
            Ok(false)
        }
    }
}

fn model_matches(available: &str, wanted: &str) -> bool {
    available == wanted || available.starts_with(&format!("{}:", wanted))
}

#[async_trait]
impl GenerationBackend for OllamaClient {
    async fn converse(&self, system: &str, user: &str) -> Result<String, BackendError> {
        log::debug!(
            "Calling Ollama model {} (system prompt {} chars)",
            self.settings.model,
            system.len()
        );
        self.chat_stream(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_accumulate_stream_lines() {
        let mut out = String::new();
        assert!(!accumulate_line(
            r#"{"message":{"role":"assistant","content":"SELECT "},"done":false}"#,
            &mut out
        )
        .unwrap());
        assert!(!accumulate_line("", &mut out).unwrap());
        assert!(accumulate_line(
            r#"{"message":{"role":"assistant","content":"1"},"done":true}"#,
            &mut out
        )
        .unwrap());
        assert_eq!(out, "SELECT 1");
    }

    #[test]
    fn test_chunk_split_inside_multibyte_char() {
        let line = "{\"message\":{\"role\":\"assistant\",\"content\":\"SELECT 'café'\"},\"done\":true}\n";
        let bytes = line.as_bytes();
        let split = line.find('é').unwrap() + 1;

        let mut pending = Vec::new();
        let mut out = String::new();
        assert!(!feed_chunk(&mut pending, &bytes[..split], &mut out).unwrap());
        assert!(out.is_empty());
        assert!(feed_chunk(&mut pending, &bytes[split..], &mut out).unwrap());
        assert_eq!(out, "SELECT 'café'");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_chunk_with_several_lines_and_partial_tail() {
        let mut pending = Vec::new();
        let mut out = String::new();
        let chunk = concat!(
            r#"{"message":{"role":"assistant","content":"SELECT "},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":"nom FROM "},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","#,
        );
        assert!(!feed_chunk(&mut pending, chunk.as_bytes(), &mut out).unwrap());
        assert_eq!(out, "SELECT nom FROM ");
        assert!(!pending.is_empty());

        let rest = concat!(r#""content":"élèves"},"done":true}"#, "\n");
        assert!(feed_chunk(&mut pending, rest.as_bytes(), &mut out).unwrap());
        assert_eq!(out, "SELECT nom FROM élèves");
    }

    #[test]
    fn test_invalid_utf8_line_is_an_error() {
        let mut pending = Vec::new();
        let mut out = String::new();
        let err = feed_chunk(&mut pending, b"\xff\xfe\n", &mut out).unwrap_err();
        assert!(matches!(err, BackendError::Failed(_)));
    }

    #[test]
    fn test_stream_error_line() {
        let mut out = String::new();
        let err = accumulate_line(r#"{"error":"model not found","done":false}"#, &mut out)
            .unwrap_err();
        assert_eq!(err, BackendError::Failed("model not found".to_string()));
    }

    #[test]
    fn test_model_matches() {
        assert!(model_matches("llama3.2:3b", "llama3.2"));
        assert!(model_matches("tinyllama", "tinyllama"));
        assert!(!model_matches("tinyllama:latest", "llama"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_running() {
        let client = OllamaClient::new(OllamaSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            ..OllamaSettings::default()
        });
        let status = client.check_status().await;
        assert!(!status.running);
        assert!(!client.has_model("tinyllama").await);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_transient() {
        let client = OllamaClient::new(OllamaSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            ..OllamaSettings::default()
        });
        let err = client.converse("s", "u").await.unwrap_err();
        assert!(matches!(err, BackendError::Failed(_)));
    }
}
