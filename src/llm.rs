//! Streaming text generation
//!
//! Replies are requested from an OpenAI-compatible chat completion endpoint
//! with `stream: true` and surfaced as a stream of text fragments, so speech
//! synthesis can start before the reply is complete.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::LlmConfig;
use crate::{Error, Result};

/// Fragments buffered between the HTTP reader and the consumer
const FRAGMENT_BUFFER: usize = 64;

/// Produces a reply to a user utterance
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Start generating a reply to `prompt`
    ///
    /// # Errors
    ///
    /// Returns `Generation` if the request cannot be started
    async fn generate(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// One parsed server-sent event line
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine {
    /// A content fragment
    Content(String),
    /// End of stream marker
    Done,
    /// Nothing to emit (blank line, comment, role-only delta)
    Skip,
}

/// Parse one line of a streamed chat completion
///
/// Error payloads and unparseable lines are logged and skipped.
#[must_use]
pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                tracing::warn!(error = %error, "generation stream reported an error");
                return SseLine::Skip;
            }
            chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta)
                .and_then(|delta| delta.content)
                .filter(|content| !content.is_empty())
                .map_or(SseLine::Skip, SseLine::Content)
        }
        Err(e) => {
            tracing::warn!(error = %e, line = data, "unparseable generation line");
            SseLine::Skip
        }
    }
}

/// Splits a byte stream into text lines
///
/// Bytes are held until a newline arrives, so a character split across
/// network chunks is decoded whole.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `bytes` and return every line they complete
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            if let Some(line) = decode_line(line) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left after the stream ended
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        decode_line(std::mem::take(&mut self.pending))
    }
}

fn decode_line(line: Vec<u8>) -> Option<String> {
    match String::from_utf8(line) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::warn!(error = %e, "generation line is not valid UTF-8");
            None
        }
    }
}

/// OpenAI-compatible streaming chat completion client
pub struct ChatCompletionClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    system_prompt: String,
    max_tokens: Option<u32>,
}

impl ChatCompletionClient {
    /// Create a client from settings
    ///
    /// # Errors
    ///
    /// Returns `Config` if no API key is configured
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("API key required for text generation".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: SecretString::from(api_key.expose_secret().to_string()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionClient {
    async fn generate(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: true,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "requesting reply");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "generation API error");
            return Err(Error::Generation(format!("API error {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut lines = LineBuffer::default();

            while let Some(bytes) = body.next().await {
                let bytes = match bytes {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::Generation(format!("stream interrupted: {e}"))))
                            .await;
                        return;
                    }
                };
                for line in lines.push(&bytes) {
                    match parse_sse_line(&line) {
                        SseLine::Content(fragment) => {
                            if tx.send(Ok(fragment)).await.is_err() {
                                tracing::debug!("reply consumer went away");
                                return;
                            }
                        }
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }

            if let Some(SseLine::Content(fragment)) = lines.finish().map(|l| parse_sse_line(&l)) {
                let _ = tx.send(Ok(fragment)).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#),
            SseLine::Content("Hello".to_string())
        );
    }

    #[test]
    fn test_parse_done_and_blank() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
    }

    #[test]
    fn test_role_only_delta_skipped() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            SseLine::Skip
        );
    }

    #[test]
    fn test_error_and_garbage_skipped() {
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"rate limited"}}"#),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line("data: {not json"), SseLine::Skip);
    }

    #[test]
    fn test_line_buffer_keeps_split_characters() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"Wait—now\"}}]}\n";
        let bytes = line.as_bytes();
        let split = line.find('—').unwrap() + 1;

        let mut lines = LineBuffer::default();
        assert!(lines.push(&bytes[..split]).is_empty());
        let complete = lines.push(&bytes[split..]);

        assert_eq!(complete.len(), 1);
        assert_eq!(
            parse_sse_line(&complete[0]),
            SseLine::Content("Wait—now".to_string())
        );
        assert!(lines.finish().is_none());
    }

    #[test]
    fn test_line_buffer_skips_invalid_lines() {
        let mut lines = LineBuffer::default();
        let mut bytes = b"data: [DONE]\n".to_vec();
        bytes.splice(0..0, [0xFF, b'\n']);

        assert_eq!(lines.push(&bytes), vec!["data: [DONE]\n".to_string()]);

        assert!(lines.push(b"data: tail").is_empty());
        assert_eq!(lines.finish().as_deref(), Some("data: tail"));
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            stream: true,
            max_tokens: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], true);
        assert!(value.get("max_tokens").is_none());
    }

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(
            ChatCompletionClient::new(&LlmConfig::default()),
            Err(Error::Config(_))
        ));
    }
}
