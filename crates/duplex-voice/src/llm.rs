use crate::config::LlmConfig;
use crate::error::VoiceError;
use crate::EventStream;
use duplex_types::ChatMessage;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const LLM_EVENT_CAPACITY: usize = 128;

/// Longest provider error body echoed into a log line.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// A streaming completion request: system instruction, bounded history, and
/// the newest user utterance, in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LlmRequest {
    pub messages: Vec<ChatMessage>,
}

impl LlmRequest {
    /// Assembles a request from the trailing `window` messages of `history`.
    pub fn build(
        system_prompt: &str,
        history: &[ChatMessage],
        window: usize,
        user_text: &str,
    ) -> Self {
        let start = history.len().saturating_sub(window);
        let mut messages = Vec::with_capacity(history.len() - start + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend_from_slice(&history[start..]);
        messages.push(ChatMessage::user(user_text));
        Self { messages }
    }
}

/// Event produced by a token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// An incremental fragment of reply text.
    Delta(String),
    /// The model finished; no further events follow.
    Done,
    /// Terminal failure; no further events follow.
    Error(VoiceError),
}

/// Normalizes a token-streaming language model.
pub trait LlmProvider: Send + Sync {
    fn stream(&self, request: LlmRequest) -> EventStream<LlmEvent>;
}

/// OpenAI-compatible `chat/completions` client using server-sent events.
#[derive(Debug, Clone)]
pub struct ChatCompletionsLlm {
    client: reqwest::Client,
    config: LlmConfig,
}

impl ChatCompletionsLlm {
    pub fn new(config: LlmConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

impl LlmProvider for ChatCompletionsLlm {
    fn stream(&self, request: LlmRequest) -> EventStream<LlmEvent> {
        let (tx, rx) = mpsc::channel(LLM_EVENT_CAPACITY);
        let client = self.client.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            match run_completion(client, config, request, &tx).await {
                Ok(()) => {
                    let _ = tx.send(LlmEvent::Done).await;
                }
                Err(e) => {
                    tracing::warn!("completion stream failed: {}", e);
                    let _ = tx.send(LlmEvent::Error(e)).await;
                }
            }
        });

        ReceiverStream::new(rx).boxed()
    }
}

async fn run_completion(
    client: reqwest::Client,
    config: LlmConfig,
    request: LlmRequest,
    tx: &mpsc::Sender<LlmEvent>,
) -> Result<(), VoiceError> {
    let body = CompletionBody {
        model: &config.model,
        messages: &request.messages,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        stream: true,
    };

    let mut builder = client.post(&config.url).json(&body);
    if !config.api_key.is_empty() {
        builder = builder.bearer_auth(&config.api_key);
    }

    let response = tokio::select! {
        _ = tx.closed() => return Ok(()),
        response = builder.send() => response.map_err(|e| VoiceError::Connect(e.to_string()))?,
    };

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let snippet: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
        return Err(VoiceError::Llm(format!("status {}: {}", status, snippet)));
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::default();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => return Ok(()),
            chunk = body.next() => chunk,
        };
        let payloads = match chunk {
            Some(Ok(bytes)) => decoder.push(&bytes),
            Some(Err(e)) => return Err(VoiceError::Llm(format!("stream interrupted: {}", e))),
            None => decoder.finish(),
        };
        let ended = payloads.finished;
        for payload in payloads {
            if payload == DONE_SENTINEL {
                return Ok(());
            }
            if let Some(delta) = parse_delta(&payload) {
                if tx.send(LlmEvent::Delta(delta)).await.is_err() {
                    return Ok(());
                }
            }
        }
        if ended {
            return Ok(());
        }
    }
}

const DONE_SENTINEL: &str = "[DONE]";

/// `data:` payloads decoded from one network read.
#[derive(Debug, Default)]
pub struct SsePayloads {
    items: Vec<String>,
    finished: bool,
}

impl IntoIterator for SsePayloads {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl SsePayloads {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Splits a server-sent event byte stream into `data:` payloads.
///
/// Network reads may end mid-line or mid-codepoint, so bytes are buffered
/// until a newline arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> SsePayloads {
        self.pending.extend_from_slice(bytes);
        let mut items = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                items.push(data);
            }
        }
        SsePayloads {
            items,
            finished: false,
        }
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> SsePayloads {
        let line = std::mem::take(&mut self.pending);
        SsePayloads {
            items: data_payload(&line).into_iter().collect(),
            finished: true,
        }
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    delta: Option<CompletionDelta>,
}

#[derive(Deserialize)]
struct CompletionDelta {
    content: Option<String>,
}

fn parse_delta(payload: &str) -> Option<String> {
    let chunk: CompletionChunk = match serde_json::from_str(payload) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("skipping unparseable completion chunk: {}", e);
            return None;
        }
    };
    chunk
        .choices
        .into_iter()
        .next()?
        .delta?
        .content
        .filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_keeps_trailing_history_window() {
        let history: Vec<ChatMessage> = (0..12)
            .map(|i| ChatMessage::user(format!("turn {}", i)))
            .collect();
        let request = LlmRequest::build("be brief", &history, 8, "newest");

        assert_eq!(request.messages.len(), 10);
        assert_eq!(request.messages[0], ChatMessage::system("be brief"));
        assert_eq!(request.messages[1].content, "turn 4");
        assert_eq!(request.messages[8].content, "turn 11");
        assert_eq!(request.messages[9], ChatMessage::user("newest"));
    }

    #[test]
    fn decoder_buffers_partial_lines() {
        let mut decoder = SseDecoder::default();
        let first = decoder.push(b"data: {\"a\":");
        assert!(first.is_empty());

        let second = decoder.push(b"1}\n\ndata: [DONE]\n");
        let items: Vec<String> = second.into_iter().collect();
        assert_eq!(items, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn decoder_survives_split_codepoints() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: café\n".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 2);
        assert!(decoder.push(head).is_empty());
        let items: Vec<String> = decoder.push(tail).into_iter().collect();
        assert_eq!(items, vec!["café".to_string()]);
    }

    #[test]
    fn decoder_flushes_unterminated_tail() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\ndata: tail").is_empty());
        let rest = decoder.finish();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn parses_content_deltas() {
        let payload = r#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_delta(payload), Some("Hi".to_string()));

        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_delta(role_only), None);

        assert_eq!(parse_delta(r#"{"choices":[]}"#), None);
    }
}
