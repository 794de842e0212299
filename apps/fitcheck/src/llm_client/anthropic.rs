//! Anthropic text-completions transport (`/v1/complete`, `stream: true`).
//!
//! The response is Server-Sent Events. `completion` events carry a JSON chunk with
//! the text delta, `ping` events are ignored and an `error` event ends the stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    decode_chunk, CompletionRequest, CompletionTransport, FragmentSender, FragmentStream,
    TextCompletionBody,
};
use crate::errors::AnalysisError;

const ANTHROPIC_COMPLETE_URL: &str = "https://api.anthropic.com/v1/complete";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

pub struct AnthropicTransport {
    client: Client,
    api_key: String,
    model: String,
    url: String,
    request_timeout: Duration,
}

impl AnthropicTransport {
    pub fn new(api_key: String, model: String, request_timeout: Duration) -> anyhow::Result<Self> {
        // No overall client timeout: it would also cut off long generations mid-body.
        let client = Client::builder().connect_timeout(request_timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model,
            url: ANTHROPIC_COMPLETE_URL.to_string(),
            request_timeout,
        })
    }
}

#[async_trait]
impl CompletionTransport for AnthropicTransport {
    async fn open(&self, request: &CompletionRequest) -> Result<FragmentStream, AnalysisError> {
        let mut body = TextCompletionBody::new(request);
        body.model = Some(self.model.as_str());
        body.stream = true;

        let send = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| {
                AnalysisError::Request(format!(
                    "Anthropic API did not answer within {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(|e| AnalysisError::Request(format!("HTTP error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Try to parse error message
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(AnalysisError::Request(format!(
                "API error (status {}): {message}",
                status.as_u16()
            )));
        }

        info!(model = %self.model, "Anthropic completion stream opened");

        let (tx, stream) = FragmentStream::channel();
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            loop {
                let Some(next) = tx.until_closed(bytes.next()).await else {
                    debug!("Consumer stopped; dropping Anthropic stream");
                    return;
                };
                let Some(chunk) = next else {
                    break;
                };
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Anthropic stream failed: {e}");
                        tx.fail(format!("HTTP error: {e}")).await;
                        return;
                    }
                };
                for event in decoder.feed(&chunk) {
                    if !forward(&tx, event).await {
                        return;
                    }
                }
            }
            if let Some(event) = decoder.finish() {
                forward(&tx, event).await;
            }
        });

        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

/// Routes one SSE event into the fragment channel. Returns `false` when the stream must stop.
async fn forward(tx: &FragmentSender, event: SseEvent) -> bool {
    match event.event.as_deref() {
        Some("error") => {
            let message = serde_json::from_str::<AnthropicError>(&event.data)
                .map(|e| e.error.message)
                .unwrap_or(event.data);
            tx.fail(message).await;
            false
        }
        Some("ping") => true,
        _ => match decode_chunk(event.data.as_bytes()) {
            Ok(Some(text)) => {
                let open = tx.fragment(text).await;
                if !open {
                    debug!("Consumer stopped; dropping Anthropic stream");
                }
                open
            }
            Ok(None) => true,
            Err(e) => {
                tx.fail(format!("malformed chunk: {e}")).await;
                false
            }
        },
    }
}

/// A single Server-Sent Event.
#[derive(Debug, Clone, PartialEq)]
struct SseEvent {
    event: Option<String>,
    data: String,
}

/// Incremental SSE decoder. Bytes are buffered until a full line is available,
/// so multi-byte characters split across network chunks survive.
#[derive(Default)]
struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = self.feed_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        events
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        // blank line --> event boundary
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    /// Flushes an event left open when the body ended without a trailing blank line.
    fn finish(mut self) -> Option<SseEvent> {
        if !self.buf.is_empty() {
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            self.feed_line(line.trim_end_matches('\r'));
        }
        self.take_event()
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_parses_completion_events() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(
            b"event: completion\ndata: {\"completion\":\" Hi\"}\n\nevent: ping\ndata: {}\n\n",
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("completion"));
        assert_eq!(events[0].data, "{\"completion\":\" Hi\"}");
        assert_eq!(events[1].event.as_deref(), Some("ping"));
    }

    #[test]
    fn test_decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"event: compl").is_empty());
        assert!(decoder.feed(b"etion\r\ndata: {\"completion\":\"caf\xc3").is_empty());
        let events = decoder.feed(b"\xa9\"}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"completion\":\"café\"}");
    }

    #[test]
    fn test_decoder_ignores_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b": keep-alive\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_decoder_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"event: completion\ndata: {\"completion\":\"end\"}").is_empty());
        let event = decoder.finish().unwrap();
        assert_eq!(event.data, "{\"completion\":\"end\"}");
    }

    #[tokio::test]
    async fn test_forward_error_event_fails_stream() {
        let (tx, mut stream) = FragmentStream::channel();
        assert!(
            forward(
                &tx,
                SseEvent {
                    event: Some("completion".into()),
                    data: r#"{"completion":"Good"}"#.into(),
                },
            )
            .await
        );
        assert!(
            !forward(
                &tx,
                SseEvent {
                    event: Some("error".into()),
                    data: r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
                        .into(),
                },
            )
            .await
        );
        drop(tx);

        assert_eq!(stream.next().await, Some(Ok("Good".to_string())));
        assert_eq!(
            stream.next().await,
            Some(Err(AnalysisError::StreamInterrupted("Overloaded".into())))
        );
    }

    #[tokio::test]
    async fn test_forward_skips_ping_and_empty_deltas() {
        let (tx, mut stream) = FragmentStream::channel();
        assert!(
            forward(
                &tx,
                SseEvent {
                    event: Some("ping".into()),
                    data: "{}".into(),
                },
            )
            .await
        );
        assert!(
            forward(
                &tx,
                SseEvent {
                    event: Some("completion".into()),
                    data: r#"{"completion":"","stop_reason":"stop_sequence"}"#.into(),
                },
            )
            .await
        );
        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
