/// LLM Client: the single point of entry for completion calls in fitcheck.
///
/// Every analysis goes through `LlmClient::stream`, which hands the prompt to a
/// `CompletionTransport` and returns a pull-based `FragmentStream`.
/// Transports decode their own wire format; the stream only ever carries text deltas.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::AnalysisError;

pub mod anthropic;
pub mod bedrock;
pub mod prompts;

/// Fragments buffered between a transport task and the consumer.
/// The producer awaits once this many are pending.
const FRAGMENT_BUFFER: usize = 32;

/// Generation tunables sent with every completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Upper bound on generated length.
    pub max_tokens: u32,
    /// 0.0 – 1.0, higher is more diverse.
    pub temperature: f32,
    pub top_k: u32,
    /// Nucleus-sampling cutoff.
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.5,
            top_k: 250,
            top_p: 1.0,
            stop_sequences: vec!["\n\nHuman:".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub sampling: SamplingConfig,
}

/// Legacy text-completion body shared by Bedrock and the Anthropic complete API.
#[derive(Debug, Serialize)]
struct TextCompletionBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    prompt: &'a str,
    max_tokens_to_sample: u32,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    stop_sequences: &'a [String],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> TextCompletionBody<'a> {
    fn new(request: &'a CompletionRequest) -> Self {
        Self {
            model: None,
            prompt: &request.prompt,
            max_tokens_to_sample: request.sampling.max_tokens,
            temperature: request.sampling.temperature,
            top_k: request.sampling.top_k,
            top_p: request.sampling.top_p,
            stop_sequences: &request.sampling.stop_sequences,
            stream: false,
        }
    }
}

/// One decoded chunk of a streamed text completion.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    completion: String,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Decodes one self-describing JSON chunk and returns its text delta.
/// Empty deltas (stop markers, pings) come back as `None`.
fn decode_chunk(bytes: &[u8]) -> Result<Option<String>, serde_json::Error> {
    let chunk: CompletionChunk = serde_json::from_slice(bytes)?;
    if let Some(reason) = &chunk.stop_reason {
        debug!("Completion stopped: {reason}");
    }
    if chunk.completion.is_empty() {
        Ok(None)
    } else {
        Ok(Some(chunk.completion))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fragment stream
// ────────────────────────────────────────────────────────────────────────────

/// What a transport task pushes into the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Fragment(String),
    Failed(String),
}

/// Lifecycle of one completion stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    NotStarted,
    Streaming,
    Completed,
    Failed,
}

/// Producer half handed to a transport task.
#[derive(Debug, Clone)]
pub struct FragmentSender {
    tx: mpsc::Sender<StreamEvent>,
}

impl FragmentSender {
    /// Pushes a fragment, waiting while the consumer is behind.
    /// Returns `false` once the consumer has gone away; the transport should stop reading.
    pub async fn fragment(&self, text: String) -> bool {
        self.tx.send(StreamEvent::Fragment(text)).await.is_ok()
    }

    pub async fn fail(&self, message: impl Into<String>) {
        let _ = self.tx.send(StreamEvent::Failed(message.into())).await;
    }

    /// Awaits `fut` unless the consumer closes first, in which case `fut` is
    /// dropped and `None` comes back. Transports wrap every read from the
    /// service in this so a stalled connection is released on close.
    pub async fn until_closed<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.tx.closed() => None,
            out = fut => Some(out),
        }
    }
}

/// Pull-based sequence of completion fragments. Finite and not restartable.
///
/// The sequence ends with `None` when the transport closes normally. A transport
/// failure is yielded once as `Some(Err(..))`: `Request` if nothing had been
/// delivered yet, `StreamInterrupted` otherwise. Fragments already yielded stay valid.
pub struct FragmentStream {
    rx: Option<mpsc::Receiver<StreamEvent>>,
    status: StreamStatus,
    delivered: usize,
    idle_timeout: Option<Duration>,
}

impl FragmentStream {
    pub fn channel() -> (FragmentSender, FragmentStream) {
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        (
            FragmentSender { tx },
            FragmentStream {
                rx: Some(rx),
                status: StreamStatus::NotStarted,
                delivered: 0,
                idle_timeout: None,
            },
        )
    }

    /// Bounds how long `next` waits for any single fragment.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    /// Number of fragments yielded so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub async fn next(&mut self) -> Option<Result<String, AnalysisError>> {
        let rx = self.rx.as_mut()?;
        if self.status == StreamStatus::NotStarted {
            self.status = StreamStatus::Streaming;
        }

        let event = match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx.recv()).await {
                Ok(event) => event,
                Err(_) => Some(StreamEvent::Failed(format!(
                    "no fragment received within {}s",
                    limit.as_secs()
                ))),
            },
            None => rx.recv().await,
        };

        match event {
            Some(StreamEvent::Fragment(text)) => {
                self.delivered += 1;
                Some(Ok(text))
            }
            Some(StreamEvent::Failed(message)) => {
                self.finish(StreamStatus::Failed);
                if self.delivered == 0 {
                    Some(Err(AnalysisError::Request(message)))
                } else {
                    Some(Err(AnalysisError::StreamInterrupted(message)))
                }
            }
            None => {
                self.finish(StreamStatus::Completed);
                None
            }
        }
    }

    /// Stops consuming. The transport task sees the closed channel on its next send.
    pub fn close(&mut self) {
        if self.rx.is_some() {
            debug!(delivered = self.delivered, "Fragment stream closed by consumer");
        }
        self.rx = None;
    }

    fn finish(&mut self, status: StreamStatus) {
        self.status = status;
        self.rx = None;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport trait + client
// ────────────────────────────────────────────────────────────────────────────

/// A completion backend able to open an incremental response.
///
/// `open` resolves once the service has accepted the request; rejection,
/// auth and network failures at that point are `AnalysisError::Request`.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn open(&self, request: &CompletionRequest) -> Result<FragmentStream, AnalysisError>;

    fn name(&self) -> &'static str;
}

/// The completion client used by the analysis pipeline.
#[derive(Clone)]
pub struct LlmClient {
    transport: Arc<dyn CompletionTransport>,
    sampling: SamplingConfig,
    idle_timeout: Duration,
}

impl LlmClient {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        sampling: SamplingConfig,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            sampling,
            idle_timeout,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.transport.name()
    }

    /// Opens a streamed completion for `prompt` with the configured sampling.
    pub async fn stream(&self, prompt: &str) -> Result<FragmentStream, AnalysisError> {
        if prompt.trim().is_empty() {
            return Err(AnalysisError::Request("prompt is empty".to_string()));
        }

        let request = CompletionRequest {
            prompt: prompt.to_string(),
            sampling: self.sampling.clone(),
        };

        info!(
            backend = self.transport.name(),
            prompt_chars = prompt.len(),
            max_tokens = request.sampling.max_tokens,
            "Opening completion stream"
        );

        match self.transport.open(&request).await {
            Ok(stream) => Ok(stream.with_idle_timeout(self.idle_timeout)),
            Err(e) => {
                warn!(backend = self.transport.name(), "Completion request rejected: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted transport for tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    pub struct ScriptedTransport {
        events: Vec<StreamEvent>,
        reject: Option<String>,
        pub opened: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn fragments(fragments: &[&str]) -> Self {
            Self::events(
                fragments
                    .iter()
                    .map(|f| StreamEvent::Fragment(f.to_string()))
                    .collect(),
            )
        }

        pub fn events(events: Vec<StreamEvent>) -> Self {
            Self {
                events,
                reject: None,
                opened: AtomicUsize::new(0),
            }
        }

        pub fn rejecting(message: &str) -> Self {
            Self {
                events: vec![],
                reject: Some(message.to_string()),
                opened: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn open(&self, _request: &CompletionRequest) -> Result<FragmentStream, AnalysisError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.reject {
                return Err(AnalysisError::Request(message.clone()));
            }
            let (tx, stream) = FragmentStream::channel();
            let events = self.events.clone();
            tokio::spawn(async move {
                for event in events {
                    match event {
                        StreamEvent::Fragment(text) => {
                            if !tx.fragment(text).await {
                                return;
                            }
                        }
                        StreamEvent::Failed(message) => {
                            tx.fail(message).await;
                            return;
                        }
                    }
                }
            });
            Ok(stream)
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;

    fn client(transport: ScriptedTransport) -> LlmClient {
        LlmClient::new(
            Arc::new(transport),
            SamplingConfig::default(),
            Duration::from_secs(5),
        )
    }

    async fn drain(stream: &mut FragmentStream) -> (Vec<String>, Option<AnalysisError>) {
        let mut fragments = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(f) => fragments.push(f),
                Err(e) => return (fragments, Some(e)),
            }
        }
        (fragments, None)
    }

    #[tokio::test]
    async fn test_yields_fragments_in_transport_order() {
        let parts = ["The ", "candi", "date ", "fits."];
        let mut stream = client(ScriptedTransport::fragments(&parts))
            .stream("prompt")
            .await
            .unwrap();

        let (fragments, err) = drain(&mut stream).await;
        assert!(err.is_none());
        assert_eq!(fragments, parts);
        assert_eq!(fragments.concat(), "The candidate fits.");
        assert_eq!(stream.status(), StreamStatus::Completed);
        assert_eq!(stream.delivered(), 4);
    }

    #[tokio::test]
    async fn test_failure_after_fragments_is_stream_interrupted() {
        let transport = ScriptedTransport::events(vec![
            StreamEvent::Fragment("f1".into()),
            StreamEvent::Fragment("f2".into()),
            StreamEvent::Failed("connection reset".into()),
            StreamEvent::Fragment("never".into()),
        ]);
        let mut stream = client(transport).stream("prompt").await.unwrap();

        let (fragments, err) = drain(&mut stream).await;
        assert_eq!(fragments, vec!["f1", "f2"]);
        assert_eq!(
            err,
            Some(AnalysisError::StreamInterrupted("connection reset".into()))
        );
        assert_eq!(stream.status(), StreamStatus::Failed);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failure_before_first_fragment_is_request_error() {
        let transport = ScriptedTransport::events(vec![StreamEvent::Failed("403".into())]);
        let mut stream = client(transport).stream("prompt").await.unwrap();

        let (fragments, err) = drain(&mut stream).await;
        assert!(fragments.is_empty());
        assert!(matches!(err, Some(AnalysisError::Request(_))));
    }

    #[tokio::test]
    async fn test_rejected_open_is_request_error() {
        let err = client(ScriptedTransport::rejecting("bad credentials"))
            .stream("prompt")
            .await
            .err()
            .unwrap();
        assert_eq!(err, AnalysisError::Request("bad credentials".into()));
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected_without_opening() {
        let transport = Arc::new(ScriptedTransport::fragments(&["x"]));
        let llm = LlmClient::new(
            transport.clone(),
            SamplingConfig::default(),
            Duration::from_secs(5),
        );
        let err = llm.stream("   ").await.err().unwrap();
        assert!(matches!(err, AnalysisError::Request(_)));
        assert_eq!(
            transport.opened.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_close_stops_the_sequence_and_the_producer() {
        let (tx, mut stream) = FragmentStream::channel();
        assert!(tx.fragment("first".into()).await);
        assert_eq!(stream.next().await, Some(Ok("first".to_string())));

        stream.close();
        assert!(stream.next().await.is_none());
        assert_eq!(tx.until_closed(async { "read" }).await, None);
        assert!(!tx.fragment("late".into()).await);
    }

    #[tokio::test]
    async fn test_until_closed_passes_through_while_open() {
        let (tx, _stream) = FragmentStream::channel();
        assert_eq!(tx.until_closed(async { 7 }).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_a_stalled_reader() {
        let (tx, mut stream) = FragmentStream::channel();
        let reader = tokio::spawn(async move {
            // stands in for a service connection that never sends another event
            tx.until_closed(std::future::pending::<()>()).await
        });
        tokio::task::yield_now().await;

        stream.close();
        let released = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader should stop once the stream is closed")
            .unwrap();
        assert_eq!(released, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_after_fragment_interrupts() {
        let (tx, stream) = FragmentStream::channel();
        let mut stream = stream.with_idle_timeout(Duration::from_secs(30));
        assert!(tx.fragment("partial".into()).await);
        assert_eq!(stream.next().await, Some(Ok("partial".to_string())));

        let next = stream.next().await;
        assert!(matches!(next, Some(Err(AnalysisError::StreamInterrupted(_)))));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_before_fragment_is_request_error() {
        let (_tx, stream) = FragmentStream::channel();
        let mut stream = stream.with_idle_timeout(Duration::from_secs(30));
        assert!(matches!(
            stream.next().await,
            Some(Err(AnalysisError::Request(_)))
        ));
    }

    #[test]
    fn test_decode_chunk_extracts_completion() {
        let chunk = br#"{"completion":" Strong","stop_reason":null,"stop":null}"#;
        assert_eq!(decode_chunk(chunk).unwrap(), Some(" Strong".to_string()));
    }

    #[test]
    fn test_decode_chunk_empty_delta_is_none() {
        let chunk = br#"{"completion":"","stop_reason":"stop_sequence"}"#;
        assert_eq!(decode_chunk(chunk).unwrap(), None);
    }

    #[test]
    fn test_decode_chunk_rejects_garbage() {
        assert!(decode_chunk(b"not json").is_err());
    }

    #[test]
    fn test_body_serializes_sampling_fields() {
        let request = CompletionRequest {
            prompt: "p".into(),
            sampling: SamplingConfig::default(),
        };
        let body = serde_json::to_value(TextCompletionBody::new(&request)).unwrap();
        assert_eq!(body["max_tokens_to_sample"], 2000);
        assert_eq!(body["top_k"], 250);
        assert_eq!(body["stop_sequences"][0], "\n\nHuman:");
        assert!(body.get("model").is_none());
        assert!(body.get("stream").is_none());
    }
}
