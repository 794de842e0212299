//! Resume analysis pipeline.
//!
//! Flow: blob store put → text extraction → prompt assembly → completion stream,
//! strictly sequential. `start` covers everything up to an open stream; `relay`
//! drains the stream into display updates.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::analysis::display::{DisplayAccumulator, CURSOR};
use crate::errors::AnalysisError;
use crate::extraction::TextExtractor;
use crate::llm_client::prompts::assemble;
use crate::llm_client::{FragmentStream, LlmClient};
use crate::models::document::ResumeDocument;
use crate::storage::{derive_object_key, BlobStore};

/// Collaborators and policy for running analyses.
pub struct Analyzer {
    pub store: Arc<dyn BlobStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub llm: LlmClient,
    pub template: &'static str,
    /// Forward empty OCR output to the model instead of halting.
    pub allow_empty_extraction: bool,
}

impl Analyzer {
    /// Runs every step up to an open completion stream. Any failure here is
    /// reported before a single fragment is shown.
    pub async fn start(
        &self,
        job_description: &str,
        document: &ResumeDocument,
        today: NaiveDate,
    ) -> Result<FragmentStream, AnalysisError> {
        let key = derive_object_key(&document.filename, today);
        info!(filename = %document.filename, %key, "Uploading resume");
        let location = self.store.put(document, &key).await?;

        info!(extractor = self.extractor.name(), "Extracting text from uploaded resume");
        let resume_text = self.extractor.extract_lines(document, &location).await?;

        if resume_text.trim().is_empty() {
            if !self.allow_empty_extraction {
                return Err(AnalysisError::Extraction(format!(
                    "no text detected in '{}'",
                    document.filename
                )));
            }
            warn!(%location, "No text extracted; continuing with an empty resume section");
        }

        let prompt = assemble(self.template, &resume_text, job_description);
        self.llm.stream(&prompt).await
    }
}

/// One update for the display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayUpdate {
    /// A new fragment. Clients append `delta` to what they show and keep
    /// `cursor` after it until `Done` or `Failed` arrives.
    Fragment { delta: String, cursor: char },
    /// Stream ended normally; final text without cursor.
    Done { text: String },
    /// Stream broke after partial delivery. `partial` stays displayed.
    Failed {
        kind: &'static str,
        message: String,
        partial: String,
    },
}

/// How a relayed stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Completed(String),
    Failed { partial: String, error: AnalysisError },
    /// The display side went away before the stream ended.
    Abandoned { partial: String },
}

impl AnalysisOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, AnalysisOutcome::Completed(_))
    }

    /// Everything accumulated, whether or not the stream finished.
    pub fn text(&self) -> &str {
        match self {
            AnalysisOutcome::Completed(text) => text,
            AnalysisOutcome::Failed { partial, .. } | AnalysisOutcome::Abandoned { partial } => {
                partial
            }
        }
    }

    pub fn error(&self) -> Option<&AnalysisError> {
        match self {
            AnalysisOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Drains `fragments` in arrival order, pushing one update per fragment and a
/// terminal `Done` or `Failed`. Closes the stream if `updates` is dropped.
pub async fn relay(
    mut fragments: FragmentStream,
    updates: mpsc::Sender<DisplayUpdate>,
) -> AnalysisOutcome {
    let mut display = DisplayAccumulator::default();

    loop {
        match fragments.next().await {
            Some(Ok(delta)) => {
                display.push(&delta);
                let update = DisplayUpdate::Fragment {
                    delta,
                    cursor: CURSOR,
                };
                if updates.send(update).await.is_err() {
                    fragments.close();
                    let chars = display.text_len();
                    info!(
                        delivered = fragments.delivered(),
                        chars,
                        "Display closed; abandoning completion stream"
                    );
                    return AnalysisOutcome::Abandoned {
                        partial: display.finish(),
                    };
                }
            }
            Some(Err(error)) => {
                warn!(delivered = fragments.delivered(), "Completion stream failed: {error}");
                let partial = display.finish();
                let _ = updates
                    .send(DisplayUpdate::Failed {
                        kind: error.kind(),
                        message: error.to_string(),
                        partial: partial.clone(),
                    })
                    .await;
                return AnalysisOutcome::Failed { partial, error };
            }
            None => {
                let text = display.finish();
                info!(
                    status = ?fragments.status(),
                    delivered = fragments.delivered(),
                    chars = text.len(),
                    "Completion stream finished"
                );
                let _ = updates.send(DisplayUpdate::Done { text: text.clone() }).await;
                return AnalysisOutcome::Completed(text);
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory collaborators for pipeline and handler tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::llm_client::testing::ScriptedTransport;
    use crate::llm_client::SamplingConfig;
    use crate::storage::BlobLocation;

    #[derive(Default)]
    pub struct MemoryBlobStore {
        pub fail: bool,
        pub keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for MemoryBlobStore {
        async fn put(&self, _document: &ResumeDocument, key: &str) -> Result<BlobLocation, AnalysisError> {
            if self.fail {
                return Err(AnalysisError::Upload("bucket does not exist".into()));
            }
            self.keys.lock().unwrap().push(key.to_string());
            Ok(BlobLocation {
                bucket: "test-bucket".into(),
                key: key.to_string(),
            })
        }
    }

    pub struct FixedExtractor {
        pub result: Result<String, AnalysisError>,
        pub calls: AtomicUsize,
        /// Sleeps this long before answering.
        pub delay: Option<Duration>,
    }

    impl FixedExtractor {
        pub fn text(text: &str) -> Self {
            Self {
                result: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                result: Err(AnalysisError::Extraction(message.to_string())),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        /// Answers only after an hour, i.e. never within a test.
        pub fn stalled() -> Self {
            Self {
                delay: Some(Duration::from_secs(3600)),
                ..Self::text("Built X")
            }
        }
    }

    #[async_trait]
    impl TextExtractor for FixedExtractor {
        async fn extract_lines(
            &self,
            _document: &ResumeDocument,
            _location: &BlobLocation,
        ) -> Result<String, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    pub fn analyzer(
        store: Arc<MemoryBlobStore>,
        extractor: Arc<FixedExtractor>,
        transport: Arc<ScriptedTransport>,
    ) -> Analyzer {
        Analyzer {
            store,
            extractor,
            llm: LlmClient::new(transport, SamplingConfig::default(), Duration::from_secs(5)),
            template: "T:",
            allow_empty_extraction: false,
        }
    }
}
