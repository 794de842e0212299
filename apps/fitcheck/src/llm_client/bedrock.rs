//! AWS Bedrock transport: `InvokeModelWithResponseStream` against a Claude text model.
//!
//! Each event-stream chunk carries one JSON object whose `completion` field is the delta.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::ResponseStream;
use aws_sdk_bedrockruntime::Client;
use tracing::{debug, info, warn};

use super::{
    decode_chunk, CompletionRequest, CompletionTransport, FragmentStream, TextCompletionBody,
};
use crate::errors::AnalysisError;

pub struct BedrockTransport {
    client: Client,
    model_id: String,
    request_timeout: Duration,
}

impl BedrockTransport {
    pub fn new(client: Client, model_id: String, request_timeout: Duration) -> Self {
        Self {
            client,
            model_id,
            request_timeout,
        }
    }
}

#[async_trait]
impl CompletionTransport for BedrockTransport {
    async fn open(&self, request: &CompletionRequest) -> Result<FragmentStream, AnalysisError> {
        let body = serde_json::to_vec(&TextCompletionBody::new(request))
            .map_err(|e| AnalysisError::Request(format!("failed to encode request: {e}")))?;

        let send = self
            .client
            .invoke_model_with_response_stream()
            .model_id(&self.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send();

        let output = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| {
                AnalysisError::Request(format!(
                    "Bedrock did not answer within {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(|e| AnalysisError::Request(format!("Bedrock: {}", DisplayErrorContext(&e))))?;

        info!(model = %self.model_id, "Bedrock response stream opened");

        let (tx, stream) = FragmentStream::channel();
        let mut events = output.body;

        tokio::spawn(async move {
            loop {
                let Some(next) = tx.until_closed(events.recv()).await else {
                    debug!("Consumer stopped; dropping Bedrock stream");
                    return;
                };
                match next {
                    Ok(Some(ResponseStream::Chunk(part))) => {
                        let Some(blob) = part.bytes() else {
                            continue;
                        };
                        match decode_chunk(blob.as_ref()) {
                            Ok(Some(text)) => {
                                if !tx.fragment(text).await {
                                    debug!("Consumer stopped; dropping Bedrock stream");
                                    return;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!("Undecodable Bedrock chunk: {e}");
                                tx.fail(format!("malformed chunk: {e}")).await;
                                return;
                            }
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => return,
                    Err(e) => {
                        warn!("Bedrock stream failed: {}", DisplayErrorContext(&e));
                        tx.fail(format!("Bedrock: {}", DisplayErrorContext(&e))).await;
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "bedrock"
    }
}
