mod analysis;
mod config;
mod errors;
mod extraction;
mod llm_client;
mod models;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::pipeline::Analyzer;
use crate::analysis::session::SessionStore;
use crate::config::{CompletionProvider, Config, ExtractorKind};
use crate::extraction::{LocalPdfExtractor, TextExtractor, TextractExtractor};
use crate::llm_client::anthropic::AnthropicTransport;
use crate::llm_client::bedrock::BedrockTransport;
use crate::llm_client::prompts::RESUME_ANALYST_TEMPLATE;
use crate::llm_client::{CompletionTransport, LlmClient};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::S3BlobStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting fitcheck v{}", env!("CARGO_PKG_VERSION"));

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()))
        .load()
        .await;

    // Blob store
    let store = Arc::new(S3BlobStore::new(
        build_s3_client(&sdk_config, &config),
        config.s3_bucket.clone(),
    ));
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // Text extractor
    let extractor: Arc<dyn TextExtractor> = match config.extractor {
        ExtractorKind::Textract => Arc::new(TextractExtractor::new(
            aws_sdk_textract::Client::new(&sdk_config),
        )),
        ExtractorKind::Local => Arc::new(LocalPdfExtractor),
    };
    info!("Text extractor initialized ({})", extractor.name());

    // Completion transport
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let transport: Arc<dyn CompletionTransport> = match config.completion_provider {
        CompletionProvider::Bedrock => Arc::new(BedrockTransport::new(
            aws_sdk_bedrockruntime::Client::new(&sdk_config),
            config.model_id.clone(),
            timeout,
        )),
        CompletionProvider::Anthropic => {
            let api_key = config
                .anthropic_api_key
                .clone()
                .context("ANTHROPIC_API_KEY is not set")?;
            Arc::new(AnthropicTransport::new(api_key, config.model_id.clone(), timeout)?)
        }
    };
    let llm = LlmClient::new(transport, config.sampling.clone(), timeout);
    info!(
        "LLM client initialized (backend: {}, model: {})",
        llm.backend(),
        config.model_id
    );

    let analyzer = Analyzer {
        store,
        extractor,
        llm,
        template: RESUME_ANALYST_TEMPLATE,
        allow_empty_extraction: config.allow_empty_extraction,
    };

    // Build app state
    let state = AppState {
        sessions: SessionStore::default(),
        analyzer: Arc::new(analyzer),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client for AWS, or for MinIO when `S3_ENDPOINT` is set.
fn build_s3_client(sdk_config: &SdkConfig, config: &Config) -> aws_sdk_s3::Client {
    let mut builder = aws_sdk_s3::config::Builder::from(sdk_config);
    if let Some(endpoint) = &config.s3_endpoint {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }
    aws_sdk_s3::Client::from_conf(builder.build())
}
