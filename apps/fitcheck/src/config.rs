use anyhow::{bail, Context, Result};

use crate::llm_client::SamplingConfig;

/// Which completion backend streams the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionProvider {
    Bedrock,
    Anthropic,
}

/// Which text extractor reads the uploaded resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    Textract,
    Local,
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub s3_bucket: String,
    pub s3_endpoint: Option<String>,
    pub aws_region: String,
    pub completion_provider: CompletionProvider,
    pub model_id: String,
    pub anthropic_api_key: Option<String>,
    pub extractor: ExtractorKind,
    pub sampling: SamplingConfig,
    pub request_timeout_secs: u64,
    /// Older revisions forwarded empty OCR output to the model; off by default.
    pub allow_empty_extraction: bool,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let completion_provider = match lookup("COMPLETION_PROVIDER").as_deref() {
            None | Some("bedrock") => CompletionProvider::Bedrock,
            Some("anthropic") => CompletionProvider::Anthropic,
            Some(other) => bail!("COMPLETION_PROVIDER must be 'bedrock' or 'anthropic', got '{other}'"),
        };

        let extractor = match lookup("EXTRACTOR").as_deref() {
            None | Some("textract") => ExtractorKind::Textract,
            Some("local") => ExtractorKind::Local,
            Some(other) => bail!("EXTRACTOR must be 'textract' or 'local', got '{other}'"),
        };

        let anthropic_api_key = lookup("ANTHROPIC_API_KEY");
        if completion_provider == CompletionProvider::Anthropic && anthropic_api_key.is_none() {
            bail!("ANTHROPIC_API_KEY is required when COMPLETION_PROVIDER=anthropic");
        }

        let model_id = lookup("MODEL_ID").unwrap_or_else(|| match completion_provider {
            CompletionProvider::Bedrock => "anthropic.claude-v2".to_string(),
            CompletionProvider::Anthropic => "claude-2.1".to_string(),
        });

        let defaults = SamplingConfig::default();
        let sampling = SamplingConfig {
            max_tokens: parse_or(&lookup, "MAX_TOKENS", defaults.max_tokens)?,
            temperature: parse_or(&lookup, "TEMPERATURE", defaults.temperature)?,
            top_k: parse_or(&lookup, "TOP_K", defaults.top_k)?,
            top_p: parse_or(&lookup, "TOP_P", defaults.top_p)?,
            stop_sequences: defaults.stop_sequences,
        };
        if !(0.0..=1.0).contains(&sampling.temperature) {
            bail!("TEMPERATURE must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&sampling.top_p) {
            bail!("TOP_P must be between 0.0 and 1.0");
        }

        Ok(Config {
            s3_bucket: lookup("S3_BUCKET")
                .context("Required environment variable 'S3_BUCKET' is not set")?,
            s3_endpoint: lookup("S3_ENDPOINT"),
            aws_region: lookup("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            completion_provider,
            model_id,
            anthropic_api_key,
            extractor,
            sampling,
            request_timeout_secs: parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 60)?,
            allow_empty_extraction: parse_or(&lookup, "ALLOW_EMPTY_EXTRACTION", false)?,
            port: parse_or(&lookup, "PORT", 8080)?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("{key} has an invalid value: '{raw}'")),
        None => Ok(default),
    }
}
