use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mediabot_core::models::proxy::ProxyEntry;
use mediabot_core::PipelineError;
use thiserror::Error;

pub const DEFAULT_FORMAT: &str = "best[ext=mp4]/best";

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";

/// Options for one extraction attempt. Resolvers start from `ExtractOptions::new`
/// and override the user agent, cookie file and proxy.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub output_dir: PathBuf,
    pub format: String,
    pub expand_playlist: bool,
    pub user_agent: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub proxy: Option<ProxyEntry>,
    pub socket_timeout_secs: u64,
    pub retries: u32,
}

impl ExtractOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            format: DEFAULT_FORMAT.to_string(),
            expand_playlist: false,
            user_agent: Some(DESKTOP_USER_AGENT.to_string()),
            cookie_file: None,
            proxy: None,
            socket_timeout_secs: 15,
            retries: 3,
        }
    }

    pub fn with_proxy(&self, proxy: Option<ProxyEntry>) -> Self {
        Self {
            proxy,
            ..self.clone()
        }
    }

    /// Uses the cookie file only if it exists on disk.
    pub fn with_cookie_file_if_present(mut self, path: Option<&Path>) -> Self {
        match path {
            Some(p) if p.is_file() => {
                tracing::debug!("using cookie file {}", p.display());
                self.cookie_file = Some(p.to_path_buf());
            }
            Some(p) => {
                tracing::debug!("cookie file {} not present, continuing without", p.display());
            }
            None => {}
        }
        self
    }
}

/// Files written by a successful extraction plus the extractor's metadata document.
#[derive(Debug)]
pub struct Extraction {
    pub files: Vec<PathBuf>,
    pub info: serde_json::Value,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExtractorError {
    pub message: String,
}

impl ExtractorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn class(&self) -> FailureClass {
        classify_failure(&self.message)
    }

    /// Maps an unrecovered extractor failure onto the pipeline taxonomy.
    pub fn into_pipeline_error(self) -> PipelineError {
        match self.class() {
            FailureClass::RateLimited => PipelineError::RateLimited {
                tried: 0,
                last_error: self.message,
            },
            FailureClass::Network => PipelineError::NetworkError(self.message),
            FailureClass::ImageOnly | FailureClass::Other => {
                PipelineError::NoMediaFound(self.message)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The post has no playable stream; it is a still image.
    ImageOnly,
    RateLimited,
    Network,
    Other,
}

const IMAGE_ONLY_SIGNATURES: &[&str] = &["no video formats found", "there is no video in this post"];

const RATE_LIMIT_SIGNATURES: &[&str] = &[
    "http error 429",
    "too many requests",
    "rate-limit",
    "rate limit",
    "login required",
    "login_required",
    "checkpoint_required",
    "requested content is not available",
    "please wait a few minutes",
    "http error 401",
    "http error 403",
];

const NETWORK_SIGNATURES: &[&str] = &[
    "timed out",
    "connection refused",
    "connection reset",
    "network is unreachable",
    "temporary failure in name resolution",
    "unable to download webpage",
    "eof occurred",
    "http error 5",
];

/// Classifies free-form extractor error text. The only place that knows the
/// substring lists.
pub fn classify_failure(message: &str) -> FailureClass {
    let lowered = message.to_lowercase();
    let matches = |signatures: &[&str]| signatures.iter().any(|s| lowered.contains(s));

    if matches(IMAGE_ONLY_SIGNATURES) {
        FailureClass::ImageOnly
    } else if matches(RATE_LIMIT_SIGNATURES) {
        FailureClass::RateLimited
    } else if matches(NETWORK_SIGNATURES) {
        FailureClass::Network
    } else {
        FailureClass::Other
    }
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Downloads the media behind `url` into `opts.output_dir`.
    async fn extract(&self, url: &str, opts: &ExtractOptions) -> Result<Extraction, ExtractorError>;

    /// Metadata only, tolerating posts without playable formats.
    async fn probe(&self, url: &str, opts: &ExtractOptions)
        -> Result<serde_json::Value, ExtractorError>;
}
