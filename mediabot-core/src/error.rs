use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported link: {0}")]
    UnsupportedLink(String),

    #[error("no media found: {0}")]
    NoMediaFound(String),

    #[error("rate limited after trying {tried} proxies: {last_error}")]
    RateLimited { tried: usize, last_error: String },

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Short, non-technical description shown to end users in place of `{error}`.
    pub fn user_label(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedLink(_) => "this link is not supported",
            PipelineError::NoMediaFound(_) => "no downloadable media was found",
            PipelineError::RateLimited { .. } => "the platform is busy, try again later",
            PipelineError::NetworkError(_) => "a connection problem occurred",
            PipelineError::SendFailed(_) => "the media could not be uploaded",
            PipelineError::Storage(_) | PipelineError::Io(_) | PipelineError::Internal(_) => {
                "an internal problem occurred"
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedLink(_) => "unsupported_link",
            PipelineError::NoMediaFound(_) => "no_media_found",
            PipelineError::RateLimited { .. } => "rate_limited",
            PipelineError::NetworkError(_) => "network_error",
            PipelineError::SendFailed(_) => "send_failed",
            PipelineError::Storage(_) => "storage",
            PipelineError::Io(_) => "io",
            PipelineError::Internal(_) => "internal",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
