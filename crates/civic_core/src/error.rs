use thiserror::Error;

/// Caller supplied a date range that cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid date range: {reason}")]
pub struct InvalidRange {
    pub reason: String,
}

impl InvalidRange {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRange),

    /// Calendar endpoint unreachable after every retry.
    #[error("calendar feed unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },
}

/// Why a single video candidate produced no transcript.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptionError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("video unavailable: {0}")]
    VideoUnavailable(String),

    #[error("captions are disabled for this video")]
    CaptionsDisabled,

    #[error("caption payload could not be parsed: {0}")]
    Parse(String),
}

impl CaptionError {
    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptionError::Network(_) => "network",
            CaptionError::Http { .. } => "http",
            CaptionError::VideoUnavailable(_) => "video_unavailable",
            CaptionError::CaptionsDisabled => "captions_disabled",
            CaptionError::Parse(_) => "parse",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{variable} not set (required by backend '{backend}')")]
    MissingCredential {
        backend: &'static str,
        variable: &'static str,
    },

    #[error("unknown backend '{0}' (choose from groq_llama, gemini, trinity, deepseek_r1)")]
    UnknownBackend(String),

    #[error("HTTP client could not be built: {0}")]
    Client(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored row is not a valid report: {0}")]
    Corrupt(String),
}
