use thiserror::Error;

/// All errors produced by mnemonix-core.
///
/// Codec functions never return these: malformed audio degrades to an empty
/// result instead. Everything above the codec (scheduler, player, session,
/// API clients) propagates through this type.
#[derive(Debug, Error)]
pub enum MnemonixError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("rate limit or quota exceeded: {0}")]
    RateLimited(String),

    #[error("upstream API error (status {status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("no playable audio in payload")]
    EmptyPayload,

    #[error("live transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MnemonixError {
    /// Quota exhaustion, as opposed to any other failure.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, MnemonixError::RateLimited(_))
    }

    /// Whether an API call failing with this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            MnemonixError::RateLimited(_) => true,
            MnemonixError::Upstream { retryable, .. } => *retryable,
            MnemonixError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MnemonixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_quota_and_server_failures_are_retryable() {
        assert!(MnemonixError::RateLimited("429".into()).is_retryable());
        assert!(MnemonixError::Upstream {
            status: 503,
            message: "unavailable".into(),
            retryable: true,
        }
        .is_retryable());
        assert!(!MnemonixError::Upstream {
            status: 400,
            message: "bad request".into(),
            retryable: false,
        }
        .is_retryable());
        assert!(!MnemonixError::EmptyPayload.is_retryable());
    }

    #[test]
    fn rate_limit_is_distinguishable() {
        assert!(MnemonixError::RateLimited("quota".into()).is_rate_limited());
        assert!(!MnemonixError::AudioStream("gone".into()).is_rate_limited());
    }
}
