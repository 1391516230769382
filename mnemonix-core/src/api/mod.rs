//! Clients for the generative speech API and the narration asset store.
//!
//! Both sit behind traits ([`SpeechSynthesizer`], [`AssetFetcher`]) so the
//! narration player can be driven by fixtures in tests.

pub mod gemini;
pub mod storage;

pub use gemini::GeminiTts;
pub use storage::HttpAssetFetcher;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MnemonixError, Result};

/// Prebuilt voice used for narration and the live tutor.
pub const DEFAULT_VOICE: &str = "Kore";

/// Learner's native language; narration explanations and the live tutor use it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    Uzbek,
    Kazakh,
    Tajik,
    Kyrgyz,
    Russian,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Uzbek,
        Language::Kazakh,
        Language::Tajik,
        Language::Kyrgyz,
        Language::Russian,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Uzbek => "Uzbek",
            Language::Kazakh => "Kazakh",
            Language::Tajik => "Tajik",
            Language::Kyrgyz => "Kyrgyz",
            Language::Russian => "Russian",
        }
    }

    /// ISO 639-1 code.
    pub fn code(self) -> &'static str {
        match self {
            Language::Uzbek => "uz",
            Language::Kazakh => "kk",
            Language::Tajik => "tg",
            Language::Kyrgyz => "ky",
            Language::Russian => "ru",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown language: {0:?}")]
pub struct ParseLanguageError(pub String);

impl FromStr for Language {
    type Err = ParseLanguageError;

    /// Accepts English names and ISO codes in any case.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        Language::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(wanted) || l.code().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseLanguageError(s.to_string()))
    }
}

/// Turns narration text into base64 s16le PCM (24 kHz mono).
pub trait SpeechSynthesizer: Send + Sync {
    /// # Errors
    /// `RateLimited` on quota exhaustion, `Upstream`/`Http` otherwise.
    fn synthesize(&self, text: &str, language: Language) -> Result<String>;
}

/// Fetches stored narration audio as raw s16le bytes.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Map a failed HTTP response to an error variant.
///
/// Quota exhaustion (429, `RESOURCE_EXHAUSTED`, "quota exceeded") becomes
/// `RateLimited`; 5xx is a retryable `Upstream`; anything else is final.
pub fn classify_failure(status: u16, body: &str) -> MnemonixError {
    let message = error_message(body);

    let quota = status == 429
        || body.contains("RESOURCE_EXHAUSTED")
        || body.to_ascii_lowercase().contains("quota exceeded");
    if quota {
        return MnemonixError::RateLimited(message);
    }

    MnemonixError::Upstream {
        status,
        retryable: (500..600).contains(&status),
        message,
    }
}

/// `error.message` of a Google API error body, else the trimmed body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().chars().take(300).collect())
}

/// Exponential backoff for quota and server errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound of the uniform random delay added to every wait.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_secs(2),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Wait before retry number `attempt + 1`, without jitter:
    /// `(2^(attempt+1) - 1) * base_delay`, i.e. 2 s, 6 s, 14 s, 30 s.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = (1u32 << (attempt + 1).min(16)) - 1;
        self.base_delay * factor
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = self.max_jitter.as_secs_f64() * rand::thread_rng().gen::<f64>();
        self.backoff(attempt) + Duration::from_secs_f64(jitter)
    }
}

/// Run `op`, retrying retryable failures according to `policy`.
///
/// Non-retryable errors and the last failure are returned unchanged.
pub fn with_retry<T>(policy: &RetryPolicy, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after error: {e}"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    #[test]
    fn language_parses_names_and_codes_leniently() {
        assert_eq!(" uzbek ".parse::<Language>().unwrap(), Language::Uzbek);
        assert_eq!("KK".parse::<Language>().unwrap(), Language::Kazakh);
        assert_eq!("Russian".parse::<Language>().unwrap(), Language::Russian);
        assert!("Klingon".parse::<Language>().is_err());
        assert_eq!(Language::Tajik.to_string(), "Tajik");
    }

    #[test]
    fn quota_failures_are_rate_limited() {
        assert!(classify_failure(429, "").is_rate_limited());
        let body = r#"{"error":{"code":400,"message":"Quota exceeded for model","status":"RESOURCE_EXHAUSTED"}}"#;
        match classify_failure(400, body) {
            MnemonixError::RateLimited(msg) => assert_eq!(msg, "Quota exceeded for model"),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        assert!(classify_failure(503, "unavailable").is_retryable());
        let err = classify_failure(400, "bad request");
        assert!(!err.is_retryable());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn backoff_follows_the_doubling_schedule() {
        let policy = RetryPolicy::default();
        let secs: Vec<u64> = (0..4).map(|a| policy.backoff(a).as_secs()).collect();
        assert_eq!(secs, vec![2, 6, 14, 30]);
        let delay = policy.delay_for(0);
        assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_secs(3));
    }

    #[test]
    fn retries_transient_failures_until_success() {
        let mut calls = 0;
        let result = with_retry(&instant_policy(4), || {
            calls += 1;
            if calls < 3 {
                Err(MnemonixError::RateLimited("slow down".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<()> = with_retry(&instant_policy(2), || {
            calls += 1;
            Err(classify_failure(500, "boom"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn does_not_retry_final_errors() {
        let mut calls = 0;
        let result: Result<()> = with_retry(&instant_policy(4), || {
            calls += 1;
            Err(MnemonixError::EmptyPayload)
        });
        assert!(matches!(result, Err(MnemonixError::EmptyPayload)));
        assert_eq!(calls, 1);
    }
}
