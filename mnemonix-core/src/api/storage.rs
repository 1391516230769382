//! Stored narration audio, fetched over plain HTTP GET.
//!
//! The backend stores the raw s16le bytes of a previously synthesized
//! narration (24 kHz mono); there is no container format to parse.

use std::time::Duration;

use tracing::debug;

use super::{classify_failure, with_retry, AssetFetcher, RetryPolicy};
use crate::error::{MnemonixError, Result};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpAssetFetcher {
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
}

impl HttpAssetFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn fetch_once(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &body));
        }
        Ok(response.bytes()?.to_vec())
    }
}

impl AssetFetcher for HttpAssetFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(MnemonixError::Protocol(format!(
                "unsupported asset url: {url}"
            )));
        }
        let bytes = with_retry(&self.retry, || self.fetch_once(url))?;
        debug!(url, bytes = bytes.len(), "stored narration fetched");
        Ok(bytes)
    }
}
