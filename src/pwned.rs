//! Breached-password oracle.
//!
//! Queries a haveibeenpwned-compatible range API using the k-anonymity
//! scheme: only the first five hex characters of the SHA-1 digest leave
//! the process; the matching suffix is looked up in the response locally.

use crate::errors::{ApiError, Result};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_API_URL: &str = "https://api.pwnedpasswords.com";

/// Interface the password field uses to check candidate passwords.
#[async_trait]
pub trait PasswordOracle: Send + Sync {
    /// How often the password appears in known breaches.
    async fn breach_count(&self, password: &str) -> Result<u64>;
}

/// Range-API client for the breach corpus.
pub struct PwnedPasswords {
    client: reqwest::Client,
    base_url: String,
}

impl PwnedPasswords {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_API_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("http client construction cannot fail with static options");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl Default for PwnedPasswords {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PasswordOracle for PwnedPasswords {
    #[instrument(skip(self, password))]
    async fn breach_count(&self, password: &str) -> Result<u64> {
        let mut hasher = Sha1::new();
        hasher.update(password.as_bytes());
        let digest = format!("{:X}", hasher.finalize());
        let (prefix, suffix) = digest.split_at(5);

        let url = format!("{}/range/{}", self.base_url, prefix);
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| ApiError::bad_request(format!("breach lookup failed: {}", e)))?
            .text()
            .await
            .map_err(|e| ApiError::bad_request(format!("breach lookup failed: {}", e)))?;

        for line in body.lines() {
            let mut parts = line.trim().splitn(2, ':');
            let line_suffix = parts.next().unwrap_or("");
            if line_suffix.eq_ignore_ascii_case(suffix) {
                let count = parts
                    .next()
                    .and_then(|c| c.trim().parse::<u64>().ok())
                    .unwrap_or(0);
                debug!("Password found in breach corpus ({} occurrences)", count);
                return Ok(count);
            }
        }

        Ok(0)
    }
}
