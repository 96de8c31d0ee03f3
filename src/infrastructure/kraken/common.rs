//! Shared REST plumbing for the exchange adapter: retrying HTTP client,
//! process-wide rate budget, the response envelope and HMAC-SHA512
//! request signing for private endpoints.

use crate::domain::errors::{ExecutionError, MarketDataError};
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use sha2::{Digest, Sha256, Sha512};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// REST calls here live inside tight budgets elsewhere in the pipeline:
/// the staleness guard caps a targeted refresh at 10s and the live fill
/// poll runs 10 x 500ms. Per-request deadlines stay well under those
/// windows so a hung request degrades a symbol instead of a budget, and
/// transient failures get a short retry rather than an open-ended one.
const REQUEST_DEADLINE_SECS: u64 = 8;
const CONNECT_DEADLINE_SECS: u64 = 4;
const TRANSIENT_RETRIES: u32 = 2;

pub fn create_http_client() -> ClientWithMiddleware {
    let base = Client::builder()
        .timeout(Duration::from_secs(REQUEST_DEADLINE_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_DEADLINE_SECS))
        .build()
        .unwrap_or_default();

    ClientBuilder::new(base)
        .with(RetryTransientMiddleware::new_with_policy(
            ExponentialBackoff::builder().build_with_max_retries(TRANSIENT_RETRIES),
        ))
        .build()
}

/// Token-bucket budget shared by every REST path in the process
/// (~15-20 requests per second for the whole bot).
pub struct RateBudget {
    capacity: f64,
    state: Mutex<BudgetState>,
}

struct BudgetState {
    tokens: f64,
    last_refill: Instant,
}

impl RateBudget {
    pub fn new(requests_per_sec: u32) -> Self {
        let capacity = f64::from(requests_per_sec.max(1));
        Self {
            capacity,
            state: Mutex::new(BudgetState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Waits until a request token is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.capacity).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                (1.0 - state.tokens) / self.capacity
            };
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

/// Signs a private endpoint request:
/// `HMAC-SHA512(path + SHA256(nonce + body), base64_decode(secret))`,
/// base64-encoded.
pub fn sign_request(path: &str, nonce: i64, body: &str, secret_b64: &str) -> Result<String> {
    let secret = BASE64
        .decode(secret_b64)
        .context("API secret is not valid base64")?;

    let mut sha = Sha256::new();
    sha.update(format!("{}{}", nonce, body).as_bytes());
    let digest = sha.finalize();

    let mut message = Vec::with_capacity(path.len() + digest.len());
    message.extend_from_slice(path.as_bytes());
    message.extend_from_slice(&digest);

    type HmacSha512 = Hmac<Sha512>;
    let mut mac =
        HmacSha512::new_from_slice(&secret).context("HMAC can take key of any size")?;
    mac.update(&message);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

pub struct KrakenRestClient {
    http: ClientWithMiddleware,
    base_url: String,
    credentials: Option<(String, String)>,
    budget: Arc<RateBudget>,
    nonce: AtomicI64,
}

impl KrakenRestClient {
    pub fn new(
        base_url: &str,
        credentials: Option<(String, String)>,
        budget: Arc<RateBudget>,
    ) -> Self {
        Self {
            http: create_http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            budget,
            nonce: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Monotonically increasing nonce (ms-based).
    fn next_nonce(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        match self
            .nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(prev.max(now - 1) + 1)
            }) {
            Ok(prev) => prev.max(now - 1) + 1,
            Err(_) => now,
        }
    }

    /// Calls a public endpoint (`/0/public/...`) with form-encoded params
    /// and unwraps the `{error: [], result: ...}` envelope.
    pub async fn public_get(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        self.budget.acquire().await;

        let mut url = format!("{}/0/public/{}", self.base_url, endpoint);
        if !params.is_empty() {
            let query: String = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", endpoint))?;

        if response.status().as_u16() == 429 {
            return Err(MarketDataError::RateLimitExceeded {
                retry_after_secs: 5,
            }
            .into());
        }

        let envelope: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("invalid JSON from {}", endpoint))?;
        unwrap_envelope(envelope, endpoint)
    }

    /// Calls a private endpoint (`/0/private/...`) with a signed
    /// form-encoded body.
    pub async fn private_post(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value, ExecutionError> {
        let (api_key, api_secret) =
            self.credentials
                .as_ref()
                .ok_or_else(|| ExecutionError::CredentialsMissing {
                    context: format!("private call to {}", endpoint),
                })?;

        self.budget.acquire().await;

        let nonce = self.next_nonce();
        let path = format!("/0/private/{}", endpoint);

        let mut body = format!("nonce={}", nonce);
        for (k, v) in params {
            body.push('&');
            body.push_str(k);
            body.push('=');
            body.push_str(v);
        }

        let signature =
            sign_request(&path, nonce, &body, api_secret).map_err(|e| ExecutionError::Exchange {
                message: format!("signing failed: {}", e),
            })?;

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header("API-Key", api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| ExecutionError::Exchange {
                message: format!("request to {} failed: {}", endpoint, e),
            })?;

        if response.status().as_u16() == 429 {
            return Err(ExecutionError::RateLimited {
                retry_after_secs: 5,
            });
        }

        let envelope: serde_json::Value =
            response.json().await.map_err(|e| ExecutionError::Exchange {
                message: format!("invalid JSON from {}: {}", endpoint, e),
            })?;

        unwrap_envelope(envelope, endpoint).map_err(|e| {
            let message = e.to_string();
            if message.contains("Rate limit") {
                ExecutionError::RateLimited {
                    retry_after_secs: 5,
                }
            } else {
                ExecutionError::Exchange { message }
            }
        })
    }
}

/// Unwraps the `{error: [...], result: ...}` response envelope.
fn unwrap_envelope(envelope: serde_json::Value, endpoint: &str) -> Result<serde_json::Value> {
    if let Some(errors) = envelope.get("error").and_then(|e| e.as_array())
        && !errors.is_empty()
    {
        let joined: Vec<String> = errors
            .iter()
            .filter_map(|e| e.as_str().map(|s| s.to_string()))
            .collect();
        anyhow::bail!("{} returned errors: {}", endpoint, joined.join("; "));
    }
    envelope
        .get("result")
        .cloned()
        .with_context(|| format!("{} response missing result", endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic_and_base64() {
        let secret = BASE64.encode(b"super-secret-key-material");
        let a = sign_request("/0/private/AddOrder", 1_700_000_000_000, "nonce=1", &secret)
            .unwrap();
        let b = sign_request("/0/private/AddOrder", 1_700_000_000_000, "nonce=1", &secret)
            .unwrap();
        assert_eq!(a, b);
        // HMAC-SHA512 output is 64 bytes -> 88 base64 chars.
        assert_eq!(a.len(), 88);
        assert!(BASE64.decode(&a).is_ok());
    }

    #[test]
    fn test_signature_varies_with_inputs() {
        let secret = BASE64.encode(b"super-secret-key-material");
        let base = sign_request("/0/private/AddOrder", 1, "nonce=1", &secret).unwrap();
        assert_ne!(
            base,
            sign_request("/0/private/AddOrder", 2, "nonce=2", &secret).unwrap()
        );
        assert_ne!(
            base,
            sign_request("/0/private/Balance", 1, "nonce=1", &secret).unwrap()
        );
    }

    #[test]
    fn test_invalid_secret_rejected() {
        assert!(sign_request("/0/private/AddOrder", 1, "nonce=1", "not base64!!").is_err());
    }

    #[test]
    fn test_envelope_unwrap() {
        let ok = serde_json::json!({ "error": [], "result": { "a": 1 } });
        assert_eq!(
            unwrap_envelope(ok, "Ticker").unwrap(),
            serde_json::json!({ "a": 1 })
        );

        let err = serde_json::json!({ "error": ["EGeneral:Invalid arguments"] });
        assert!(unwrap_envelope(err, "Ticker").is_err());
    }

    #[tokio::test]
    async fn test_rate_budget_allows_burst_up_to_capacity() {
        let budget = RateBudget::new(10);
        let start = std::time::Instant::now();
        for _ in 0..10 {
            budget.acquire().await;
        }
        // A burst within capacity must not sleep.
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
