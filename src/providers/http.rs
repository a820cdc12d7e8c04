use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::providers::error::{ProviderError, ProviderResult};

/// Serializes a vendor's outbound calls through a minimum interval since the
/// last call. One gate per adapter instance; vendors are independent, so no
/// cross-vendor coordination is needed.
pub struct RateGate {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Waits until at least `min_interval` has elapsed since the previous
    /// acquisition, then records the new call time. Holding the lock across
    /// the sleep is what serializes concurrent callers.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// HTTP client shared by all vendor adapters: request timeout, bounded retry
/// with 1s/2s/4s backoff on transient failures, and `Retry-After` support on
/// 429 responses. Adapters compose this rather than inheriting shared
/// request logic.
#[derive(Clone)]
pub struct ProviderHttpClient {
    client: Client,
    provider: String,
    timeout: Duration,
    max_retries: u32,
}

impl ProviderHttpClient {
    pub fn new(provider: &str, timeout: Duration, max_retries: u32) -> ProviderResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ProviderError::Network {
                provider: provider.to_string(),
                message: format!("failed to initialize HTTP client: {}", e),
            }
        })?;

        Ok(Self {
            client,
            provider: provider.to_string(),
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> ProviderResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request.send().await.map_err(|e| ProviderError::Network {
                provider: self.provider.clone(),
                message: format!("vendor request failed: {}", e),
            });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let retry_after = parse_retry_after(
                        resp.headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok()),
                    );
                    let text = resp.text().await.unwrap_or_default();

                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            ProviderError::MalformedResponse {
                                message: format!("invalid vendor JSON response: {}", e),
                            }
                        });
                    }

                    if status.as_u16() == 404 {
                        return Err(ProviderError::OrderNotFound {
                            provider: self.provider.clone(),
                            reference: url.to_string(),
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            let delay = retry_after
                                .unwrap_or_else(|| Duration::from_secs(1 << attempt));
                            warn!(
                                provider = %self.provider,
                                attempt = attempt + 1,
                                delay_secs = delay.as_secs(),
                                "vendor rate limit hit, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        return Err(ProviderError::RateLimited {
                            provider: self.provider.clone(),
                            retry_after_secs: retry_after.map(|d| d.as_secs()),
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            provider = %self.provider,
                            status = %status,
                            attempt = attempt + 1,
                            "vendor server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(ProviderError::Vendor {
                        provider: self.provider.clone(),
                        message: format!("HTTP {}: {}", status, text),
                        vendor_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::Network {
            provider: self.provider.clone(),
            message: "vendor request failed".to_string(),
        }))
    }
}

fn parse_retry_after(header: Option<&str>) -> Option<Duration> {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
