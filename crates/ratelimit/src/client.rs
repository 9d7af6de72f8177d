//! Rate-limited HTTP client for the match-data provider.

use std::sync::Arc;
use std::time::Duration;

use matchwatch_common::config::ApiConfig;
use matchwatch_common::{AppError, AppResult};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::circuit_breaker::FailureKind;
use crate::limiter::RateLimiter;

const USER_AGENT: &str = concat!("matchwatch/", env!("CARGO_PKG_VERSION"));

/// HTTP client that routes every request through a shared [`RateLimiter`].
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
    api_key_header: String,
    limiter: Arc<RateLimiter>,
}

impl ApiClient {
    /// Create a client for the configured provider.
    pub fn new(config: &ApiConfig, limiter: Arc<RateLimiter>) -> AppResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| AppError::Config(format!("invalid api.base_url: {e}")))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            api_key_header: config.api_key_header.clone(),
            limiter,
        })
    }

    /// The limiter guarding this client.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// GET `path` relative to the base URL and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        const METHOD: &str = "GET";

        let url = self
            .base_url
            .join(path)
            .map_err(|e| AppError::Internal(format!("invalid request path {path}: {e}")))?;

        self.limiter.wait_if_needed(path, METHOD).await?;

        let mut request = self.http.get(url.clone());
        if let Some(key) = &self.api_key {
            request = request.header(self.api_key_header.as_str(), key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                self.limiter
                    .record_failure(path, METHOD, FailureKind::Timeout)
                    .await;
                warn!(url = %url, "Request timed out");
                return Err(AppError::Timeout(format!("GET {path}")));
            }
            Err(e) => {
                self.limiter
                    .record_failure(path, METHOD, FailureKind::ServerError)
                    .await;
                warn!(url = %url, error = %e, "Request failed");
                return Err(AppError::ExternalService(e.to_string()));
            }
        };

        let status = response.status();
        self.limiter
            .update_limits(response.headers(), path, METHOD)
            .await;
        debug!(url = %url, status = status.as_u16(), "Provider responded");

        if status.is_success() {
            self.limiter.record_success(path, METHOD).await;
            return response
                .json::<T>()
                .await
                .map_err(|e| AppError::ExternalService(format!("invalid response body: {e}")));
        }

        match FailureKind::from_status(status.as_u16()) {
            Some(FailureKind::RateLimit) => {
                let delay = self.limiter.handle_429(response.headers(), path).await;
                Err(AppError::rate_limited(
                    format!("provider returned 429 for GET {path}"),
                    Some(delay),
                ))
            }
            Some(kind) => {
                self.limiter.record_failure(path, METHOD, kind).await;
                Err(AppError::ExternalService(format!(
                    "provider returned {status} for GET {path}"
                )))
            }
            None if status == StatusCode::NOT_FOUND => Err(AppError::NotFound(path.to_string())),
            None => Err(AppError::ExternalService(format!(
                "provider returned {status} for GET {path}"
            ))),
        }
    }
}
