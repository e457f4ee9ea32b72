// src/services/fetcher.rs

//! Paced, retrying page fetcher.
//!
//! Transient faults (timeouts, connection failures, 5xx, 429, 408) are
//! retried with linear backoff up to the configured attempt bound. Other
//! 4xx responses are permanent. Only the final outcome leaves this module.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use url::Url;

use crate::error::{FetchError, Result};
use crate::models::CrawlerConfig;
use crate::services::pacing::Pacer;
use crate::utils::{http::create_async_client, origin_of};

/// A fetched page.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Requested URL
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub status_code: u16,
    pub body: String,
    /// Time spent on the successful attempt, pacing excluded
    pub elapsed_ms: u64,
    pub size_bytes: usize,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// HTTP fetcher sharing one session and one pacer across all callers.
pub struct Fetcher {
    client: Client,
    pacer: Pacer,
    max_attempts: u32,
    backoff_base: Duration,
}

impl Fetcher {
    /// Create a fetcher from crawler settings.
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            pacer: Pacer::from_config(config),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        })
    }

    /// Fetch a page, retrying transient failures.
    ///
    /// Succeeds only on a 2xx status.
    pub async fn fetch(&self, url: &str) -> std::result::Result<FetchResponse, FetchError> {
        let origin = Self::origin(url)?;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let retry_reason = match self.send(url, &origin, attempt).await {
                Ok(response) if (200..300).contains(&response.status_code) => {
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status_code;
                    if !Self::is_retryable_status(status) || attempt >= self.max_attempts {
                        return Err(FetchError::Status {
                            url: url.to_string(),
                            status,
                            attempts: attempt,
                        });
                    }
                    format!("HTTP {status}")
                }
                Err(e) => {
                    if !Self::is_retryable_error(&e) || attempt >= self.max_attempts {
                        return Err(FetchError::Transport {
                            url: url.to_string(),
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    e.to_string()
                }
            };

            let backoff = self.backoff_base * attempt;
            log::warn!(
                "Attempt {}/{} for {} failed ({}), retrying in {}ms",
                attempt,
                self.max_attempts,
                url,
                retry_reason,
                backoff.as_millis()
            );
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
        }
    }

    /// Fetch once, without retries, returning whatever status the server sent.
    pub async fn fetch_once(&self, url: &str) -> std::result::Result<FetchResponse, FetchError> {
        let origin = Self::origin(url)?;
        self.send(url, &origin, 1)
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                attempts: 1,
                message: e.to_string(),
            })
    }

    /// One paced request. Holds the origin permit until the body is read.
    async fn send(
        &self,
        url: &str,
        origin: &str,
        attempt: u32,
    ) -> std::result::Result<FetchResponse, reqwest::Error> {
        let _permit = self.pacer.acquire(origin).await;
        log::debug!("GET {} (attempt {})", url, attempt);

        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        let body = response.text().await?;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        Ok(FetchResponse {
            url: url.to_string(),
            final_url,
            status_code: status.as_u16(),
            size_bytes: body.len(),
            body,
            elapsed_ms,
            attempts: attempt,
        })
    }

    fn origin(url: &str) -> std::result::Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        origin_of(&parsed).ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
            message: "URL has no network origin".to_string(),
        })
    }

    fn is_retryable_status(status: u16) -> bool {
        status == StatusCode::REQUEST_TIMEOUT.as_u16()
            || status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            || (500..600).contains(&status)
    }

    fn is_retryable_error(error: &reqwest::Error) -> bool {
        error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> CrawlerConfig {
        CrawlerConfig {
            min_delay_ms: Some(0),
            max_delay_ms: Some(0),
            backoff_base_ms: 0,
            ..CrawlerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>ok</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let response = fetcher
            .fetch(&format!("{}/page", server.uri()))
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.attempts, 3);
        assert_eq!(response.body, "<p>ok</p>");
        assert_eq!(response.size_bytes, 9);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/page", server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(502));
        assert_eq!(err.attempts(), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert_eq!(err.attempts(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_and_request_timeout_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(408))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let response = fetcher.fetch(&server.uri()).await.unwrap();
        assert_eq!(response.attempts, 3);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let mut config = fast_config();
        config.max_attempts = 2;
        let fetcher = Fetcher::new(&config).unwrap();

        let err = fetcher.fetch("http://127.0.0.1:1/").await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_identity_is_sent_as_user_agent() {
        let config = fast_config();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", config.user_agent.as_str()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&config).unwrap();
        let response = fetcher.fetch(&server.uri()).await.unwrap();
        assert_eq!(response.status_code, 200);
    }

    #[tokio::test]
    async fn test_cookies_persist_across_fetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "session=abc123; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/account"))
            .and(header("cookie", "session=abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>welcome</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        fetcher
            .fetch(&format!("{}/login", server.uri()))
            .await
            .unwrap();
        let response = fetcher
            .fetch(&format!("{}/account", server.uri()))
            .await
            .unwrap();
        assert_eq!(response.body, "<p>welcome</p>");
    }

    #[tokio::test]
    async fn test_same_origin_requests_run_one_at_a_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let config = CrawlerConfig {
            min_delay_ms: Some(150),
            max_delay_ms: Some(150),
            ..fast_config()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let first = format!("{}/one", server.uri());
        let second = format!("{}/two", server.uri());

        let start = Instant::now();
        let (a, b) = tokio::join!(fetcher.fetch(&first), fetcher.fetch(&second));
        a.unwrap();
        b.unwrap();

        // Each request waits out its own delay behind the other
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_fetch_once_returns_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let response = fetcher.fetch_once(&server.uri()).await.unwrap();
        assert_eq!(response.status_code, 500);
    }
}
