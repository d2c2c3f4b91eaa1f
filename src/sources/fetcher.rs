//! HTTP retrieval shared by both scrapers.
//!
//! Redirects are followed by hand (the client's own policy is disabled)
//! so that each hop is counted against an explicit budget and the body of
//! every 3xx response is drained before the next request goes out.
//! No retries happen here; transient failures surface as
//! `EngineError::Network` / `EngineError::Timeout` for the caller.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use tracing::debug;

use crate::config::FetchConfig;
use crate::types::EngineError;

const ACCEPT_HTML_JSON: &str =
    "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8";

/// Browser-like GET client with bounded redirect following.
#[derive(Clone)]
pub struct Fetcher {
    http: Client,
    max_redirects: u8,
}

impl Fetcher {
    pub fn new(cfg: &FetchConfig) -> Result<Self, EngineError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML_JSON));
        let lang = HeaderValue::from_str(&cfg.accept_language)
            .map_err(|e| EngineError::Config(format!("invalid accept_language: {e}")))?;
        headers.insert(ACCEPT_LANGUAGE, lang);

        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .redirect(Policy::none())
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            max_redirects: cfg.max_redirects,
        })
    }

    /// Fetch with the configured redirect budget.
    pub async fn get_text(&self, url: &str) -> Result<String, EngineError> {
        self.fetch(url, self.max_redirects).await
    }

    /// GET `url`, following up to `max_redirects` redirects, and return the
    /// body of the final 2xx response as text.
    pub async fn fetch(&self, url: &str, max_redirects: u8) -> Result<String, EngineError> {
        let mut current = Url::parse(url).map_err(|e| EngineError::InvalidUrl(format!("{url}: {e}")))?;
        let mut remaining = max_redirects;

        loop {
            let resp = self
                .http
                .get(current.clone())
                .send()
                .await
                .map_err(|e| classify(current.as_str(), e))?;
            let status = resp.status();

            if status.is_redirection() {
                let location = resp
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);

                // Drain so the connection goes back to the pool.
                let _ = resp.bytes().await;

                let Some(location) = location else {
                    return Err(EngineError::HttpStatus {
                        url: current.to_string(),
                        status: status.as_u16(),
                    });
                };
                if remaining == 0 {
                    return Err(EngineError::TooManyRedirects {
                        url: url.to_string(),
                        max: max_redirects,
                    });
                }
                remaining -= 1;

                let next = current
                    .join(&location)
                    .map_err(|e| EngineError::InvalidUrl(format!("{location}: {e}")))?;
                debug!(from = %current, to = %next, status = status.as_u16(), remaining, "Following redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                let _ = resp.bytes().await;
                return Err(EngineError::HttpStatus {
                    url: current.to_string(),
                    status: status.as_u16(),
                });
            }

            return resp.text().await.map_err(|e| classify(current.as_str(), e));
        }
    }
}

fn classify(url: &str, err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::Timeout { url: url.to_string() }
    } else {
        EngineError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(timeout_secs: u64) -> Fetcher {
        Fetcher::new(&FetchConfig {
            timeout_secs,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    /// Mount `/hop0 -> /hop1 -> ... -> /hop{hops}` where the last one is a 200.
    async fn mount_chain(server: &MockServer, hops: usize) {
        for i in 0..hops {
            Mock::given(method("GET"))
                .and(path(format!("/hop{i}")))
                .respond_with(
                    ResponseTemplate::new(301)
                        .insert_header("Location", format!("/hop{}", i + 1).as_str())
                        .set_body_string("moved"),
                )
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path(format!("/hop{hops}")))
            .respond_with(ResponseTemplate::new(200).set_body_string("final"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_plain_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header_exists("accept-language"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let body = fetcher(5).fetch(&format!("{}/page", server.uri()), 3).await.unwrap();
        assert_eq!(body, "<html></html>");
    }

    #[tokio::test]
    async fn test_three_hops_within_budget() {
        let server = MockServer::start().await;
        mount_chain(&server, 3).await;

        let body = fetcher(5).fetch(&format!("{}/hop0", server.uri()), 3).await.unwrap();
        assert_eq!(body, "final");
    }

    #[tokio::test]
    async fn test_four_hops_exceeds_budget() {
        let server = MockServer::start().await;
        mount_chain(&server, 4).await;

        let err = fetcher(5).fetch(&format!("{}/hop0", server.uri()), 3).await.unwrap_err();
        assert!(matches!(err, EngineError::TooManyRedirects { max: 3, .. }));
    }

    #[tokio::test]
    async fn test_redirect_without_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302))
            .mount(&server)
            .await;

        let err = fetcher(5).fetch(&server.uri(), 3).await.unwrap_err();
        assert!(matches!(err, EngineError::HttpStatus { status: 302, .. }));
    }

    #[tokio::test]
    async fn test_absolute_location() {
        let server = MockServer::start().await;
        let target = format!("{}/landing", server.uri());
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", target.as_str()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/landing"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let body = fetcher(5).fetch(&format!("{}/start", server.uri()), 1).await.unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher(5).get_text(&server.uri()).await.unwrap_err();
        assert!(matches!(err, EngineError::HttpStatus { status: 503, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = fetcher(1).get_text(&server.uri()).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Port 9 (discard) on localhost is reliably closed in test sandboxes.
        let err = fetcher(2).get_text("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, EngineError::Network { .. } | EngineError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let err = fetcher(2).get_text("not a url").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidUrl(_)));
    }
}
