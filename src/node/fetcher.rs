//! Subscription fetcher with bounded retries and base64 unwrapping
//!
//! This module provides functionality for:
//! - Downloading subscription bodies with a tuned HTTP client
//! - Retrying transient failures with capped exponential backoff
//! - Unwrapping bodies that are a base64-encoded node list

use crate::node::parser::{has_json_framing, has_structured_marker};
use crate::Result;
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA};
use reqwest::{redirect, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Default timeout for a single request in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 45_000;

/// Default number of attempts per source
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default redirect limit
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// First backoff delay in milliseconds, doubled on every further attempt
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Upper bound for a single backoff delay in milliseconds
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 5_000;

/// Default user agent; many subscription providers only serve clients they recognize
pub const DEFAULT_USER_AGENT: &str = "clash-verge/v1.6.6";

const ACCEPT_VALUE: &str = "text/yaml,application/yaml,text/plain,*/*";
const ACCEPT_LANGUAGE_VALUE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Lenient decoder: URL-safe input is normalized beforehand, padding is optional
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Reasons a fetch did not produce a body
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

/// Configuration for the subscription fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for a single request
    pub timeout: Duration,
    /// Total attempts per source, at least one
    pub max_attempts: u32,
    /// Redirects followed before giving up
    pub max_redirects: usize,
    /// Skip TLS certificate validation
    pub accept_invalid_certs: bool,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// First backoff delay
    pub backoff_base: Duration,
    /// Largest backoff delay
    pub backoff_cap: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            accept_invalid_certs: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}

/// Downloads subscription bodies
#[derive(Debug, Clone)]
pub struct NodeFetcher {
    config: FetcherConfig,
    client: Client,
}

impl NodeFetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(FetcherConfig::default())
    }

    /// Create a new fetcher with custom configuration
    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetch a source, retrying up to the configured number of attempts
    ///
    /// Returns the body, base64-unwrapped when it looks like an encoded node list.
    pub async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
        self.fetch_with_attempts(url, self.config.max_attempts).await
    }

    pub async fn fetch_with_attempts(
        &self,
        url: &str,
        max_attempts: u32,
    ) -> std::result::Result<String, FetchError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("Fetching (attempt {}/{}): {}", attempt, max_attempts, url);
            match self.fetch_once(url).await {
                Ok(body) => {
                    info!("Fetched {}", url);
                    return Ok(unwrap_base64(body));
                }
                Err(e) => {
                    warn!(
                        "Fetch failed (attempt {}/{}) {}: {}",
                        attempt, max_attempts, url, e
                    );
                    if attempt >= max_attempts {
                        return Err(FetchError::Exhausted {
                            attempts: max_attempts,
                            last: Box::new(e),
                        });
                    }
                    let delay = self.config.backoff_delay(attempt);
                    debug!("Retrying in {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(FetchError::Status(status));
        }
        Ok(response.text().await?)
    }
}

/// Replace the body with its base64 decoding when the decoded text looks like
/// a node list
///
/// Bodies that already carry a structured-list marker or JSON framing are left
/// alone. Otherwise the decoded text replaces the body if it contains `://` or
/// a structured-list marker.
pub fn unwrap_base64(body: String) -> String {
    if has_structured_marker(&body) || has_json_framing(&body) {
        return body;
    }

    match decode_base64_lenient(&body) {
        Some(decoded) if decoded.contains("://") || has_structured_marker(&decoded) => {
            debug!("Detected base64-encoded body, decoded");
            decoded
        }
        _ => body,
    }
}

/// Decode standard or URL-safe base64, ignoring whitespace and padding
pub fn decode_base64_lenient(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    if normalized.is_empty() {
        return None;
    }

    let bytes = LENIENT_BASE64.decode(normalized.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

    #[test]
    fn test_fetcher_config_default() {
        let config = FetcherConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert!(config.accept_invalid_certs);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_fetcher_config_builder() {
        let config = FetcherConfig::new()
            .with_timeout(Duration::from_secs(5))
            .with_max_attempts(7)
            .with_max_redirects(1)
            .with_accept_invalid_certs(false)
            .with_user_agent("custom".to_string());

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.max_redirects, 1);
        assert!(!config.accept_invalid_certs);
        assert_eq!(config.user_agent, "custom");
    }

    #[test]
    fn test_fetcher_keeps_its_config() {
        let fetcher =
            NodeFetcher::with_config(FetcherConfig::new().with_max_attempts(7)).unwrap();
        assert_eq!(fetcher.config().max_attempts, 7);
        assert_eq!(fetcher.config().timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let config = FetcherConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(config.backoff_delay(4), Duration::from_millis(5000));
        assert_eq!(config.backoff_delay(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_unwrap_base64_uri_list() {
        let encoded = STANDARD.encode("vmess://abc\ntrojan://def");
        assert_eq!(unwrap_base64(encoded), "vmess://abc\ntrojan://def");
    }

    #[test]
    fn test_unwrap_base64_wrapped_lines_and_url_safe() {
        let encoded = STANDARD.encode("ss://YWVz@1.2.3.4:1#a?b>c");
        let wrapped = format!("{}\n{}\n", &encoded[..10], &encoded[10..]);
        assert_eq!(unwrap_base64(wrapped), "ss://YWVz@1.2.3.4:1#a?b>c");

        let url_safe = URL_SAFE_NO_PAD.encode("trojan://p@h:1?x=>>>");
        assert_eq!(unwrap_base64(url_safe), "trojan://p@h:1?x=>>>");
    }

    #[test]
    fn test_unwrap_base64_structured() {
        let encoded = STANDARD.encode("proxies:\n  - {type: ss}");
        assert_eq!(unwrap_base64(encoded), "proxies:\n  - {type: ss}");
    }

    #[test]
    fn test_unwrap_base64_leaves_plain_bodies() {
        let plain = "vmess://abc\ntrojan://def".to_string();
        assert_eq!(unwrap_base64(plain.clone()), plain);

        let yaml = "proxies:\n  - name: a".to_string();
        assert_eq!(unwrap_base64(yaml.clone()), yaml);

        let json = "[\"vmess://abc\"]".to_string();
        assert_eq!(unwrap_base64(json.clone()), json);
    }

    #[test]
    fn test_unwrap_base64_ignores_unrelated_payload() {
        let encoded = STANDARD.encode("just some words");
        assert_eq!(unwrap_base64(encoded.clone()), encoded);
    }

    #[test]
    fn test_decode_base64_lenient_rejects_garbage() {
        assert!(decode_base64_lenient("").is_none());
        assert!(decode_base64_lenient("not base64 at all!").is_none());
    }

    mod http {
        use super::*;
        use crate::node::models::Scheme;
        use crate::node::{Node, NodeParser};
        use std::time::Instant;
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn fast_fetcher(max_attempts: u32) -> NodeFetcher {
            NodeFetcher::with_config(
                FetcherConfig::new()
                    .with_max_attempts(max_attempts)
                    .with_timeout(Duration::from_secs(5))
                    .with_backoff(Duration::from_millis(1), Duration::from_millis(5)),
            )
            .unwrap()
        }

        #[tokio::test]
        async fn test_retries_with_backoff_until_success() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/sub"))
                .respond_with(ResponseTemplate::new(500))
                .up_to_n_times(2)
                .expect(2)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/sub"))
                .respond_with(ResponseTemplate::new(200).set_body_string("trojan://p@h:443"))
                .expect(1)
                .mount(&server)
                .await;

            let fetcher = NodeFetcher::new().unwrap();
            let start = Instant::now();
            let body = fetcher
                .fetch(&format!("{}/sub", server.uri()))
                .await
                .unwrap();

            assert_eq!(body, "trojan://p@h:443");
            // 1000ms after the first failure, 2000ms after the second
            assert!(start.elapsed() >= Duration::from_millis(3000));
        }

        #[tokio::test]
        async fn test_exhausted_retries_return_error() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(503))
                .expect(3)
                .mount(&server)
                .await;

            let err = fast_fetcher(3)
                .fetch(&format!("{}/down", server.uri()))
                .await
                .unwrap_err();

            match err {
                FetchError::Exhausted { attempts, last } => {
                    assert_eq!(attempts, 3);
                    assert!(matches!(*last, FetchError::Status(s) if s.as_u16() == 503));
                }
                other => panic!("unexpected error: {}", other),
            }
        }

        #[tokio::test]
        async fn test_zero_attempts_still_tries_once() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(404))
                .expect(1)
                .mount(&server)
                .await;

            let result = fast_fetcher(0)
                .fetch(&format!("{}/missing", server.uri()))
                .await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_base64_body_is_unwrapped() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/b64"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(STANDARD.encode("vmess://abc\ntrojan://def")),
                )
                .mount(&server)
                .await;

            let body = fast_fetcher(1)
                .fetch(&format!("{}/b64", server.uri()))
                .await
                .unwrap();
            assert_eq!(body, "vmess://abc\ntrojan://def");

            let schemes: Vec<Scheme> = NodeParser::new()
                .parse(&body)
                .into_iter()
                .filter_map(|node| match node {
                    Node::Opaque(o) => Some(o.scheme),
                    Node::Structured(_) => None,
                })
                .collect();
            assert_eq!(schemes, vec![Scheme::Vmess, Scheme::Trojan]);
        }

        #[tokio::test]
        async fn test_sends_client_headers() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(header("user-agent", DEFAULT_USER_AGENT))
                .and(header("cache-control", "no-cache"))
                .respond_with(ResponseTemplate::new(200).set_body_string("proxies: []"))
                .expect(1)
                .mount(&server)
                .await;

            let body = fast_fetcher(1)
                .fetch(&format!("{}/clash", server.uri()))
                .await
                .unwrap();
            assert_eq!(body, "proxies: []");
        }

        #[tokio::test]
        async fn test_unreachable_host_fails() {
            // Bind then drop a server so the port is closed
            let uri = {
                let server = MockServer::start().await;
                server.uri()
            };
            assert!(fast_fetcher(2).fetch(&uri).await.is_err());
        }
    }
}
