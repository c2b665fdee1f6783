//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - GET requests to fetch page content
//! - Redirect handling
//! - Error classification into transient and permanent failures

use crate::config::UserAgentConfig;
use crate::crawler::parser::parse_html;
use crate::ErrorKind;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum redirect hops before a fetch fails permanently
const MAX_REDIRECTS: usize = 10;

/// A fetched HTML page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub raw_html: String,
    /// URL after redirects
    pub final_url: Url,
    /// Absolute link targets, resolved against `final_url`
    pub links: Vec<String>,
    pub status_code: u16,
}

/// A failed fetch, tagged with whether it is worth retrying
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
            status_code: None,
        }
    }

    fn from_status(status: StatusCode) -> Self {
        Self {
            kind: classify_status(status),
            message: format!("HTTP {}", status),
            status_code: Some(status.as_u16()),
        }
    }
}

/// Retrieves a page
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedPage, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```
/// use site_indexer::config::UserAgentConfig;
/// use site_indexer::crawler::build_http_client;
///
/// let client = build_http_client(&UserAgentConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Maps a non-success status to a retry decision
///
/// | Status | Kind |
/// |--------|------|
/// | 408, 429 | Transient |
/// | 5xx | Transient |
/// | 404, 410, other 4xx | Permanent |
/// | anything else | Permanent |
pub fn classify_status(status: StatusCode) -> ErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

/// Classifies a transport-level error
fn classify_reqwest_error(e: &reqwest::Error) -> FetchError {
    if e.is_redirect() {
        FetchError::permanent(format!("Redirect error: {}", e))
    } else if e.is_timeout() {
        FetchError::transient("Request timeout")
    } else if e.is_connect() {
        FetchError::transient(format!("Connection failed: {}", e))
    } else if e.is_builder() {
        FetchError::permanent(format!("Invalid request: {}", e))
    } else {
        FetchError::transient(e.to_string())
    }
}

fn is_html(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

/// Fetches pages over HTTP with reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_http_client(config)?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !is_html(&content_type) {
            return Err(FetchError {
                kind: ErrorKind::Permanent,
                message: format!("Not HTML: '{}'", content_type),
                status_code: Some(status.as_u16()),
            });
        }

        let raw_html = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let links = parse_html(&raw_html, &final_url).links;

        Ok(FetchedPage {
            raw_html,
            final_url,
            links,
            status_code: status.as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client() {
        let client = build_http_client(&UserAgentConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::NOT_FOUND), ErrorKind::Permanent);
        assert_eq!(classify_status(StatusCode::GONE), ErrorKind::Permanent);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ErrorKind::Permanent);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_is_html() {
        assert!(is_html("text/html"));
        assert!(is_html("text/html; charset=utf-8"));
        assert!(is_html("TEXT/HTML"));
        assert!(is_html("application/xhtml+xml"));
        assert!(!is_html("application/pdf"));
        assert!(!is_html("text/htmlx"));
        assert!(!is_html(""));
    }
}
