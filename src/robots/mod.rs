//! Robots.txt handling module
//!
//! The crawl covers one origin, so robots.txt is fetched once at startup and
//! folded into the scope policy.

mod parser;

pub use parser::ParsedRobots;

use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Location of robots.txt for the origin of `url`
pub fn robots_url(url: &Url) -> Url {
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    robots
}

/// Fetches robots.txt for the origin of `seed`
///
/// | Response | Result |
/// |----------|--------|
/// | 2xx | parsed rules |
/// | 4xx | allow all (no robots.txt) |
/// | 5xx, network error | allow all, with a warning |
pub async fn fetch_robots(client: &Client, seed: &Url) -> ParsedRobots {
    let url = robots_url(seed);

    let response = match client
        .get(url.clone())
        .timeout(Duration::from_secs(15))
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Could not fetch {}: {}; assuming allow-all", url, e);
            return ParsedRobots::allow_all();
        }
    };

    let status = response.status();
    if status.is_client_error() {
        tracing::debug!("No robots.txt at {} (HTTP {})", url, status);
        return ParsedRobots::allow_all();
    }
    if !status.is_success() {
        tracing::warn!("robots.txt at {} returned HTTP {}; assuming allow-all", url, status);
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => {
            tracing::info!("Loaded robots.txt from {} ({} bytes)", url, body.len());
            ParsedRobots::from_content(&body)
        }
        Err(e) => {
            tracing::warn!("Could not read {}: {}; assuming allow-all", url, e);
            ParsedRobots::allow_all()
        }
    }
}
