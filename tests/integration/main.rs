//! Integration tests for the crawler
//!
//! `crawl_tests` drive the coordinator with scripted collaborators;
//! `http_tests` use wiremock servers and the real HTTP fetcher.

mod crawl_tests;
mod http_tests;
mod support;
