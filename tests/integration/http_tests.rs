//! HTTP fetcher and end-to-end tests against wiremock servers

use site_indexer::config::{ScopeConfig, UserAgentConfig};
use site_indexer::crawler::{
    build_http_client, Coordinator, CrawlSettings, Frontier, HttpFetcher, PageFetcher,
    RetryPolicy,
};
use site_indexer::publish::{BlobStore, IndexingPipeline, SqliteSearchIndex};
use site_indexer::queue::SqliteQueue;
use site_indexer::robots::fetch_robots;
use site_indexer::storage::{LedgerHandle, SqliteLedger};
use site_indexer::url::{CanonicalPolicy, ScopePolicy};
use site_indexer::{CrawlState, ErrorKind};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(&UserAgentConfig::default()).unwrap()
}

#[tokio::test]
async fn test_fetch_resolves_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/docs/"))
        .respond_with(html(
            r#"<html><body><a href="intro">Intro</a> <a href="/about">About</a></body></html>"#,
        ))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/docs/", server.uri())).unwrap();
    let page = fetcher().fetch(&url, TIMEOUT).await.unwrap();

    assert_eq!(page.status_code, 200);
    assert_eq!(page.final_url, url);
    assert!(page.links.contains(&format!("{}/docs/intro", server.uri())));
    assert!(page.links.contains(&format!("{}/about", server.uri())));
}

#[tokio::test]
async fn test_fetch_follows_redirects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("location", format!("{}/new", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(html("<html><body>moved</body></html>"))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
    let page = fetcher().fetch(&url, TIMEOUT).await.unwrap();

    assert_eq!(page.final_url.path(), "/new");
    assert!(page.raw_html.contains("moved"));
}

#[tokio::test]
async fn test_fetch_error_classification() {
    let server = MockServer::start().await;
    for (route, status) in [("/gone", 404), ("/busy", 503), ("/slow-down", 429)] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/report.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"%PDF-1.4".to_vec())
                .insert_header("content-type", "application/pdf"),
        )
        .mount(&server)
        .await;

    let fetcher = fetcher();
    let fetch = |route: &str| {
        let url = Url::parse(&format!("{}{}", server.uri(), route)).unwrap();
        let fetcher = fetcher.clone();
        async move { fetcher.fetch(&url, TIMEOUT).await.unwrap_err() }
    };

    let gone = fetch("/gone").await;
    assert_eq!(gone.kind, ErrorKind::Permanent);
    assert_eq!(gone.status_code, Some(404));

    assert_eq!(fetch("/busy").await.kind, ErrorKind::Transient);
    assert_eq!(fetch("/slow-down").await.kind, ErrorKind::Transient);
    assert_eq!(fetch("/report.pdf").await.kind, ErrorKind::Permanent);
}

#[tokio::test]
async fn test_fetch_timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html></html>").set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    let err = fetcher()
        .fetch(&url, Duration::from_millis(50))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Transient);
}

#[tokio::test]
async fn test_end_to_end_crawl_into_index() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><title>Home</title></head><body>
            <a href="/guide?utm_source=x">Guide</a>
            <a href="/admin">Admin</a>
            <a href="https://elsewhere.test/">Elsewhere</a>
            </body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/guide"))
        .respond_with(html(
            "<html><head><title>Guide</title></head><body><p>Ferris the crab</p></body></html>",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(html("<html><body>secret</body></html>"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ledger = LedgerHandle::new(SqliteLedger::open(&dir.path().join("ledger.db")).unwrap());
    let queue = Arc::new(SqliteQueue::open(&dir.path().join("queue.db")).unwrap());
    let index = Arc::new(SqliteSearchIndex::open(&dir.path().join("search.db")).unwrap());
    let blobs = BlobStore::new(dir.path().join("blobs"));

    let seed = Url::parse(&format!("{}/", base)).unwrap();
    let client = build_http_client(&UserAgentConfig::default()).unwrap();
    let robots = fetch_robots(&client, &seed).await;
    let scope = ScopePolicy::new(&seed, &ScopeConfig::default(), 1)
        .unwrap()
        .with_robots(robots, "site-indexer");

    let frontier = Arc::new(Frontier::new(
        ledger.clone(),
        queue,
        scope,
        CanonicalPolicy::default(),
        1,
    ));
    frontier.admit_seed(seed.as_str()).await.unwrap();

    let settings = CrawlSettings {
        concurrency: 2,
        job_timeout: Duration::from_secs(5),
        lease_duration: Duration::from_secs(10),
        idle_poll: Duration::from_millis(10),
        reconcile_interval: Duration::from_millis(100),
        reconcile_grace: Duration::from_secs(1),
        retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10)),
        queue_retry: RetryPolicy::new(u32::MAX, Duration::from_millis(1), Duration::from_millis(10)),
    };
    let coordinator = Coordinator::new(
        frontier,
        Arc::new(HttpFetcher::with_client(client)),
        Arc::new(IndexingPipeline::new(blobs.clone(), index.clone())),
        settings,
    );

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.done, 2);
    assert_eq!(summary.total, 2);

    let guide = format!("{}/guide", base);
    assert_eq!(
        ledger.get(&guide).unwrap().map(|r| r.state),
        Some(CrawlState::Done)
    );

    let hits = index.search("ferris", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].url, guide);
    assert_eq!(hits[0].title.as_deref(), Some("Guide"));

    let document = blobs.get_document(&guide).await.unwrap().unwrap();
    assert_eq!(document.text, "Ferris the crab");
    assert_eq!(document.depth, 1);
}
