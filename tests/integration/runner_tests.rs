//! End-to-end runs through the mode dispatcher

use crate::support::*;
use std::sync::Arc;
use subrelay::config::parse_config;
use subrelay::ledger::{DiscoveredItem, LedgerStore};
use subrelay::runner::open_ledger;
use subrelay::{Config, ItemStatus, RunMode, RunOptions, Runner};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(base_url: &str, database_path: &str) -> Config {
    let toml = format!(
        r#"
[crawler]
page-delay-min-secs = 0.0
page-delay-max-secs = 0.0
stale-page-limit = 2
monitor-page-limit = 1

[worker]
batch-size = 5
workers = 2
batch-cooldown-min-secs = 0.0
batch-cooldown-max-secs = 0.0

[relay-backoff]
min-interval-secs = 0.0

[ledger]
database-path = "{}"

[[source]]
name = "zoom"
site = "zoom"
base-url = "{}"
categories = ["/category/films/"]
"#,
        database_path, base_url
    );
    parse_config(&toml, |_| None).expect("valid config")
}

async fn mount_site(server: &MockServer) {
    let pages = [
        ("/category/films/", listing_html(&["/heat-1995/", "/ronin-1998/"])),
        ("/heat-1995/", detail_html("Heat (1995)", Some("/dl/heat/"))),
        ("/ronin-1998/", detail_html("Ronin (1998)", Some("/dl/ronin/"))),
    ];
    for (route, body) in pages {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }
    for route in ["/dl/heat/", "/dl/ronin/"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(SRT_BODY))
            .mount(server)
            .await;
    }
}

fn options(mode: RunMode) -> RunOptions {
    RunOptions {
        mode,
        limit: None,
        page_limit: None,
    }
}

#[tokio::test]
async fn test_full_run_crawls_and_relays() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("subrelay.db");
    let config = config_for(&server.uri(), db.to_str().unwrap());
    let ledger = open_ledger(&config.ledger).await.unwrap();
    let source = config.sources[0].clone();

    let sink = Arc::new(RecordingSink::default());
    let runner = Runner::new(
        config,
        ledger.clone(),
        http_fetcher(),
        sink.clone(),
        CancellationToken::new(),
    );

    let summary = runner
        .run_source(&source, &options(RunMode::Full))
        .await
        .unwrap()
        .expect("pipeline modes report a summary");

    assert_eq!(summary.counters.discovered, 2);
    assert_eq!(summary.counters.relayed, 2);
    assert_eq!(summary.counters.failed, 0);
    assert_eq!(summary.pending, Some(0));
    assert!(!summary.interrupted);
    assert_eq!(sink.uploads().len(), 2);

    let messages = sink.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("run started"));
    assert!(messages[1].contains("run finished"));

    // A second full run finds nothing new and relays nothing
    let summary = runner
        .run_source(&source, &options(RunMode::Full))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.counters.discovered, 0);
    assert_eq!(summary.counters.relayed, 0);
    assert_eq!(sink.uploads().len(), 2);
}

#[tokio::test]
async fn test_crawl_only_leaves_queue_pending() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let config = config_for(&server.uri(), "unused.db");
    let source = config.sources[0].clone();
    let ledger = memory_ledger();
    let sink = Arc::new(RecordingSink::default());
    let runner = Runner::new(config, ledger.clone(), http_fetcher(), sink.clone(), CancellationToken::new());

    let summary = runner
        .run_source(&source, &options(RunMode::CrawlOnly))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.counters.discovered, 2);
    assert_eq!(summary.pending, Some(2));
    assert!(sink.uploads().is_empty());
}

#[tokio::test]
async fn test_process_only_releases_stale_claims_first() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let config = config_for(&server.uri(), "unused.db");
    let source = config.sources[0].clone();
    let ledger = memory_ledger();
    let url = format!("{}/heat-1995/", server.uri());
    ledger
        .upsert_discovered(&DiscoveredItem::new(&url, SOURCE, CATEGORY, 1))
        .await
        .unwrap();
    // Left in processing by a crashed run
    ledger.claim_pending(SOURCE, 1).await.unwrap();

    let sink = Arc::new(RecordingSink::default());
    let runner = Runner::new(config, ledger.clone(), http_fetcher(), sink.clone(), CancellationToken::new());
    runner
        .run_source(&source, &options(RunMode::ProcessOnly))
        .await
        .unwrap();

    assert_eq!(sink.uploads().len(), 1);
    assert_eq!(
        ledger.get_item(&url).await.unwrap().unwrap().status,
        ItemStatus::Completed
    );
    let listing_hits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/category/films/")
        .count();
    assert_eq!(listing_hits, 0);
}

#[tokio::test]
async fn test_monitor_uses_configured_page_limit() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    Mock::given(method("GET"))
        .and(path("/category/films/page/2/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&["/thief-1981/"])))
        .expect(0)
        .mount(&server)
        .await;

    let config = config_for(&server.uri(), "unused.db");
    let source = config.sources[0].clone();
    let ledger = memory_ledger();
    let sink = Arc::new(RecordingSink::default());
    let runner = Runner::new(config, ledger.clone(), http_fetcher(), sink.clone(), CancellationToken::new());

    let summary = runner
        .run_source(&source, &options(RunMode::Monitor))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.counters.relayed, 2);
    assert!(ledger.load_checkpoint(SOURCE).await.unwrap().is_none());
}

#[tokio::test]
async fn test_maintenance_modes() {
    let server = MockServer::start().await;
    let config = config_for(&server.uri(), "unused.db");
    let source = config.sources[0].clone();
    let ledger = memory_ledger();

    let url = "https://zoom.test/a/";
    ledger
        .upsert_discovered(&DiscoveredItem::new(url, SOURCE, CATEGORY, 1))
        .await
        .unwrap();
    ledger.claim_pending(SOURCE, 1).await.unwrap();
    ledger.set_status(url, ItemStatus::Failed).await.unwrap();
    ledger.save_checkpoint(SOURCE, CATEGORY, 9).await.unwrap();

    let sink = Arc::new(RecordingSink::default());
    let runner = Runner::new(config, ledger.clone(), http_fetcher(), sink.clone(), CancellationToken::new());

    for mode in [RunMode::Stats, RunMode::RequeueFailed, RunMode::ResetCheckpoint, RunMode::DryRun] {
        let summary = runner.run_source(&source, &options(mode)).await.unwrap();
        assert!(summary.is_none());
    }

    assert_eq!(ledger.get_item(url).await.unwrap().unwrap().status, ItemStatus::Pending);
    assert!(ledger.load_checkpoint(SOURCE).await.unwrap().is_none());
    assert!(sink.messages().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_is_reported_as_interrupted() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let config = config_for(&server.uri(), "unused.db");
    let source = config.sources[0].clone();
    let ledger: Arc<dyn LedgerStore> = memory_ledger();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let sink = Arc::new(RecordingSink::default());
    let runner = Runner::new(config, ledger, http_fetcher(), sink.clone(), cancel);
    let summary = runner
        .run_source(&source, &options(RunMode::Full))
        .await
        .unwrap()
        .unwrap();

    assert!(summary.interrupted);
    assert!(sink.uploads().is_empty());
}
