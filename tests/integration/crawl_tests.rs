//! Listing crawl against a mock site

use crate::support::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use subrelay::crawler::{Crawler, FetchError, FetchResponse, PageFetcher};
use subrelay::ledger::{DiscoveredItem, ProcessedRecord};
use subrelay::relay::DisabledSink;
use subrelay::ItemStatus;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_listing(server: &MockServer, route: &str, paths: &[&str]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(paths)))
        .mount(server)
        .await;
}

/// Cancels the run once `after` fetches have completed
struct CancelAfter {
    inner: Arc<dyn PageFetcher>,
    after: usize,
    seen: AtomicUsize,
    cancel: CancellationToken,
}

#[async_trait]
impl PageFetcher for CancelAfter {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self.inner.fetch(url).await;
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.cancel.cancel();
        }
        response
    }
}

#[tokio::test]
async fn test_full_crawl_records_items_and_clears_checkpoint() {
    let server = MockServer::start().await;
    mount_listing(&server, "/category/films/", &["/heat-1995/", "/ronin-1998/"]).await;
    mount_listing(&server, "/category/films/page/2/", &["/collateral-2004/"]).await;
    // page 3 falls through to wiremock's 404

    let ledger = memory_ledger();
    let ctx = zoom_context(&server.uri(), http_fetcher(), ledger.clone(), Arc::new(DisabledSink)).await;
    let crawler = Crawler::new(ctx.clone(), fast_crawler_config(), CancellationToken::new());

    let report = crawler.crawl(&[CATEGORY.to_string()], None).await;

    assert!(report.completed);
    assert_eq!(report.new_items, 3);
    assert_eq!(report.pages, 2);
    assert_eq!(ledger.discovered_count(SOURCE).await.unwrap(), 3);
    assert_eq!(ledger.pending_count(SOURCE).await.unwrap(), 3);
    assert!(
        ledger.load_checkpoint(SOURCE).await.unwrap().is_none(),
        "a finished crawl clears its checkpoint"
    );

    let item = ledger
        .get_item(&format!("{}/collateral-2004/", server.uri()))
        .await
        .unwrap()
        .expect("item recorded");
    assert_eq!(item.category, CATEGORY);
    assert_eq!(item.page, 2);
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(ctx.stats.snapshot().discovered, 3);
}

#[tokio::test]
async fn test_crawl_resumes_from_checkpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/category/films/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&["/heat-1995/"])))
        .expect(0)
        .mount(&server)
        .await;
    mount_listing(&server, "/category/films/page/3/", &["/thief-1981/"]).await;

    let ledger = memory_ledger();
    ledger.save_checkpoint(SOURCE, CATEGORY, 3).await.unwrap();

    let ctx = zoom_context(&server.uri(), http_fetcher(), ledger.clone(), Arc::new(DisabledSink)).await;
    let crawler = Crawler::new(ctx, fast_crawler_config(), CancellationToken::new());
    let report = crawler.crawl(&[CATEGORY.to_string()], None).await;

    assert!(report.completed);
    assert_eq!(report.new_items, 1);
    assert!(ledger
        .get_item(&format!("{}/thief-1981/", server.uri()))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_interrupted_crawl_resumes_where_it_stopped() {
    let server = MockServer::start().await;
    mount_listing(&server, "/category/films/", &["/heat-1995/"]).await;
    mount_listing(&server, "/category/films/page/2/", &["/ronin-1998/"]).await;

    let ledger = memory_ledger();
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(CancelAfter {
        inner: http_fetcher(),
        after: 1,
        seen: AtomicUsize::new(0),
        cancel: cancel.clone(),
    });

    let ctx = zoom_context(&server.uri(), fetcher, ledger.clone(), Arc::new(DisabledSink)).await;
    let report = Crawler::new(ctx, fast_crawler_config(), cancel)
        .crawl(&[CATEGORY.to_string()], None)
        .await;

    assert!(!report.completed);
    assert_eq!(report.new_items, 1);
    let checkpoint = ledger.load_checkpoint(SOURCE).await.unwrap().expect("checkpoint kept");
    assert_eq!(checkpoint.category, CATEGORY);
    assert_eq!(checkpoint.page, 1);

    // Second run starts at the checkpointed page; re-crawling it adds nothing
    let ctx = zoom_context(&server.uri(), http_fetcher(), ledger.clone(), Arc::new(DisabledSink)).await;
    let report = Crawler::new(ctx, fast_crawler_config(), CancellationToken::new())
        .crawl(&[CATEGORY.to_string()], None)
        .await;

    assert!(report.completed);
    assert_eq!(report.new_items, 1);
    assert_eq!(ledger.discovered_count(SOURCE).await.unwrap(), 2);
    assert!(ledger.load_checkpoint(SOURCE).await.unwrap().is_none());
}

#[tokio::test]
async fn test_checkpoint_moves_to_next_category() {
    let server = MockServer::start().await;
    mount_listing(&server, "/category/films/", &["/heat-1995/"]).await;
    mount_listing(&server, "/category/series/", &["/the-wire-s01e01/"]).await;

    let ledger = memory_ledger();
    let cancel = CancellationToken::new();
    // First category: page 1 then a 404 on page 2; cancel after that
    let fetcher = Arc::new(CancelAfter {
        inner: http_fetcher(),
        after: 2,
        seen: AtomicUsize::new(0),
        cancel: cancel.clone(),
    });

    let ctx = zoom_context(&server.uri(), fetcher, ledger.clone(), Arc::new(DisabledSink)).await;
    let categories = vec![CATEGORY.to_string(), "/category/series/".to_string()];
    let report = Crawler::new(ctx, fast_crawler_config(), cancel)
        .crawl(&categories, None)
        .await;

    assert!(!report.completed);
    let checkpoint = ledger.load_checkpoint(SOURCE).await.unwrap().expect("checkpoint kept");
    assert_eq!(checkpoint.category, "/category/series/");
    assert_eq!(checkpoint.page, 1);
}

#[tokio::test]
async fn test_monitor_crawl_stops_at_known_page() {
    let server = MockServer::start().await;
    mount_listing(&server, "/category/films/", &["/heat-1995/"]).await;
    Mock::given(method("GET"))
        .and(path("/category/films/page/2/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&["/ronin-1998/"])))
        .expect(0)
        .mount(&server)
        .await;

    let ledger = memory_ledger();
    ledger
        .upsert_discovered(&DiscoveredItem::new(
            format!("{}/heat-1995/", server.uri()),
            SOURCE,
            CATEGORY,
            1,
        ))
        .await
        .unwrap();
    ledger.save_checkpoint(SOURCE, CATEGORY, 7).await.unwrap();

    let ctx = zoom_context(&server.uri(), http_fetcher(), ledger.clone(), Arc::new(DisabledSink)).await;
    let report = Crawler::new(ctx, fast_crawler_config(), CancellationToken::new())
        .crawl(&[CATEGORY.to_string()], Some(3))
        .await;

    assert!(report.completed);
    assert_eq!(report.new_items, 0);
    let checkpoint = ledger.load_checkpoint(SOURCE).await.unwrap().expect("untouched");
    assert_eq!(checkpoint.page, 7, "monitor crawls leave the checkpoint alone");
}

#[tokio::test]
async fn test_monitor_crawl_respects_page_limit() {
    let server = MockServer::start().await;
    mount_listing(&server, "/category/films/", &["/a-sinhala/"]).await;
    mount_listing(&server, "/category/films/page/2/", &["/b-sinhala/"]).await;
    Mock::given(method("GET"))
        .and(path("/category/films/page/3/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&["/c-sinhala/"])))
        .expect(0)
        .mount(&server)
        .await;

    let ledger = memory_ledger();
    let ctx = zoom_context(&server.uri(), http_fetcher(), ledger.clone(), Arc::new(DisabledSink)).await;
    let report = Crawler::new(ctx, fast_crawler_config(), CancellationToken::new())
        .crawl(&[CATEGORY.to_string()], Some(2))
        .await;

    assert_eq!(report.pages, 2);
    assert_eq!(report.new_items, 2);
}

#[tokio::test]
async fn test_full_crawl_leaves_category_after_stale_pages() {
    let server = MockServer::start().await;
    mount_listing(&server, "/category/films/", &["/heat-1995/"]).await;
    mount_listing(&server, "/category/films/page/2/", &["/ronin-1998/"]).await;
    Mock::given(method("GET"))
        .and(path("/category/films/page/3/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&["/thief-1981/"])))
        .expect(0)
        .mount(&server)
        .await;

    let ledger = memory_ledger();
    for (link, page) in [("/heat-1995/", 1), ("/ronin-1998/", 2)] {
        ledger
            .upsert_discovered(&DiscoveredItem::new(
                format!("{}{}", server.uri(), link),
                SOURCE,
                CATEGORY,
                page,
            ))
            .await
            .unwrap();
    }

    let ctx = zoom_context(&server.uri(), http_fetcher(), ledger.clone(), Arc::new(DisabledSink)).await;
    let report = Crawler::new(ctx, fast_crawler_config(), CancellationToken::new())
        .crawl(&[CATEGORY.to_string()], None)
        .await;

    assert!(report.completed);
    assert_eq!(report.new_items, 0);
    assert_eq!(report.pages, 2);
}

#[tokio::test]
async fn test_crawl_skips_processed_urls() {
    let server = MockServer::start().await;
    mount_listing(&server, "/category/films/", &["/heat-1995/", "/ronin-1998/"]).await;

    let ledger = memory_ledger();
    let done = format!("{}/heat-1995/", server.uri());
    ledger
        .record_processed(&ProcessedRecord::success(&done, SOURCE, "Heat"))
        .await
        .unwrap();

    let ctx = zoom_context(&server.uri(), http_fetcher(), ledger.clone(), Arc::new(DisabledSink)).await;
    let report = Crawler::new(ctx, fast_crawler_config(), CancellationToken::new())
        .crawl(&[CATEGORY.to_string()], None)
        .await;

    assert_eq!(report.new_items, 1);
    assert!(ledger.get_item(&done).await.unwrap().is_none());
}

#[tokio::test]
async fn test_blocked_listing_is_retried_then_abandoned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Access denied"))
        .mount(&server)
        .await;

    let ledger = memory_ledger();
    let ctx = zoom_context(&server.uri(), http_fetcher(), ledger.clone(), Arc::new(DisabledSink)).await;
    let report = Crawler::new(ctx.clone(), fast_crawler_config(), CancellationToken::new())
        .crawl(&[CATEGORY.to_string()], None)
        .await;

    // Two failing pages of three attempts each
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 6);
    assert!(report.completed);
    assert_eq!(report.new_items, 0);
}
