//! Ledger backends: D1 over a mock HTTP API, SQLite across reopen

use serde_json::json;
use std::path::Path;
use subrelay::ledger::{D1Ledger, DiscoveredItem, LedgerError, LedgerStore, SqliteLedger};
use subrelay::ItemStatus;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUERY_PATH: &str = "/accounts/acct/d1/database/db1/query";

fn envelope(results: serde_json::Value, changes: u64) -> serde_json::Value {
    json!({
        "success": true,
        "errors": [],
        "messages": [],
        "result": [{ "results": results, "success": true, "meta": { "changes": changes } }]
    })
}

fn d1(server: &MockServer) -> D1Ledger {
    D1Ledger::with_api_base(&server.uri(), "acct", "db1", "secret-token").unwrap()
}

#[tokio::test]
async fn test_d1_initialize_runs_schema_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]), 0)))
        .expect(7)
        .mount(&server)
        .await;

    d1(&server).initialize().await.unwrap();
}

#[tokio::test]
async fn test_d1_claim_returns_only_rows_it_changed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("SELECT url, source"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!([
                { "url": "https://zoom.test/a/", "source": "zoom", "category": "/c/", "page": 1,
                  "status": "pending", "discovered_at": "2024-01-01T00:00:00+00:00" },
                { "url": "https://zoom.test/b/", "source": "zoom", "category": "/c/", "page": "2",
                  "status": "pending", "discovered_at": "2024-01-01T00:00:00+00:00" }
            ]),
            0,
        )))
        .mount(&server)
        .await;
    // Another writer took /a/ between the select and the update
    Mock::given(method("POST"))
        .and(body_string_contains("SET status = 'processing'"))
        .and(body_string_contains("https://zoom.test/a/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]), 0)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("SET status = 'processing'"))
        .and(body_string_contains("https://zoom.test/b/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]), 1)))
        .mount(&server)
        .await;

    let claimed = d1(&server).claim_pending("zoom", 10).await.unwrap();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].url, "https://zoom.test/b/");
    assert_eq!(claimed[0].page, 2);
    assert_eq!(claimed[0].status, ItemStatus::Processing);
}

#[tokio::test]
async fn test_d1_upsert_reports_new_rows() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("INSERT OR IGNORE INTO discovered_urls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]), 1)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("INSERT OR IGNORE INTO discovered_urls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]), 0)))
        .mount(&server)
        .await;

    let ledger = d1(&server);
    let item = DiscoveredItem::new("https://zoom.test/a/", "zoom", "/c/", 1);
    assert!(ledger.upsert_discovered(&item).await.unwrap());
    assert!(!ledger.upsert_discovered(&item).await.unwrap());
}

#[tokio::test]
async fn test_d1_error_envelope_is_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "errors": [{ "code": 7500, "message": "no such table: discovered_urls" }],
            "result": []
        })))
        .mount(&server)
        .await;

    let err = d1(&server).pending_count("zoom").await.unwrap_err();
    match err {
        LedgerError::Remote(message) => assert!(message.contains("no such table")),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_d1_status_counts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("GROUP BY status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!([
                { "status": "pending", "n": 4 },
                { "status": "completed", "n": 9 }
            ]),
            0,
        )))
        .mount(&server)
        .await;

    let counts = d1(&server).status_counts("zoom").await.unwrap();
    assert_eq!(counts.get(&ItemStatus::Pending), Some(&4));
    assert_eq!(counts.get(&ItemStatus::Completed), Some(&9));
    assert_eq!(counts.get(&ItemStatus::Failed), None);
}

#[tokio::test]
async fn test_sqlite_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("ledger.db");

    {
        let ledger = SqliteLedger::new(Path::new(&db)).unwrap();
        ledger
            .upsert_discovered(&DiscoveredItem::new("https://zoom.test/a/", "zoom", "/c/", 1))
            .await
            .unwrap();
        ledger
            .upsert_discovered(&DiscoveredItem::new("https://zoom.test/b/", "zoom", "/c/", 1))
            .await
            .unwrap();
        ledger.save_checkpoint("zoom", "/c/", 4).await.unwrap();
        // Simulate a crash mid-batch
        assert_eq!(ledger.claim_pending("zoom", 1).await.unwrap().len(), 1);
    }

    let ledger = SqliteLedger::new(Path::new(&db)).unwrap();
    assert_eq!(ledger.discovered_count("zoom").await.unwrap(), 2);
    assert_eq!(ledger.pending_count("zoom").await.unwrap(), 1);
    assert_eq!(ledger.load_checkpoint("zoom").await.unwrap().unwrap().page, 4);

    assert_eq!(ledger.release_stale_claims("zoom").await.unwrap(), 1);
    assert_eq!(ledger.pending_count("zoom").await.unwrap(), 2);
}
