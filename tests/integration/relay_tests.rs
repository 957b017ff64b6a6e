//! Telegram sink against a mock bot API

use std::time::Duration;
use subrelay::relay::{RelaySink, SinkError, TelegramSink, Upload};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "123:abc";
const CHAT: &str = "-100200300";

fn upload<'a>(bytes: &'a [u8], caption: &'a str) -> Upload<'a> {
    Upload {
        bytes,
        filename: "Heat (1995).srt",
        mime_type: "application/x-subrip",
        caption,
    }
}

#[tokio::test]
async fn test_upload_returns_file_reference() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendDocument", TOKEN)))
        .and(body_string_contains(CHAT))
        .and(body_string_contains("Heat (1995).srt"))
        .and(body_string_contains("HTML"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "result": {
                "message_id": 42,
                "document": {
                    "file_id": "BQACAgUAAx",
                    "file_unique_id": "AgAD",
                    "file_size": 1234
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sink = TelegramSink::with_api_base(&server.uri(), TOKEN, CHAT).unwrap();
    let receipt = sink.upload(&upload(b"1\n00:00:01,000", "<b>Heat</b>")).await.unwrap();

    assert_eq!(receipt.reference, "BQACAgUAAx");
    assert_eq!(receipt.unique_id.as_deref(), Some("AgAD"));
    assert_eq!(receipt.size, 1234);
    assert_eq!(receipt.message_id, Some(42));
}

#[tokio::test]
async fn test_upload_size_falls_back_to_payload_length() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendDocument", TOKEN)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "result": { "message_id": 7, "document": { "file_id": "F" } }
        })))
        .mount(&server)
        .await;

    let sink = TelegramSink::with_api_base(&server.uri(), TOKEN, CHAT).unwrap();
    let receipt = sink.upload(&upload(b"12345", "c")).await.unwrap();
    assert_eq!(receipt.size, 5);
}

#[tokio::test]
async fn test_throttle_surfaces_retry_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 17",
            "parameters": { "retry_after": 17 }
        })))
        .mount(&server)
        .await;

    let sink = TelegramSink::with_api_base(&server.uri(), TOKEN, CHAT).unwrap();
    let err = sink.upload(&upload(b"x", "c")).await.unwrap_err();
    assert_eq!(
        err,
        SinkError::RateLimited {
            retry_after: Some(Duration::from_secs(17))
        }
    );
}

#[tokio::test]
async fn test_bad_request_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: chat not found"
        })))
        .mount(&server)
        .await;

    let sink = TelegramSink::with_api_base(&server.uri(), TOKEN, CHAT).unwrap();
    let err = sink.upload(&upload(b"x", "c")).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(matches!(err, SinkError::Rejected { status: 400, ref message } if message.contains("chat not found")));
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
        .mount(&server)
        .await;

    let sink = TelegramSink::with_api_base(&server.uri(), TOKEN, CHAT).unwrap();
    let err = sink.upload(&upload(b"x", "c")).await.unwrap_err();
    assert!(matches!(err, SinkError::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_notify_sends_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", TOKEN)))
        .and(body_string_contains("run finished"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "result": { "message_id": 9 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sink = TelegramSink::with_api_base(&server.uri(), TOKEN, CHAT).unwrap();
    sink.notify("<b>Full run finished: zoom</b>").await.unwrap();
}
