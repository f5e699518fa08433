//! Retry and error classification through the public client

mod common;

use bytes::Bytes;
use common::{client, error_xml, MockTransport, Reply};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use s3wire::s3::error::BoxError;
use s3wire::s3::{PutObjectOptions, ResponseBody, S3Error};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Body whose first frame never arrives
fn stalled_body() -> ResponseBody {
    StreamBody::new(futures::stream::pending::<Result<Frame<Bytes>, BoxError>>()).boxed()
}

const RETRYABLE: [u16; 7] = [408, 423, 429, 500, 502, 503, 504];
const TERMINAL: [u16; 6] = [400, 401, 403, 404, 409, 501];

#[tokio::test]
async fn test_retryable_statuses_are_retried_until_success() {
    for status in RETRYABLE {
        let transport = MockTransport::new(vec![
            Reply::status(status, error_xml("SlowDown", "Please reduce your request rate.")),
            Reply::ok("").with_header("etag", "\"abc\""),
        ]);
        let client = client(transport.clone());

        let etag = client
            .put_object("bucket", "key", Bytes::from_static(b"data"), &PutObjectOptions::default())
            .await
            .unwrap_or_else(|e| panic!("status {} was not retried: {}", status, e));

        assert_eq!(etag, "abc");
        assert_eq!(transport.request_count(), 2, "status {}", status);
    }
}

#[tokio::test]
async fn test_terminal_statuses_fail_after_one_attempt() {
    for status in TERMINAL {
        let transport = MockTransport::new(vec![Reply::status(
            status,
            error_xml("AccessDenied", "Access Denied."),
        )]);
        let client = client(transport.clone());

        let err = client.stat_object("bucket", "key").await.unwrap_err();

        assert_eq!(transport.request_count(), 1, "status {}", status);
        assert_eq!(err.status().map(|s| s.as_u16()), Some(status));
        assert!(!err.is_retryable_status());
    }
}

#[tokio::test]
async fn test_retries_stop_after_five() {
    let transport = MockTransport::new((0..10).map(|_| Reply::status(503, "")).collect());
    let client = client(transport.clone());

    let err = client.remove_object("bucket", "key").await.unwrap_err();

    // First attempt plus five retries
    assert_eq!(transport.request_count(), 6);
    assert_eq!(err.status().map(|s| s.as_u16()), Some(503));
}

#[tokio::test]
async fn test_transport_failures_are_retried() {
    let transport = MockTransport::new(vec![
        Reply::Fail("connection reset by peer"),
        Reply::Fail("connection refused"),
        Reply::status(204, ""),
    ]);
    let client = client(transport.clone());

    client.remove_object("bucket", "key").await.unwrap();
    assert_eq!(transport.request_count(), 3);

    let transport = MockTransport::new((0..6).map(|_| Reply::Fail("connection refused")).collect());
    let err = common::client(transport.clone())
        .remove_object("bucket", "key")
        .await
        .unwrap_err();
    assert!(matches!(err, S3Error::Transport(_)));
    assert_eq!(transport.request_count(), 6);
}

#[tokio::test]
async fn test_error_body_is_surfaced() {
    let transport = MockTransport::new(vec![Reply::status(
        404,
        error_xml("NoSuchKey", "The specified key does not exist."),
    )]);
    let client = client(transport);

    let err = client.get_object("bucket", "missing.txt", None).await.err().unwrap();

    assert!(err.is_not_found());
    assert_eq!(err.code(), Some("NoSuchKey"));
    let response = err.error_response().unwrap();
    assert_eq!(response.message, "The specified key does not exist.");
    assert_eq!(response.request_id.as_deref(), Some("17C3F1E2D3A4B5C6"));
    let message = err.to_string();
    assert!(message.contains("GET"));
    assert!(message.contains("404"));
    assert!(message.contains("NoSuchKey"));
}

#[tokio::test]
async fn test_validation_errors_send_nothing() {
    let transport = MockTransport::new(vec![]);
    let client = client(transport.clone());

    assert!(matches!(client.make_bucket("Bad_Bucket").await, Err(S3Error::Validation(_))));
    assert!(matches!(client.stat_object("bucket", "").await, Err(S3Error::Validation(_))));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_cancelled_client_sends_nothing() {
    let transport = MockTransport::new(vec![Reply::ok("")]);
    let cancel = CancellationToken::new();
    let client = client(transport.clone()).with_cancellation(cancel.clone());
    cancel.cancel();

    let err = client.bucket_exists("bucket").await.unwrap_err();
    assert!(matches!(err, S3Error::Cancelled));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_every_attempt_is_signed() {
    let transport = MockTransport::new(vec![Reply::status(500, ""), Reply::ok("")]);
    let client = client(transport.clone());

    client.bucket_exists("bucket").await.unwrap();

    for request in transport.requests() {
        let auth = request.headers["authorization"].to_str().unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=minioadmin/20240411/us-east-1/s3/aws4_request"));
        assert_eq!(request.headers["x-amz-date"], "20240411T153713Z");
        assert_eq!(
            request.headers["x-amz-content-sha256"],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

#[tokio::test]
async fn test_cancellation_interrupts_body_read() {
    let transport = MockTransport::new(vec![Reply::Streaming(200, stalled_body())]);
    let cancel = CancellationToken::new();
    let client = client(transport).with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(2), client.list_buckets())
        .await
        .expect("list_buckets ignored cancellation while reading the body");
    assert!(matches!(result, Err(S3Error::Cancelled)));
}

#[tokio::test]
async fn test_cancellation_interrupts_object_download() {
    let transport = MockTransport::new(vec![Reply::Streaming(200, stalled_body())]);
    let cancel = CancellationToken::new();
    let client = client(transport).with_cancellation(cancel.clone());

    let response = client.get_object("bucket", "big.bin", None).await.unwrap();
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), response.bytes())
        .await
        .expect("download ignored cancellation");
    assert!(matches!(result, Err(S3Error::Cancelled)));
}
