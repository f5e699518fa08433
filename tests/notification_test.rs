//! Bucket notification streams through the public client

mod common;

use bytes::Bytes;
use common::{client, MockTransport, Reply};
use futures::channel::mpsc;
use futures::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use s3wire::s3::error::BoxError;
use s3wire::s3::notification::MAX_LINE_LEN;
use s3wire::s3::{ResponseBody, S3Error};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type FrameSender = mpsc::UnboundedSender<Result<Frame<Bytes>, BoxError>>;

/// Response body fed frame by frame from the test
fn open_body() -> (FrameSender, ResponseBody) {
    let (tx, rx) = mpsc::unbounded();
    (tx, BodyExt::boxed(StreamBody::new(rx)))
}

fn send(tx: &FrameSender, data: &str) {
    tx.unbounded_send(Ok(Frame::data(Bytes::copy_from_slice(data.as_bytes()))))
        .unwrap();
}

fn event_line(key: &str) -> String {
    format!(
        concat!(
            r#"{{"EventName":"s3:ObjectCreated:Put","Key":"bucket/{key}","Records":[{{"#,
            r#""eventVersion":"2.0","eventSource":"minio:s3","eventName":"s3:ObjectCreated:Put","#,
            r#""s3":{{"bucket":{{"name":"bucket"}},"object":{{"key":"{key}","size":7}}}}}}]}}"#,
            "\n"
        ),
        key = key
    )
}

#[tokio::test]
async fn test_listen_sends_filters() {
    let (tx, body) = open_body();
    drop(tx);
    let transport = MockTransport::new(vec![Reply::Streaming(200, body)]);
    let client = client(transport.clone());

    let mut stream = client
        .listen_bucket_notification(
            "bucket",
            &["s3:ObjectCreated:*", "s3:ObjectRemoved:*"],
            Some("photos/"),
            Some(".jpg"),
        )
        .await
        .unwrap();
    assert!(stream.next().await.is_none());

    let request = &transport.requests()[0];
    assert_eq!(request.path, "/bucket");
    assert_eq!(request.param("prefix").as_deref(), Some("photos/"));
    assert_eq!(request.param("suffix").as_deref(), Some(".jpg"));
    assert_eq!(request.param("ping").as_deref(), Some("10"));
    assert!(request.query.contains("events=s3%3AObjectCreated%3A%2A"));
    assert!(request.query.contains("events=s3%3AObjectRemoved%3A%2A"));
}

#[tokio::test]
async fn test_events_arrive_in_order_across_frames() {
    let (tx, body) = open_body();
    let transport = MockTransport::new(vec![Reply::Streaming(200, body)]);
    let client = client(transport);

    let mut stream = client
        .listen_bucket_notification("bucket", &["s3:ObjectCreated:*"], None, None)
        .await
        .unwrap();

    let first = event_line("one.txt");
    let (head, tail) = first.split_at(first.len() / 2);
    send(&tx, head);
    send(&tx, " \n");
    send(&tx, tail);
    send(&tx, "\n");
    send(&tx, &event_line("two.txt"));

    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event.key.as_deref(), Some("bucket/one.txt"));
    assert_eq!(event.records[0].s3.object.key, "one.txt");
    assert_eq!(event.records[0].s3.object.size, Some(7));

    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event.records[0].s3.object.key, "two.txt");

    drop(tx);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_malformed_line_is_reported() {
    let (tx, body) = open_body();
    let transport = MockTransport::new(vec![Reply::Streaming(200, body)]);
    let client = client(transport);

    let mut stream = client
        .listen_bucket_notification("bucket", &[], None, None)
        .await
        .unwrap();
    send(&tx, "{not json\n");

    assert!(stream.next().await.unwrap().is_err());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_cancellation_ends_the_stream() {
    let (tx, body) = open_body();
    let transport = MockTransport::new(vec![Reply::Streaming(200, body)]);
    let cancel = CancellationToken::new();
    let client = client(transport).with_cancellation(cancel.clone());

    let mut stream = client
        .listen_bucket_notification("bucket", &["s3:ObjectCreated:*"], None, None)
        .await
        .unwrap();

    send(&tx, &event_line("one.txt"));
    assert!(stream.next().await.unwrap().is_ok());

    cancel.cancel();
    let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream did not stop after cancellation");
    assert!(next.is_none());

    // The reader task released the body
    tokio::time::timeout(Duration::from_secs(5), async {
        while !tx.is_closed() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("body was not released");
}

#[tokio::test]
async fn test_listen_error_status_fails_before_streaming() {
    let transport = MockTransport::new(vec![Reply::status(
        404,
        common::error_xml("NoSuchBucket", "The specified bucket does not exist"),
    )]);
    let client = client(transport);

    let err = client
        .listen_bucket_notification("bucket", &["s3:ObjectCreated:*"], None, None)
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), Some("NoSuchBucket"));
}

#[tokio::test]
async fn test_oversized_line_ends_the_stream() {
    let (tx, body) = open_body();
    let transport = MockTransport::new(vec![Reply::Streaming(200, body)]);
    let client = client(transport);

    let mut stream = client
        .listen_bucket_notification("bucket", &["s3:ObjectCreated:*"], None, None)
        .await
        .unwrap();

    // A complete line first, then a line that never ends
    send(&tx, &event_line("one.txt"));
    let chunk = "x".repeat(64 * 1024);
    for _ in 0..=(MAX_LINE_LEN / chunk.len()) {
        send(&tx, &chunk);
    }

    assert!(stream.next().await.unwrap().is_ok());
    let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("oversized line was buffered without limit");
    assert!(matches!(next, Some(Err(S3Error::InvalidResponse(_)))));
    assert!(stream.next().await.is_none());
}
