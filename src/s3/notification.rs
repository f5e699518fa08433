//! Bucket event records and the line-delimited notification stream
//!
//! A listen request answers with a long-lived chunked body. Every non-blank
//! line is one JSON document holding zero or more event records; the server
//! interleaves keep-alive lines that carry no records.

use bytes::{Buf, BytesMut};
use futures::stream::Stream;
use http_body_util::BodyExt;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

use crate::s3::error::{Result, S3Error};
use crate::s3::transport::ResponseBody;

/// Buffered decoded events before the reader waits for the consumer
const CHANNEL_CAPACITY: usize = 64;

/// Longest line accepted before the stream is treated as malformed
pub const MAX_LINE_LEN: usize = 1024 * 1024;

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One line of the notification stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "EventName", default)]
    pub event_name: Option<String>,
    #[serde(rename = "Key", default)]
    pub key: Option<String>,
    #[serde(rename = "Records", default, deserialize_with = "null_as_default")]
    pub records: Vec<NotificationRecord>,
}

impl NotificationEvent {
    /// Keep-alive lines decode to an event with nothing in it
    pub fn is_keep_alive(&self) -> bool {
        self.records.is_empty() && self.event_name.is_none() && self.key.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationRecord {
    pub event_version: String,
    pub event_source: String,
    pub aws_region: String,
    pub event_time: String,
    pub event_name: String,
    pub user_identity: UserIdentity,
    #[serde(deserialize_with = "null_as_default")]
    pub request_parameters: BTreeMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    pub response_elements: BTreeMap<String, String>,
    pub s3: EventEntity,
    pub source: EventSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserIdentity {
    pub principal_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventEntity {
    pub s3_schema_version: String,
    pub configuration_id: String,
    pub bucket: EventBucket,
    pub object: EventObject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventBucket {
    pub name: String,
    pub owner_identity: UserIdentity,
    pub arn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventObject {
    pub key: String,
    pub size: Option<u64>,
    pub e_tag: Option<String>,
    pub content_type: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub user_metadata: BTreeMap<String, String>,
    pub version_id: Option<String>,
    pub sequencer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSource {
    pub host: String,
    pub port: String,
    pub user_agent: String,
}

/// Decode one line. Blank lines and keep-alives give `Ok(None)`.
pub fn decode_line(line: &[u8]) -> Result<Option<NotificationEvent>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }
    let event: NotificationEvent = serde_json::from_slice(line)?;
    if event.is_keep_alive() {
        return Ok(None);
    }
    Ok(Some(event))
}

/// Lazy sequence of events read from one open response.
///
/// Dropping the stream or cancelling its token stops the reader task and
/// releases the connection.
pub struct NotificationStream {
    rx: mpsc::Receiver<Result<NotificationEvent>>,
    _guard: DropGuard,
}

impl NotificationStream {
    /// Start reading `body` on a background task
    pub fn spawn(body: ResponseBody, cancel: &CancellationToken) -> Self {
        let token = cancel.child_token();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(read_lines(body, tx, token.clone()));
        Self {
            rx,
            _guard: token.drop_guard(),
        }
    }
}

impl Stream for NotificationStream {
    type Item = Result<NotificationEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

async fn read_lines(
    mut body: ResponseBody,
    tx: mpsc::Sender<Result<NotificationEvent>>,
    cancel: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    // Bytes of `buf` already known to hold no newline
    let mut scanned = 0;

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("notification_stream_cancelled");
                return;
            }
            _ = tx.closed() => return,
            frame = body.frame() => frame,
        };

        match frame {
            Some(Ok(frame)) => {
                let Ok(data) = frame.into_data() else {
                    continue;
                };
                buf.extend_from_slice(&data);

                while let Some(pos) = buf[scanned..].iter().position(|&b| b == b'\n') {
                    let line = buf.split_to(scanned + pos + 1);
                    scanned = 0;
                    if !forward(&tx, &line).await {
                        return;
                    }
                }
                scanned = buf.len();

                if buf.len() > MAX_LINE_LEN {
                    let _ = tx
                        .send(Err(S3Error::InvalidResponse(format!(
                            "notification line exceeds {} bytes",
                            MAX_LINE_LEN
                        ))))
                        .await;
                    return;
                }
            }
            Some(Err(e)) => {
                let _ = tx.send(Err(S3Error::Transport(e))).await;
                return;
            }
            None => {
                // Last line may lack a trailing newline
                if buf.has_remaining() {
                    forward(&tx, &buf).await;
                }
                debug!("notification_stream_closed");
                return;
            }
        }
    }
}

/// Decode and send one line; false once the stream should stop
async fn forward(tx: &mpsc::Sender<Result<NotificationEvent>>, line: &[u8]) -> bool {
    match decode_line(line) {
        Ok(None) => {
            trace!("notification_keep_alive");
            true
        }
        Ok(Some(event)) => tx.send(Ok(event)).await.is_ok(),
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}
