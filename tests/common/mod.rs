//! Scripted transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use http::{HeaderMap, Method};
use http_body_util::Full;
use hyper::{Request, Response};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use s3wire::s3::error::BoxError;
use s3wire::s3::transport::{full_body, FixedClock, HttpTransport, ResponseBody};
use s3wire::s3::{Credentials, RetryPolicy, S3Client};

/// One scripted answer
pub enum Reply {
    Status {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Bytes,
    },
    /// Connection-level failure
    Fail(&'static str),
    /// Response whose body is supplied by the test
    Streaming(u16, ResponseBody),
}

impl Reply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<Bytes>) -> Self {
        Reply::Status {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        if let Reply::Status { headers, .. } = &mut self {
            headers.push((name, value.into()));
        }
        self
    }
}

/// What the client actually sent
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    /// Decoded query parameter, first occurrence
    pub fn param(&self, name: &str) -> Option<String> {
        self.query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == name).then(|| urlencoding::decode(v).unwrap().into_owned())
        })
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8(self.body.to_vec()).unwrap()
    }
}

#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
}

impl MockTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<ResponseBody>, BoxError> {
        use http_body_util::BodyExt;

        let (parts, body) = request.into_parts();
        let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
        self.requests.lock().unwrap().push(Recorded {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().unwrap_or("").to_string(),
            headers: parts.headers,
            body,
        });

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Status {
                status,
                headers,
                body,
            }) => {
                let mut builder = Response::builder().status(status);
                for (name, value) in headers {
                    builder = builder.header(name, value);
                }
                Ok(builder.body(full_body(body))?)
            }
            Some(Reply::Streaming(status, body)) => Ok(Response::builder().status(status).body(body)?),
            Some(Reply::Fail(message)) => Err(message.into()),
            None => Err("no scripted reply left".into()),
        }
    }
}

/// Retries without meaningful sleeps
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..Default::default()
    }
}

pub fn client(transport: Arc<MockTransport>) -> S3Client {
    S3Client::builder("http://localhost:9000")
        .credentials(Credentials::new("minioadmin", "minioadmin"))
        .transport(transport)
        .clock(Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2024, 4, 11, 15, 37, 13).unwrap(),
        )))
        .retry_policy(fast_retry())
        .build()
        .unwrap()
}

pub fn error_xml(code: &str, message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message>\
         <Resource>/bucket/key</Resource><RequestId>17C3F1E2D3A4B5C6</RequestId></Error>",
        code, message
    )
}
