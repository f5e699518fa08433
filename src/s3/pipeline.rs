//! Request execution: hash, date, sign, send, retry
//!
//! One [`RequestPipeline::execute`] call is one logical operation. Each attempt
//! is stamped and signed afresh; transient failures are retried under the
//! [`RetryPolicy`] and callers only ever see the final outcome.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, HOST};
use http::{StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::s3::error::{Result, S3Error};
use crate::s3::request::{Endpoint, S3Request};
use crate::s3::retry::{AttemptOutcome, RetryPolicy};
use crate::s3::signer::{
    payload_hash, Credentials, RequestSigner, AMZ_DATE_FORMAT, X_AMZ_CONTENT_SHA256, X_AMZ_DATE,
};
use crate::s3::transport::{Clock, CredentialsProvider, HttpTransport, ResponseBody};
use crate::s3::xml;

/// Successful response with an unread body
pub struct S3Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: ResponseBody,
}

/// Collect a response body, racing the read against `cancel`
pub(crate) async fn read_body(body: ResponseBody, cancel: &CancellationToken) -> Result<Bytes> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(S3Error::Cancelled),
        collected = body.collect() => Ok(collected.map_err(S3Error::Transport)?.to_bytes()),
    }
}

impl S3Response {
    fn from_http(response: Response<ResponseBody>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Read the whole body, giving up as soon as `cancel` fires
    pub async fn bytes(self, cancel: &CancellationToken) -> Result<Bytes> {
        read_body(self.body, cancel).await
    }

    pub async fn text(self, cancel: &CancellationToken) -> Result<String> {
        let bytes = self.bytes(cancel).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| S3Error::InvalidResponse(format!("response body is not UTF-8: {}", e)))
    }

    /// Hand the streaming body to the caller
    pub fn into_body(self) -> ResponseBody {
        self.body
    }
}

impl std::fmt::Debug for S3Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Signs and sends requests against one endpoint and region
///
/// Cheap to clone and safe to share between concurrent operations; the only
/// shared state is the transport's connection pool.
#[derive(Clone)]
pub struct RequestPipeline {
    endpoint: Endpoint,
    region: String,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialsProvider>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    signer: RequestSigner,
}

impl RequestPipeline {
    pub fn new(
        endpoint: Endpoint,
        region: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialsProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoint,
            region: region.into(),
            transport,
            credentials,
            clock,
            retry: RetryPolicy::default(),
            signer: RequestSigner::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Execute `request`, retrying transient failures.
    ///
    /// Returns as soon as response headers of a 2xx answer arrive. Non-2xx
    /// answers become [`S3Error::Http`] with the parsed `<Error>` envelope.
    pub async fn execute(&self, request: &S3Request, cancel: &CancellationToken) -> Result<S3Response> {
        let uri = request.uri(&self.endpoint)?;
        let uri_string = uri.to_string();
        let payload_hash = payload_hash(&request.body);

        let mut attempt = 0u32;
        let mut last_delay = None;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(S3Error::Cancelled);
            }

            let credentials = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(S3Error::Cancelled),
                credentials = self.credentials.credentials() => credentials?,
            };

            let http_request = self.build_request(request, &uri, &payload_hash, &credentials)?;
            debug!(
                method = %request.method,
                uri = %uri_string,
                attempt = attempt,
                "s3_request"
            );

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(S3Error::Cancelled),
                sent = self.transport.send(http_request) => sent,
            };

            let (outcome, error) = match sent {
                Ok(response) if response.status().is_success() => {
                    return Ok(S3Response::from_http(response));
                }
                Ok(response) => {
                    let status = response.status();
                    // Read the error body to release the connection
                    let body = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(S3Error::Cancelled),
                        body = response.into_body().collect() => body.map(|b| b.to_bytes()).unwrap_or_default(),
                    };
                    let error = S3Error::Http {
                        method: request.method.clone(),
                        uri: uri_string.clone(),
                        status,
                        error: xml::parse_error_response(&body).map(Box::new),
                    };
                    (AttemptOutcome::Status(status), error)
                }
                Err(e) => (AttemptOutcome::TransportFailure, S3Error::Transport(e)),
            };

            let decision = self.retry.classify(attempt, outcome, last_delay);
            if !decision.should_retry {
                debug!(
                    method = %request.method,
                    uri = %uri_string,
                    attempt = attempt,
                    error = %error,
                    "s3_request_failed"
                );
                return Err(error);
            }

            warn!(
                method = %request.method,
                uri = %uri_string,
                status = error.status().map(|s| s.as_u16()),
                attempt = attempt,
                delay_ms = decision.delay.as_millis() as u64,
                "retry_backoff"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(S3Error::Cancelled),
                _ = tokio::time::sleep(decision.delay) => {}
            }
            last_delay = Some(decision.delay);
        }
    }

    /// Stamp, sign and assemble one attempt
    fn build_request(
        &self,
        request: &S3Request,
        uri: &Uri,
        payload_hash: &str,
        credentials: &Credentials,
    ) -> Result<Request<Full<Bytes>>> {
        let mut headers = request.headers.clone();
        let timestamp = self.clock.now().format(AMZ_DATE_FORMAT).to_string();

        headers.insert(
            HOST,
            HeaderValue::from_str(self.endpoint.host()).map_err(http::Error::from)?,
        );
        headers.insert(
            X_AMZ_DATE,
            HeaderValue::from_str(&timestamp).map_err(http::Error::from)?,
        );
        headers.insert(
            X_AMZ_CONTENT_SHA256,
            HeaderValue::from_str(payload_hash).map_err(http::Error::from)?,
        );

        self.signer
            .sign_request(&request.method, uri, &mut headers, credentials, &self.region)?;

        let mut http_request = Request::new(Full::new(request.body.clone()));
        *http_request.method_mut() = request.method.clone();
        *http_request.uri_mut() = uri.clone();
        *http_request.headers_mut() = headers;
        Ok(http_request)
    }
}
