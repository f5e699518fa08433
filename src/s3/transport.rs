//! Injected capabilities: HTTP transport, credentials and clock
//!
//! The pipeline receives these as constructor dependencies, so tests can swap
//! in scripted transports and fixed clocks without process-wide state.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::time::Duration;

use crate::s3::error::{BoxError, Result, S3Error};
use crate::s3::signer::Credentials;

/// Streaming response body; the pipeline gets headers before the body is read
pub type ResponseBody = BoxBody<Bytes, BoxError>;

/// Wrap a complete buffer as a [`ResponseBody`]
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Sends one HTTP request and resolves once response headers arrive
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> std::result::Result<Response<ResponseBody>, BoxError>;
}

/// Supplies credentials on demand
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self) -> Result<Credentials>;
}

/// Fixed credentials
#[derive(Debug, Clone)]
pub struct StaticProvider {
    credentials: Credentials,
}

impl StaticProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialsProvider for StaticProvider {
    async fn credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Source of request timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Time allowed until response headers arrive
    pub request_timeout: Duration,
    pub insecure_tls: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            insecure_tls: false,
        }
    }
}

/// hyper-based transport with a pooled HTTP/1.1 connection manager
///
/// Clone is cheap - the underlying HTTP client uses Arc internally.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
}

impl HyperTransport {
    /// Create a new transport
    ///
    /// - HTTP/1.1 only
    /// - 90s idle connection timeout
    /// - TCP_NODELAY enabled
    /// - 90s TCP keepalive
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.connect_timeout));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if config.insecure_tls {
            tracing::warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
        } else {
            TlsConnector::new()
        }
        .map_err(|e| S3Error::Transport(Box::new(e)))?;

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(256)
            .set_host(false)
            .build(https);

        Ok(Self {
            client,
            request_timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> std::result::Result<Response<ResponseBody>, BoxError> {
        let response = tokio::time::timeout(self.request_timeout, self.client.request(request))
            .await
            .map_err(|_| -> BoxError { "timed out waiting for response headers".into() })??;

        Ok(response.map(|body| body.map_err(|e| -> BoxError { Box::new(e) }).boxed()))
    }
}
