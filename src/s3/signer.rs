//! AWS Signature Version 4 signer for S3 requests
//!
//! Signing is split in two pure steps:
//! - [`CanonicalRequest`] turns method, URI, headers and payload hash into the
//!   canonical string and its SHA-256
//! - [`RequestSigner`] derives the signing key by HMAC chaining and produces the
//!   `Authorization` header value
//!
//! The signer never stamps `x-amz-date` or `x-amz-content-sha256` itself. It
//! reads them from the request, so re-signing the same request is idempotent;
//! the pipeline refreshes both before every attempt.

use hmac::{Hmac, Mac};
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use http::{Method, Uri};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::s3::error::{Result, S3Error};

type HmacSha256 = Hmac<Sha256>;

/// Hex lookup table for zero-allocation percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of the empty payload
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub const X_AMZ_DATE: &str = "x-amz-date";
pub const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";
pub const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";

/// `yyyyMMdd'T'HHmmss'Z'`
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Access credentials, supplied on demand and never persisted
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Region, service and request timestamp of one signature
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    pub region: &'a str,
    pub service: &'a str,
    /// `yyyyMMdd'T'HHmmss'Z'`
    pub timestamp: &'a str,
}

impl<'a> SigningContext<'a> {
    pub fn new(region: &'a str, service: &'a str, timestamp: &'a str) -> Self {
        Self {
            region,
            service,
            timestamp,
        }
    }

    /// First 8 characters of the timestamp (`yyyyMMdd`)
    pub fn scope_date(&self) -> &'a str {
        self.timestamp.get(..8).unwrap_or(self.timestamp)
    }

    pub fn credential_scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.scope_date(),
            self.region,
            self.service
        )
    }
}

/// SigV4 canonical request, derived from a request and never stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub method: String,
    pub canonical_uri: String,
    pub canonical_query_string: String,
    pub canonical_headers: String,
    pub signed_headers: String,
    pub payload_hash: String,
}

impl CanonicalRequest {
    /// Build the canonical request for `method uri` with the given headers.
    ///
    /// `host` must be present in `headers`; only `host`, `content-type` and
    /// `x-amz-*` headers are signed.
    pub fn new(method: &Method, uri: &Uri, headers: &HeaderMap, payload_hash: &str) -> Self {
        let path = uri.path();
        let canonical_uri = if path.is_empty() { "/" } else { path };
        let signable = Self::signable_headers(headers);

        Self {
            method: method.as_str().to_string(),
            canonical_uri: canonical_uri.to_string(),
            canonical_query_string: canonical_query_string(uri.query().unwrap_or("")),
            canonical_headers: Self::create_canonical_headers(&signable),
            signed_headers: Self::create_signed_headers(&signable),
            payload_hash: payload_hash.to_string(),
        }
    }

    /// Lowercase hex SHA-256 of the canonical string
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.to_string().as_bytes()))
    }

    /// Headers taking part in the signature, keyed by lowercase name.
    /// Repeated headers are joined with `,` in the order they were added.
    fn signable_headers(headers: &HeaderMap) -> BTreeMap<&str, String> {
        let mut signable: BTreeMap<&str, String> = BTreeMap::new();
        for (name, value) in headers {
            let name = name.as_str();
            if !is_signed_header(name) {
                continue;
            }
            let value = collapse_whitespace(&String::from_utf8_lossy(value.as_bytes()));
            signable
                .entry(name)
                .and_modify(|v| {
                    v.push(',');
                    v.push_str(&value);
                })
                .or_insert(value);
        }
        signable
    }

    fn create_canonical_headers(headers: &BTreeMap<&str, String>) -> String {
        let mut result = String::with_capacity(headers.len() * 64);
        for (k, v) in headers {
            result.push_str(k);
            result.push(':');
            result.push_str(v);
            result.push('\n');
        }
        result
    }

    fn create_signed_headers(headers: &BTreeMap<&str, String>) -> String {
        headers.keys().copied().collect::<Vec<_>>().join(";")
    }
}

impl fmt::Display for CanonicalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.canonical_uri,
            self.canonical_query_string,
            self.canonical_headers,
            self.signed_headers,
            self.payload_hash
        )
    }
}

/// `host`, `content-type` and every `x-amz-*` header are signed
fn is_signed_header(lowercase_name: &str) -> bool {
    lowercase_name == "host"
        || lowercase_name == "content-type"
        || lowercase_name.starts_with("x-amz-")
}

/// Trim and collapse internal whitespace runs to a single space
fn collapse_whitespace(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for word in value.split_whitespace() {
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(word);
    }
    result
}

/// Create canonical query string.
///
/// Each pair is decoded and re-encoded (RFC 3986), parameters without `=`
/// become `name=`, and pairs are sorted by name only. The sort is stable, so
/// repeated names keep their original order.
pub fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match pair.find('=') {
            Some(pos) => (&pair[..pos], &pair[pos + 1..]),
            None => (pair, ""),
        };
        let decoded_key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
        let decoded_value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
        params.push((uri_encode(&decoded_key, true), uri_encode(&decoded_value, true)));
    }

    params.sort_by(|a, b| a.0.cmp(&b.0));

    let mut result = String::with_capacity(query.len() + 16);
    for (i, (k, v)) in params.iter().enumerate() {
        if i > 0 {
            result.push('&');
        }
        result.push_str(k);
        result.push('=');
        result.push_str(v);
    }
    result
}

/// URI encode a string (RFC 3986) using hex lookup table
pub fn uri_encode(s: &str, encode_slash: bool) -> String {
    let mut result = String::with_capacity(s.len() + 16);
    uri_encode_into(&mut result, s, encode_slash);
    result
}

/// URI encode directly into `buf`
pub fn uri_encode_into(buf: &mut String, s: &str, encode_slash: bool) {
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                buf.push(byte as char);
            }
            b'/' if !encode_slash => {
                buf.push('/');
            }
            _ => {
                buf.push('%');
                buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
                buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
}

/// Lowercase hex SHA-256 of a payload, using the constant for empty bodies
pub fn payload_hash(payload: &[u8]) -> String {
    if payload.is_empty() {
        EMPTY_SHA256.to_string()
    } else {
        hex::encode(Sha256::digest(payload))
    }
}

/// AWS Signature Version 4 signer
///
/// Stateless: every input arrives with the call, so one signer can serve any
/// number of concurrent requests.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    service: String,
}

impl Default for RequestSigner {
    fn default() -> Self {
        Self::new("s3")
    }
}

impl RequestSigner {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Sign a canonical request.
    ///
    /// Returns the `Authorization` parameters:
    /// `Credential=<ak>/<scope>, SignedHeaders=<names>, Signature=<hex>`.
    pub fn sign(
        canonical: &CanonicalRequest,
        credentials: &Credentials,
        ctx: &SigningContext<'_>,
    ) -> String {
        let credential_scope = ctx.credential_scope();
        let canonical_request_hash = canonical.hash();
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM, ctx.timestamp, credential_scope, canonical_request_hash
        );

        let signing_key = derive_signing_key(
            &credentials.secret_key,
            ctx.scope_date(),
            ctx.region,
            ctx.service,
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        format!(
            "Credential={}/{}, SignedHeaders={}, Signature={}",
            credentials.access_key, credential_scope, canonical.signed_headers, signature
        )
    }

    /// Sign a request in place by adding its `authorization` header.
    ///
    /// `host`, `x-amz-date` and `x-amz-content-sha256` must already be set;
    /// a session token is attached as `x-amz-security-token` before signing.
    pub fn sign_request(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &mut HeaderMap,
        credentials: &Credentials,
        region: &str,
    ) -> Result<()> {
        if credentials.access_key.is_empty() || credentials.secret_key.is_empty() {
            return Err(S3Error::Credentials(
                "access key and secret key are required for signing".to_string(),
            ));
        }

        if let Some(token) = &credentials.session_token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| S3Error::Credentials(format!("invalid session token: {}", e)))?;
            headers.insert(X_AMZ_SECURITY_TOKEN, value);
        }

        let timestamp = header_str(headers, X_AMZ_DATE)?.to_string();
        let payload_hash = header_str(headers, X_AMZ_CONTENT_SHA256)?.to_string();
        if !headers.contains_key(http::header::HOST) {
            return Err(S3Error::InvalidResponse(
                "host header must be set before signing".to_string(),
            ));
        }

        let canonical = CanonicalRequest::new(method, uri, headers, &payload_hash);
        tracing::trace!(canonical_request = %canonical, "sigv4_canonical_request");

        let ctx = SigningContext::new(region, &self.service, &timestamp);
        let authorization = format!(
            "{} {}",
            ALGORITHM,
            Self::sign(&canonical, credentials, &ctx)
        );
        let value = HeaderValue::from_str(&authorization)
            .map_err(|e| S3Error::InvalidResponse(format!("invalid authorization header: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| S3Error::InvalidResponse(format!("{} header must be set before signing", name)))
}

/// Derive signing key (4 chained HMAC operations)
pub fn derive_signing_key(secret_key: &str, scope_date: &str, region: &str, service: &str) -> [u8; 32] {
    let aws4_key = format!("AWS4{}", secret_key);
    let k_date = hmac_sha256(aws4_key.as_bytes(), scope_date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// HMAC-SHA256 returning fixed-size array
fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    let result = mac.finalize().into_bytes();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("localhost:9000"));
        headers.insert("x-amz-content-sha256", HeaderValue::from_static(EMPTY_SHA256));
        headers.insert("x-amz-date", HeaderValue::from_static("20240411T153713Z"));
        headers
    }

    #[test]
    fn test_known_signature() {
        let uri: Uri = "http://localhost:9000/test?delimiter=%2F&encoding-type=url&list-type=2&prefix="
            .parse()
            .unwrap();
        let headers = listing_headers();
        let canonical = CanonicalRequest::new(&Method::GET, &uri, &headers, EMPTY_SHA256);
        let credentials = Credentials::new("minioadmin", "minioadmin");
        let ctx = SigningContext::new("us-east-1", "s3", "20240411T153713Z");

        assert_eq!(
            RequestSigner::sign(&canonical, &credentials, &ctx),
            "Credential=minioadmin/20240411/us-east-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, \
             Signature=fbc9b67904568217c4dcdd438483fa7ff914a793e532d215eecddae7f78bdfe8"
        );
    }

    #[test]
    fn test_sign_request_sets_authorization() {
        let uri: Uri = "http://localhost:9000/test?prefix=&list-type=2&encoding-type=url&delimiter=%2F"
            .parse()
            .unwrap();
        let mut headers = listing_headers();
        headers.insert("content-length", HeaderValue::from_static("0"));

        RequestSigner::default()
            .sign_request(
                &Method::GET,
                &uri,
                &mut headers,
                &Credentials::new("minioadmin", "minioadmin"),
                "us-east-1",
            )
            .unwrap();

        // Query order and unsigned headers do not change the signature
        let auth = headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=minioadmin/20240411/"));
        assert!(auth.ends_with(
            "Signature=fbc9b67904568217c4dcdd438483fa7ff914a793e532d215eecddae7f78bdfe8"
        ));
    }

    #[test]
    fn test_sign_request_includes_session_token() {
        let uri: Uri = "http://localhost:9000/bucket".parse().unwrap();
        let mut headers = listing_headers();
        let credentials = Credentials::new("ak", "sk").with_session_token("token");

        RequestSigner::default()
            .sign_request(&Method::GET, &uri, &mut headers, &credentials, "us-east-1")
            .unwrap();

        assert_eq!(headers.get(X_AMZ_SECURITY_TOKEN).unwrap(), "token");
        let auth = headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(auth.contains(
            "SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token"
        ));
    }

    #[test]
    fn test_sign_request_requires_credentials() {
        let uri: Uri = "http://localhost:9000/bucket".parse().unwrap();
        let mut headers = listing_headers();
        let result = RequestSigner::default().sign_request(
            &Method::GET,
            &uri,
            &mut headers,
            &Credentials::new("", ""),
            "us-east-1",
        );
        assert!(matches!(result, Err(S3Error::Credentials(_))));
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("hello world", true), "hello%20world");
        assert_eq!(uri_encode("hello/world", true), "hello%2Fworld");
        assert_eq!(uri_encode("hello/world", false), "hello/world");
        assert_eq!(uri_encode("test@example.com", true), "test%40example.com");
    }

    #[test]
    fn test_canonical_query_string() {
        assert_eq!(canonical_query_string(""), "");
        assert_eq!(canonical_query_string("key=value"), "key=value");
        assert_eq!(canonical_query_string("zebra=1&alpha=2"), "alpha=2&zebra=1");
        assert_eq!(canonical_query_string("uploads"), "uploads=");
        assert_eq!(canonical_query_string("prefix=a%20b&delimiter=/"), "delimiter=%2F&prefix=a%20b");
    }

    #[test]
    fn test_canonical_query_string_keeps_duplicate_order() {
        assert_eq!(
            canonical_query_string("events=s3%3AObjectRemoved%3A%2A&ping=10&events=s3%3AObjectCreated%3A%2A"),
            "events=s3%3AObjectRemoved%3A%2A&events=s3%3AObjectCreated%3A%2A&ping=10"
        );
    }

    #[test]
    fn test_canonical_headers_filter_and_collapse() {
        let uri: Uri = "http://localhost:9000/b/k".parse().unwrap();
        let mut headers = listing_headers();
        headers.insert("content-type", HeaderValue::from_static("  text/plain;   charset=utf-8 "));
        headers.insert("content-length", HeaderValue::from_static("12"));
        headers.insert("x-amz-meta-color", HeaderValue::from_static("deep    blue"));

        let canonical = CanonicalRequest::new(&Method::PUT, &uri, &headers, EMPTY_SHA256);

        assert_eq!(
            canonical.signed_headers,
            "content-type;host;x-amz-content-sha256;x-amz-date;x-amz-meta-color"
        );
        assert!(canonical
            .canonical_headers
            .contains("content-type:text/plain; charset=utf-8\n"));
        assert!(canonical.canonical_headers.contains("x-amz-meta-color:deep blue\n"));
        assert!(!canonical.canonical_headers.contains("content-length"));
    }

    #[test]
    fn test_empty_sha256_constant() {
        let computed = hex::encode(Sha256::digest(b""));
        assert_eq!(EMPTY_SHA256, computed);
        assert_eq!(payload_hash(b""), EMPTY_SHA256);
    }

    #[test]
    fn test_scope_date() {
        let ctx = SigningContext::new("eu-west-1", "s3", "20260101T000000Z");
        assert_eq!(ctx.scope_date(), "20260101");
        assert_eq!(ctx.credential_scope(), "20260101/eu-west-1/s3/aws4_request");
    }

    #[test]
    fn test_signing_key_depends_on_date() {
        let k1 = derive_signing_key("secret", "20260101", "us-east-1", "s3");
        let k2 = derive_signing_key("secret", "20260101", "us-east-1", "s3");
        let k3 = derive_signing_key("secret", "20260102", "us-east-1", "s3");
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }
}
