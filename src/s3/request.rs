//! Request descriptions and URL construction
//!
//! An [`S3Request`] says what to send (method, bucket, key, query, headers,
//! body); the pipeline turns it into a signed HTTP request against an
//! [`Endpoint`]. Addressing is path-style: `/<bucket>/<key>`.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Uri};
use std::borrow::Cow;
use std::fmt;

use crate::s3::error::{Result, S3Error};
use crate::s3::signer::uri_encode_into;

/// Hex lookup table for key encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Server base URL (`http(s)://host[:port]`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    secure: bool,
    authority: String,
    host_header: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self> {
        let uri: Uri = url
            .trim_end_matches('/')
            .parse()
            .map_err(|e| S3Error::validation(format!("invalid endpoint '{}': {}", url, e)))?;

        let secure = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => {
                return Err(S3Error::validation(format!(
                    "endpoint '{}' must start with http:// or https://",
                    url
                )))
            }
        };
        let authority = uri
            .authority()
            .ok_or_else(|| S3Error::validation(format!("endpoint '{}' has no host", url)))?
            .as_str()
            .to_string();
        if uri.path() != "/" && !uri.path().is_empty() {
            return Err(S3Error::validation(format!(
                "endpoint '{}' must not contain a path",
                url
            )));
        }

        // Host header: strip default ports
        let host_header = if secure {
            authority.strip_suffix(":443").unwrap_or(&authority)
        } else {
            authority.strip_suffix(":80").unwrap_or(&authority)
        }
        .to_string();

        Ok(Self {
            secure,
            authority,
            host_header,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Value for the `host` header
    pub fn host(&self) -> &str {
        &self.host_header
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.authority)
    }
}

/// Description of one S3 call
#[derive(Debug, Clone)]
pub struct S3Request {
    pub method: Method,
    pub bucket: Option<String>,
    pub key: Option<String>,
    /// Unencoded query pairs in insertion order
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl S3Request {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            bucket: None,
            key: None,
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter only when a value is present
    pub fn query_opt(self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.query(name, v),
            None => self,
        }
    }

    /// Add a header, failing with a validation error on an invalid name or value
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| S3Error::validation(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| S3Error::validation(format!("invalid header value for '{}': {}", name, e)))?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// `/bucket/key?query` with the key encoded except for `/`
    pub fn path_and_query(&self) -> String {
        let mut url = String::with_capacity(128);
        url.push('/');
        if let Some(bucket) = &self.bucket {
            url.push_str(bucket);
            if let Some(key) = &self.key {
                url.push('/');
                url.push_str(&encode_s3_key(key));
            }
        }

        for (i, (name, value)) in self.query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            uri_encode_into(&mut url, name, true);
            url.push('=');
            uri_encode_into(&mut url, value, true);
        }
        url
    }

    /// Absolute URI against `endpoint`
    pub fn uri(&self, endpoint: &Endpoint) -> Result<Uri> {
        let url = format!("{}{}", endpoint, self.path_and_query());
        url.parse()
            .map_err(|e| S3Error::validation(format!("invalid request URI '{}': {}", url, e)))
    }
}

/// Encode an S3 key, preserving forward slashes
/// Returns Cow::Borrowed when no encoding is needed (common case = zero allocation)
pub fn encode_s3_key(key: &str) -> Cow<'_, str> {
    let needs_encoding = key.bytes().any(|b| {
        !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/')
    });

    if !needs_encoding {
        return Cow::Borrowed(key);
    }

    let mut result = String::with_capacity(key.len() + 32);
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                result.push(byte as char);
            }
            _ => {
                result.push('%');
                result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    Cow::Owned(result)
}

/// `Range` header value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-`
    From(u64),
    /// `bytes=start-end`, inclusive
    Between(u64, u64),
    /// `bytes=-n`: the last n bytes
    Suffix(u64),
}

impl ByteRange {
    /// Build a range from signed offsets.
    ///
    /// - `(0, 0)`: whole object, no header
    /// - `(0, end < 0)`: last `-end` bytes
    /// - `(start > 0, 0)`: from `start` to the end
    /// - `(start >= 0, end > 0)` with `end >= start`: inclusive range
    ///
    /// Every other combination is rejected.
    pub fn from_offsets(start: i64, end: i64) -> Result<Option<Self>> {
        match (start, end) {
            (0, 0) => Ok(None),
            (0, e) if e < 0 => Ok(Some(ByteRange::Suffix(e.unsigned_abs()))),
            (s, 0) if s > 0 => Ok(Some(ByteRange::From(s as u64))),
            (s, e) if s >= 0 && e > 0 && e >= s => Ok(Some(ByteRange::Between(s as u64, e as u64))),
            _ => Err(S3Error::validation(format!(
                "invalid byte range start={} end={}",
                start, end
            ))),
        }
    }

    pub fn header_value(&self) -> String {
        match self {
            ByteRange::From(start) => format!("bytes={}-", start),
            ByteRange::Between(start, end) => format!("bytes={}-{}", start, end),
            ByteRange::Suffix(n) => format!("bytes=-{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_host_strips_default_port() {
        assert_eq!(Endpoint::parse("https://s3.example.com:443").unwrap().host(), "s3.example.com");
        assert_eq!(Endpoint::parse("http://localhost:80/").unwrap().host(), "localhost");
        assert_eq!(Endpoint::parse("http://localhost:9000").unwrap().host(), "localhost:9000");
        assert!(Endpoint::parse("ftp://localhost").is_err());
        assert!(Endpoint::parse("http://localhost:9000/base").is_err());
    }

    #[test]
    fn test_path_and_query() {
        let request = S3Request::new(Method::GET)
            .bucket("test")
            .query("list-type", "2")
            .query("prefix", "")
            .query("delimiter", "/");
        assert_eq!(request.path_and_query(), "/test?list-type=2&prefix=&delimiter=%2F");

        let request = S3Request::new(Method::PUT).bucket("b").key("dir/file name.txt");
        assert_eq!(request.path_and_query(), "/b/dir/file%20name.txt");

        assert_eq!(S3Request::new(Method::GET).path_and_query(), "/");
    }

    #[test]
    fn test_uri() {
        let endpoint = Endpoint::parse("http://localhost:9000").unwrap();
        let uri = S3Request::new(Method::POST)
            .bucket("b")
            .key("k")
            .query("uploads", "")
            .uri(&endpoint)
            .unwrap();
        assert_eq!(uri.to_string(), "http://localhost:9000/b/k?uploads=");
    }

    #[test]
    fn test_encode_s3_key_no_encoding() {
        let result = encode_s3_key("path/to/file.txt");
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "path/to/file.txt");
    }

    #[test]
    fn test_encode_s3_key_with_encoding() {
        let result = encode_s3_key("path/to/file with spaces.txt");
        assert!(matches!(result, Cow::Owned(_)));
        assert_eq!(result, "path/to/file%20with%20spaces.txt");
    }

    #[test]
    fn test_invalid_header_rejected() {
        assert!(matches!(
            S3Request::new(Method::GET).header("bad header", "v"),
            Err(S3Error::Validation(_))
        ));
        assert!(matches!(
            S3Request::new(Method::GET).header("range", "bytes=0-\n1"),
            Err(S3Error::Validation(_))
        ));
        assert!(S3Request::new(Method::GET).header("x-amz-meta-a", "b").is_ok());
    }

    #[test]
    fn test_byte_range_suffix_and_prefix_edges() {
        assert_eq!(ByteRange::from_offsets(0, 0).unwrap(), None);
        assert_eq!(ByteRange::from_offsets(0, -100).unwrap(), Some(ByteRange::Suffix(100)));
        assert_eq!(ByteRange::from_offsets(10, 0).unwrap(), Some(ByteRange::From(10)));
        assert_eq!(ByteRange::from_offsets(0, 9).unwrap(), Some(ByteRange::Between(0, 9)));
        assert_eq!(ByteRange::from_offsets(5, 5).unwrap(), Some(ByteRange::Between(5, 5)));

        // Asymmetric cases that are not a general range algebra
        assert!(ByteRange::from_offsets(10, -5).is_err());
        assert!(ByteRange::from_offsets(-1, 0).is_err());
        assert!(ByteRange::from_offsets(10, 5).is_err());

        assert_eq!(ByteRange::Suffix(100).header_value(), "bytes=-100");
        assert_eq!(ByteRange::From(10).header_value(), "bytes=10-");
        assert_eq!(ByteRange::Between(0, 9).header_value(), "bytes=0-9");
    }
}
