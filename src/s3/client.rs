//! High-level S3 operations
//!
//! Every call builds an [`S3Request`], runs it through the shared
//! [`RequestPipeline`] (signing, retry, cancellation) and decodes the answer.
//! Listings and notifications come back as lazy streams.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use http::header::HeaderMap;
use http::Method;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{Config, Profile};
use crate::s3::bucket_config::{NotificationConfig, ObjectLockConfig};
use crate::s3::checksum::ChecksumValue;
use crate::s3::error::{Result, S3Error};
use crate::s3::listing::{paginate, ListingPage};
use crate::s3::multipart::{MultipartUploadCoordinator, PartResult, UploadSession};
use crate::s3::notification::NotificationStream;
use crate::s3::pipeline::{read_body, RequestPipeline, S3Response};
use crate::s3::request::{ByteRange, Endpoint, S3Request};
use crate::s3::retry::RetryPolicy;
use crate::s3::signer::Credentials;
use crate::s3::transport::{
    Clock, CredentialsProvider, HttpTransport, HyperTransport, ResponseBody, StaticProvider,
    SystemClock, TransportConfig,
};
use crate::s3::types::{
    BucketInfo, CompleteMultipartUploadResponse, DeleteObjectsResponse, ListObjectsArgs,
    MultipartConfig, ObjectStat, PartInfo, PutObjectOptions, S3Object, UploadInfo,
};
use crate::s3::validation::{
    validate_bucket_name, validate_object_key, validate_object_size, MAX_PART_SIZE,
};
use crate::s3::xml;

/// Region that takes no LocationConstraint on bucket creation
pub const DEFAULT_REGION: &str = "us-east-1";

/// Maximum keys per DeleteObjects request
pub const MAX_DELETE_KEYS: usize = 1000;

/// Keep-alive interval requested from the server when listening, in seconds
const LISTEN_PING_SECS: u32 = 10;

/// Builder for [`S3Client`]
pub struct S3ClientBuilder {
    endpoint: String,
    region: String,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    transport: Option<Arc<dyn HttpTransport>>,
    clock: Option<Arc<dyn Clock>>,
    retry: RetryPolicy,
    transport_config: TransportConfig,
}

impl S3ClientBuilder {
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Use fixed credentials
    pub fn credentials(self, credentials: Credentials) -> Self {
        self.credentials_provider(Arc::new(StaticProvider::new(credentials)))
    }

    pub fn credentials_provider(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Replace the default hyper transport
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    pub fn build(self) -> Result<S3Client> {
        let endpoint = Endpoint::parse(&self.endpoint)?;
        let credentials = self
            .credentials
            .ok_or_else(|| S3Error::Credentials("no credentials configured".to_string()))?;
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(&self.transport_config)?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let pipeline = RequestPipeline::new(endpoint, self.region, transport, credentials, clock)
            .with_retry_policy(self.retry);
        Ok(S3Client::from_pipeline(pipeline))
    }
}

/// Streaming object download
pub struct GetObjectResponse {
    pub stat: ObjectStat,
    pub body: ResponseBody,
    cancel: CancellationToken,
}

impl GetObjectResponse {
    /// Read the whole object into memory
    ///
    /// Fails with [`S3Error::Cancelled`] if the client's token fires mid-read.
    pub async fn bytes(self) -> Result<Bytes> {
        read_body(self.body, &self.cancel).await
    }
}

/// S3 client
///
/// Clone is cheap - the pipeline shares its transport through an Arc.
#[derive(Clone)]
pub struct S3Client {
    pipeline: RequestPipeline,
    multipart: MultipartUploadCoordinator,
    cancel: CancellationToken,
}

impl S3Client {
    pub fn builder(endpoint: impl Into<String>) -> S3ClientBuilder {
        S3ClientBuilder {
            endpoint: endpoint.into(),
            region: DEFAULT_REGION.to_string(),
            credentials: None,
            transport: None,
            clock: None,
            retry: RetryPolicy::default(),
            transport_config: TransportConfig::default(),
        }
    }

    pub fn from_pipeline(pipeline: RequestPipeline) -> Self {
        Self {
            multipart: MultipartUploadCoordinator::new(pipeline.clone()),
            pipeline,
            cancel: CancellationToken::new(),
        }
    }

    /// Build a client from a configuration profile
    pub fn from_profile(profile: &Profile, config: &Config) -> Result<Self> {
        let mut credentials = Credentials::new(&profile.access_key, &profile.secret_key);
        if let Some(token) = &profile.session_token {
            credentials = credentials.with_session_token(token);
        }

        Self::builder(&profile.endpoint)
            .region(&profile.region)
            .credentials(credentials)
            .retry_policy(config.retry.to_policy())
            .transport_config(config.http.to_transport_config())
            .build()
    }

    /// A client whose calls observe `cancel`
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    async fn execute(&self, request: &S3Request) -> Result<S3Response> {
        self.pipeline.execute(request, &self.cancel).await
    }

    async fn execute_bytes(&self, request: &S3Request) -> Result<Bytes> {
        self.execute(request).await?.bytes(&self.cancel).await
    }

    // =========================================================================
    // Buckets
    // =========================================================================

    /// Create a bucket in the client's region
    pub async fn make_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;

        let mut request = S3Request::new(Method::PUT).bucket(bucket);
        let region = self.pipeline.region();
        if region != DEFAULT_REGION {
            request = request
                .header("content-type", "application/xml")?
                .body(xml::create_bucket_body(region));
        }

        self.execute(&request).await?;
        debug!(bucket = %bucket, region = %region, "bucket_created");
        Ok(())
    }

    /// HEAD the bucket; a 404 means it does not exist
    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        validate_bucket_name(bucket)?;

        match self.execute(&S3Request::new(Method::HEAD).bucket(bucket)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        self.execute(&S3Request::new(Method::DELETE).bucket(bucket)).await?;
        Ok(())
    }

    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let body = self.execute_bytes(&S3Request::new(Method::GET)).await?;
        xml::parse_list_buckets(&body)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Upload an object in one request. Returns the ETag.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutObjectOptions,
    ) -> Result<String> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        validate_object_size(data.len() as u64)?;
        if data.len() as u64 > MAX_PART_SIZE {
            return Err(S3Error::validation(format!(
                "object of {} bytes is too large for a single PUT, use upload_multipart",
                data.len()
            )));
        }

        let mut request = options.apply_headers(S3Request::new(Method::PUT).bucket(bucket).key(key))?;
        if let Some(algorithm) = options.checksum {
            let checksum = ChecksumValue::compute(algorithm, &data);
            request = request.header(algorithm.header_name(), &checksum.value)?;
        }
        let request = request.body(data);

        let response = self.execute(&request).await?;
        Ok(response
            .header("etag")
            .map(|etag| etag.trim_matches('"').to_string())
            .unwrap_or_default())
    }

    /// Download an object, optionally a byte range of it. The body streams.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<GetObjectResponse> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;

        let mut request = S3Request::new(Method::GET).bucket(bucket).key(key);
        if let Some(range) = range {
            request = request.header("range", &range.header_value())?;
        }

        let response = self.execute(&request).await?;
        let stat = object_stat(&response.headers);
        Ok(GetObjectResponse {
            stat,
            body: response.into_body(),
            cancel: self.cancel.clone(),
        })
    }

    /// Object metadata without the body
    pub async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;

        let response = self
            .execute(&S3Request::new(Method::HEAD).bucket(bucket).key(key))
            .await?;
        Ok(object_stat(&response.headers))
    }

    pub async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        self.execute(&S3Request::new(Method::DELETE).bucket(bucket).key(key))
            .await?;
        Ok(())
    }

    /// Delete up to 1000 objects in one request
    pub async fn remove_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteObjectsResponse> {
        validate_bucket_name(bucket)?;
        if keys.is_empty() {
            return Ok(DeleteObjectsResponse::default());
        }
        if keys.len() > MAX_DELETE_KEYS {
            return Err(S3Error::validation(format!(
                "cannot delete {} objects at once, the maximum is {}",
                keys.len(),
                MAX_DELETE_KEYS
            )));
        }
        for key in keys {
            validate_object_key(key)?;
        }

        let body = xml::delete_objects_body(keys).into_bytes();
        let request = S3Request::new(Method::POST)
            .bucket(bucket)
            .query("delete", "")
            .header("content-type", "application/xml")?
            .header("content-md5", &content_md5(&body))?
            .body(body);

        let body = self.execute_bytes(&request).await?;
        xml::parse_delete_result(&body)
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// Stream objects (and common prefixes unless recursive) under a prefix
    pub fn list_objects(&self, bucket: &str, args: ListObjectsArgs) -> BoxStream<'static, Result<S3Object>> {
        if let Err(e) = validate_bucket_name(bucket) {
            return stream::once(async move { Err(e) }).boxed();
        }

        let client = self.clone();
        let bucket = bucket.to_string();
        paginate(move |token: Option<String>| {
            let client = client.clone();
            let bucket = bucket.clone();
            let args = args.clone();
            async move { client.list_objects_page(&bucket, &args, token).await }
        })
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        args: &ListObjectsArgs,
        continuation_token: Option<String>,
    ) -> Result<ListingPage<S3Object, String>> {
        let mut request = S3Request::new(Method::GET)
            .bucket(bucket)
            .query("list-type", "2")
            .query("encoding-type", "url")
            .query("max-keys", args.max_keys.to_string())
            .query("prefix", args.prefix.clone().unwrap_or_default());
        if !args.recursive {
            request = request.query("delimiter", "/");
        }
        request = match continuation_token {
            Some(token) => request.query("continuation-token", token),
            None => request.query_opt("start-after", args.start_after.clone()),
        };

        let body = self.execute_bytes(&request).await?;
        let page = xml::parse_list_objects(&body)?;

        let mut items = page.contents;
        items.extend(page.common_prefixes.into_iter().map(S3Object::prefix));
        Ok(ListingPage {
            items,
            next_marker: page.next_continuation_token,
            is_truncated: page.is_truncated,
        })
    }

    /// Stream the parts uploaded so far for an upload
    pub fn list_parts(&self, bucket: &str, key: &str, upload_id: &str) -> BoxStream<'static, Result<PartInfo>> {
        if let Err(e) = validate_bucket_name(bucket).and_then(|_| validate_object_key(key)) {
            return stream::once(async move { Err(e) }).boxed();
        }
        let client = self.clone();
        let request = S3Request::new(Method::GET)
            .bucket(bucket)
            .key(key)
            .query("uploadId", upload_id);

        paginate(move |marker: Option<u32>| {
            let client = client.clone();
            let request = request
                .clone()
                .query_opt("part-number-marker", marker.map(|m| m.to_string()));
            async move {
                let page = xml::parse_list_parts(&client.execute_bytes(&request).await?)?;
                Ok(ListingPage {
                    items: page.parts,
                    next_marker: page.next_part_number_marker,
                    is_truncated: page.is_truncated,
                })
            }
        })
    }

    /// Stream in-progress multipart uploads under a prefix
    pub fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> BoxStream<'static, Result<UploadInfo>> {
        if let Err(e) = validate_bucket_name(bucket) {
            return stream::once(async move { Err(e) }).boxed();
        }

        let client = self.clone();
        let request = S3Request::new(Method::GET)
            .bucket(bucket)
            .query("uploads", "")
            .query_opt("prefix", prefix);

        // Key and upload-id markers always travel together
        paginate(move |marker: Option<(String, Option<String>)>| {
            let client = client.clone();
            let mut request = request.clone();
            if let Some((key_marker, upload_id_marker)) = marker {
                request = request
                    .query("key-marker", key_marker)
                    .query_opt("upload-id-marker", upload_id_marker);
            }
            async move {
                let page = xml::parse_list_multipart_uploads(&client.execute_bytes(&request).await?)?;
                Ok(ListingPage {
                    items: page.uploads,
                    next_marker: page
                        .next_key_marker
                        .map(|key| (key, page.next_upload_id_marker)),
                    is_truncated: page.is_truncated,
                })
            }
        })
    }

    // =========================================================================
    // Multipart uploads
    // =========================================================================

    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        options: &PutObjectOptions,
    ) -> Result<UploadSession> {
        self.multipart.create(bucket, key, options, &self.cancel).await
    }

    pub async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartResult> {
        self.multipart
            .upload_part(session, part_number, data, &self.cancel)
            .await
    }

    /// Complete with the parts recorded in `session`
    pub async fn complete_multipart_upload(
        &self,
        session: &UploadSession,
    ) -> Result<CompleteMultipartUploadResponse> {
        self.multipart.complete(session, &self.cancel).await
    }

    pub async fn complete_multipart_upload_with_parts(
        &self,
        session: &UploadSession,
        parts: Vec<PartResult>,
    ) -> Result<CompleteMultipartUploadResponse> {
        self.multipart
            .complete_with_parts(session, parts, &self.cancel)
            .await
    }

    pub async fn abort_multipart_upload(&self, session: &UploadSession) -> Result<()> {
        self.multipart.abort(session, &self.cancel).await
    }

    /// Upload `data` as a multipart object, aborting the upload if a part fails
    pub async fn upload_multipart(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        config: &MultipartConfig,
    ) -> Result<CompleteMultipartUploadResponse> {
        self.multipart
            .upload_all(bucket, key, data, config, &self.cancel)
            .await
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Subscribe to bucket events. The stream runs until the server closes
    /// the connection, the stream is dropped, or the client is cancelled.
    pub async fn listen_bucket_notification(
        &self,
        bucket: &str,
        events: &[&str],
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Result<NotificationStream> {
        validate_bucket_name(bucket)?;

        let mut request = S3Request::new(Method::GET)
            .bucket(bucket)
            .query_opt("prefix", prefix)
            .query_opt("suffix", suffix)
            .query("ping", LISTEN_PING_SECS.to_string());
        for event in events {
            request = request.query("events", *event);
        }

        let response = self.execute(&request).await?;
        debug!(bucket = %bucket, events = ?events, "notification_listen_started");
        Ok(NotificationStream::spawn(response.into_body(), &self.cancel))
    }

    pub async fn get_bucket_notification(&self, bucket: &str) -> Result<NotificationConfig> {
        validate_bucket_name(bucket)?;
        let request = S3Request::new(Method::GET).bucket(bucket).query("notification", "");
        NotificationConfig::from_xml(&self.execute_bytes(&request).await?)
    }

    pub async fn set_bucket_notification(&self, bucket: &str, config: &NotificationConfig) -> Result<()> {
        validate_bucket_name(bucket)?;
        let request = S3Request::new(Method::PUT)
            .bucket(bucket)
            .query("notification", "")
            .header("content-type", "application/xml")?
            .body(config.to_xml());
        self.execute(&request).await?;
        Ok(())
    }

    pub async fn remove_all_bucket_notification(&self, bucket: &str) -> Result<()> {
        self.set_bucket_notification(bucket, &NotificationConfig::default())
            .await
    }

    // =========================================================================
    // Object lock
    // =========================================================================

    pub async fn get_object_lock_config(&self, bucket: &str) -> Result<ObjectLockConfig> {
        validate_bucket_name(bucket)?;
        let request = S3Request::new(Method::GET).bucket(bucket).query("object-lock", "");
        ObjectLockConfig::from_xml(&self.execute_bytes(&request).await?)
    }

    pub async fn set_object_lock_config(&self, bucket: &str, config: &ObjectLockConfig) -> Result<()> {
        validate_bucket_name(bucket)?;
        let body = config.to_xml().into_bytes();
        let request = S3Request::new(Method::PUT)
            .bucket(bucket)
            .query("object-lock", "")
            .header("content-type", "application/xml")?
            .header("content-md5", &content_md5(&body))?
            .body(body);
        self.execute(&request).await?;
        Ok(())
    }
}

/// Base64 MD5 of a request body
fn content_md5(body: &[u8]) -> String {
    BASE64_STANDARD.encode(md5::compute(body).0)
}

/// Metadata carried by GET and HEAD response headers
fn object_stat(headers: &HeaderMap) -> ObjectStat {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };

    let user_metadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().strip_prefix("x-amz-meta-")?;
            Some((name.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();

    ObjectStat {
        size: text("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        etag: text("etag").map(|e| e.trim_matches('"').to_string()),
        content_type: text("content-type"),
        last_modified: text("last-modified"),
        version_id: text("x-amz-version-id"),
        user_metadata,
    }
}
