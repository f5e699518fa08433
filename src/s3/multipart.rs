//! Multipart upload coordination
//!
//! Create -> any number of concurrent UploadPart calls -> Complete or Abort.
//! Parts may finish in any order; the session keeps the acknowledged ETag per
//! part number and completion always presents them in ascending order.

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use http::Method;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::s3::checksum::{ChecksumAlgorithm, ChecksumValue};
use crate::s3::error::{Result, S3Error};
use crate::s3::pipeline::RequestPipeline;
use crate::s3::request::S3Request;
use crate::s3::types::{CompleteMultipartUploadResponse, MultipartConfig, PutObjectOptions};
use crate::s3::validation::{
    validate_bucket_name, validate_object_key, validate_part_number, validate_part_size, PartPlan,
};
use crate::s3::xml;

/// Server acknowledgement of one uploaded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartResult {
    pub part_number: u32,
    /// ETag without surrounding quotes
    pub etag: String,
    pub checksum: Option<ChecksumValue>,
}

impl PartResult {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into().trim_matches('"').to_string(),
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: ChecksumValue) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

/// One in-progress multipart upload
#[derive(Debug)]
pub struct UploadSession {
    bucket: String,
    key: String,
    upload_id: String,
    checksum: Option<ChecksumAlgorithm>,
    parts: Mutex<BTreeMap<u32, PartResult>>,
}

impl UploadSession {
    /// Attach to an upload created elsewhere
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
            checksum: None,
            parts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_checksum(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum = Some(algorithm);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.checksum
    }

    /// Record an acknowledged part. A later upload of the same part number
    /// replaces the earlier one, matching what the server keeps.
    pub fn record(&self, part: PartResult) {
        self.parts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(part.part_number, part);
    }

    /// Recorded parts in ascending part-number order
    pub fn parts(&self) -> Vec<PartResult> {
        self.parts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn part_count(&self) -> usize {
        self.parts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Sort parts for completion, rejecting an empty list and repeated numbers
pub fn completion_order(mut parts: Vec<PartResult>) -> Result<Vec<PartResult>> {
    if parts.is_empty() {
        return Err(S3Error::validation(
            "cannot complete a multipart upload with zero parts",
        ));
    }
    parts.sort_by_key(|p| p.part_number);
    for pair in parts.windows(2) {
        if pair[0].part_number == pair[1].part_number {
            return Err(S3Error::validation(format!(
                "part number {} listed more than once",
                pair[0].part_number
            )));
        }
    }
    for part in &parts {
        validate_part_number(part.part_number)?;
        if part.etag.is_empty() {
            return Err(S3Error::validation(format!(
                "part {} has no ETag",
                part.part_number
            )));
        }
    }
    Ok(parts)
}

/// Drives the multipart protocol over a [`RequestPipeline`]
#[derive(Clone)]
pub struct MultipartUploadCoordinator {
    pipeline: RequestPipeline,
}

impl MultipartUploadCoordinator {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    /// Start a new upload
    pub async fn create(
        &self,
        bucket: &str,
        key: &str,
        options: &PutObjectOptions,
        cancel: &CancellationToken,
    ) -> Result<UploadSession> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;

        let mut request = S3Request::new(Method::POST)
            .bucket(bucket)
            .key(key)
            .query("uploads", "");
        request = options.apply_headers(request)?;
        if let Some(algorithm) = options.checksum {
            request = request.header("x-amz-checksum-algorithm", algorithm.as_str())?;
        }

        let body = self.pipeline.execute(&request, cancel).await?.bytes(cancel).await?;
        let created = xml::parse_create_multipart(&body)?;
        debug!(bucket = %bucket, key = %key, upload_id = %created.upload_id, "multipart_created");

        let session = UploadSession::new(bucket, key, created.upload_id);
        Ok(match options.checksum {
            Some(algorithm) => session.with_checksum(algorithm),
            None => session,
        })
    }

    /// Upload one part and record its ETag in the session
    pub async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<PartResult> {
        validate_part_number(part_number)?;
        validate_part_size(data.len() as u64)?;

        let checksum = session
            .checksum
            .map(|algorithm| ChecksumValue::compute(algorithm, &data));

        let mut request = S3Request::new(Method::PUT)
            .bucket(&session.bucket)
            .key(&session.key)
            .query("partNumber", part_number.to_string())
            .query("uploadId", &session.upload_id);
        if let Some(checksum) = &checksum {
            request = request.header(checksum.algorithm.header_name(), &checksum.value)?;
        }
        let request = request.body(data);

        let response = self.pipeline.execute(&request, cancel).await?;
        let etag = response
            .header("etag")
            .ok_or_else(|| {
                S3Error::InvalidResponse(format!("UploadPart {} response has no ETag", part_number))
            })?
            .to_string();

        let mut part = PartResult::new(part_number, etag);
        part.checksum = checksum;
        session.record(part.clone());
        Ok(part)
    }

    /// Complete with every part recorded in the session
    pub async fn complete(
        &self,
        session: &UploadSession,
        cancel: &CancellationToken,
    ) -> Result<CompleteMultipartUploadResponse> {
        self.complete_with_parts(session, session.parts(), cancel).await
    }

    /// Complete with an explicit part list; it is sorted before sending.
    pub async fn complete_with_parts(
        &self,
        session: &UploadSession,
        parts: Vec<PartResult>,
        cancel: &CancellationToken,
    ) -> Result<CompleteMultipartUploadResponse> {
        let parts = completion_order(parts)?;

        let request = S3Request::new(Method::POST)
            .bucket(&session.bucket)
            .key(&session.key)
            .query("uploadId", &session.upload_id)
            .header("content-type", "application/xml")?
            .body(xml::complete_multipart_body(&parts));

        let response = self.pipeline.execute(&request, cancel).await?;
        let status = response.status;
        let body = response.bytes(cancel).await?;

        // Completion can fail after a 200 status line; the error is in the body
        if let Some(error) = xml::parse_error_response(&body) {
            return Err(S3Error::Http {
                method: Method::POST,
                uri: request.uri(self.pipeline.endpoint())?.to_string(),
                status,
                error: Some(Box::new(error)),
            });
        }

        let result = xml::parse_complete_multipart(&body)?;
        debug!(
            bucket = %session.bucket,
            key = %session.key,
            parts = parts.len(),
            "multipart_completed"
        );
        Ok(result)
    }

    /// Abandon the upload and let the server discard its parts
    pub async fn abort(&self, session: &UploadSession, cancel: &CancellationToken) -> Result<()> {
        let request = S3Request::new(Method::DELETE)
            .bucket(&session.bucket)
            .key(&session.key)
            .query("uploadId", &session.upload_id);
        self.pipeline.execute(&request, cancel).await?;
        debug!(bucket = %session.bucket, key = %session.key, "multipart_aborted");
        Ok(())
    }

    /// Split `data`, upload the parts with bounded concurrency and complete.
    ///
    /// On a part failure the upload is aborted before the error is returned,
    /// unless the failure was a cancellation.
    pub async fn upload_all(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        config: &MultipartConfig,
        cancel: &CancellationToken,
    ) -> Result<CompleteMultipartUploadResponse> {
        let plan = PartPlan::new(data.len() as u64, config.part_size)?;

        let options = PutObjectOptions {
            content_type: config.content_type.clone(),
            checksum: config.checksum,
            ..Default::default()
        };
        let session = self.create(bucket, key, &options, cancel).await?;

        let uploaded: Result<Vec<PartResult>> = stream::iter(1..=plan.part_count)
            .map(|part_number| {
                let (start, end) = plan.part_range(part_number);
                let part_data = data.slice(start as usize..end as usize);
                let session = &session;
                async move { self.upload_part(session, part_number, part_data, cancel).await }
            })
            .buffer_unordered(config.concurrency.max(1))
            .try_collect()
            .await;

        if let Err(err) = uploaded {
            if !matches!(err, S3Error::Cancelled) {
                if let Err(abort_err) = self.abort(&session, cancel).await {
                    warn!(
                        bucket = %bucket,
                        key = %key,
                        upload_id = %session.upload_id,
                        error = %abort_err,
                        "multipart_abort_failed"
                    );
                }
            }
            return Err(err);
        }

        self.complete(&session, cancel).await
    }
}
