//! S3 types and response structures

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::s3::error::Result;
use crate::s3::request::S3Request;

/// S3 Object metadata, or a common prefix when listing with a delimiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Object {
    /// Object key (or prefix)
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp (optional)
    pub last_modified: Option<String>,
    /// ETag without quotes (optional)
    pub etag: Option<String>,
    /// Storage class (STANDARD, STANDARD_IA, GLACIER, etc.)
    pub storage_class: Option<String>,
    /// True for `CommonPrefixes` entries
    pub is_prefix: bool,
}

impl S3Object {
    /// Create a new S3Object
    pub fn new(key: String, size: u64) -> Self {
        Self {
            key,
            size,
            last_modified: None,
            etag: None,
            storage_class: None,
            is_prefix: false,
        }
    }

    /// Create a prefix entry
    pub fn prefix(key: String) -> Self {
        Self {
            is_prefix: true,
            ..Self::new(key, 0)
        }
    }
}

/// Response from ListObjectsV2 operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListObjectsResponse {
    /// List of objects
    pub contents: Vec<S3Object>,
    /// Common prefixes (subdirectories when using delimiter)
    pub common_prefixes: Vec<String>,
    /// Whether the response is truncated
    pub is_truncated: bool,
    /// Continuation token for next request
    pub next_continuation_token: Option<String>,
    /// `url` when keys and prefixes are percent-encoded
    pub encoding_type: Option<String>,
    /// Key count in this response
    pub key_count: Option<i32>,
}

/// Uploaded part, as reported by ListParts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
    pub last_modified: Option<String>,
}

/// Response from ListParts operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPartsResponse {
    pub parts: Vec<PartInfo>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<u32>,
}

/// In-progress multipart upload, as reported by ListMultipartUploads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInfo {
    pub key: String,
    pub upload_id: String,
    pub initiated: Option<String>,
    pub storage_class: Option<String>,
}

/// Response from ListMultipartUploads operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListMultipartUploadsResponse {
    pub uploads: Vec<UploadInfo>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// Bucket entry from ListBuckets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub creation_date: Option<String>,
}

/// Object metadata from HEAD
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStat {
    pub size: u64,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub version_id: Option<String>,
    /// `x-amz-meta-*` headers, keyed without the prefix
    pub user_metadata: BTreeMap<String, String>,
}

/// Response from DeleteObjects batch operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteObjectsResponse {
    /// List of successfully deleted objects
    pub deleted: Vec<DeletedObject>,
    /// List of errors
    pub errors: Vec<DeleteError>,
}

/// Deleted object information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedObject {
    /// Object key
    pub key: String,
    /// Version ID (optional)
    pub version_id: Option<String>,
}

impl DeletedObject {
    /// Create a new deleted object
    pub fn new(key: String) -> Self {
        Self {
            key,
            version_id: None,
        }
    }
}

/// Delete error information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteError {
    /// Object key
    pub key: String,
    /// Error code
    pub code: String,
    /// Error message
    pub message: String,
}

// =============================================================================
// Multipart Upload Types
// =============================================================================

/// Response from CreateMultipartUpload operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMultipartUploadResponse {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Upload ID for subsequent UploadPart and CompleteMultipartUpload requests
    pub upload_id: String,
}

/// Response from CompleteMultipartUpload operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteMultipartUploadResponse {
    /// Location URL of the completed object
    pub location: Option<String>,
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// ETag of the completed object
    pub etag: String,
}

/// Configuration for the `upload_multipart` convenience
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Part size in bytes (default: 16MiB)
    pub part_size: u64,
    /// Maximum concurrent part uploads (default: 4)
    pub concurrency: usize,
    /// Optional per-part checksum
    pub checksum: Option<crate::s3::checksum::ChecksumAlgorithm>,
    pub content_type: Option<String>,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: crate::s3::validation::MIN_PART_SIZE,
            concurrency: 4,
            checksum: None,
            content_type: None,
        }
    }
}

impl MultipartConfig {
    /// Create a new config with custom part size
    pub fn with_part_size(mut self, size: u64) -> Self {
        self.part_size = size;
        self
    }

    /// Create a new config with custom concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_checksum(mut self, algorithm: crate::s3::checksum::ChecksumAlgorithm) -> Self {
        self.checksum = Some(algorithm);
        self
    }
}

/// Options for a ListObjectsV2 listing
#[derive(Debug, Clone)]
pub struct ListObjectsArgs {
    pub prefix: Option<String>,
    /// List every key below the prefix instead of grouping by `/`
    pub recursive: bool,
    pub start_after: Option<String>,
    /// Page size requested from the server
    pub max_keys: u32,
}

impl Default for ListObjectsArgs {
    fn default() -> Self {
        Self {
            prefix: None,
            recursive: false,
            start_after: None,
            max_keys: 1000,
        }
    }
}

impl ListObjectsArgs {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

/// Options for PutObject
#[derive(Debug, Clone, Default)]
pub struct PutObjectOptions {
    pub content_type: Option<String>,
    /// User metadata, sent as `x-amz-meta-<name>`
    pub user_metadata: BTreeMap<String, String>,
    pub checksum: Option<crate::s3::checksum::ChecksumAlgorithm>,
}

impl PutObjectOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_metadata.insert(name.into(), value.into());
        self
    }

    /// Content type and `x-amz-meta-*` headers
    pub(crate) fn apply_headers(&self, mut request: S3Request) -> Result<S3Request> {
        if let Some(content_type) = &self.content_type {
            request = request.header("content-type", content_type)?;
        }
        for (name, value) in &self.user_metadata {
            request = request.header(&format!("x-amz-meta-{}", name.to_ascii_lowercase()), value)?;
        }
        Ok(request)
    }
}
