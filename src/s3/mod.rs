//! S3 client module with AWS SigV4 signing
//!
//! This module provides:
//! - AWS Signature Version 4 signing for S3 requests
//! - A request pipeline with retry, backoff and cancellation
//! - Bucket, object, multipart, listing and notification operations
//! - Typed request and response structures

pub mod bucket_config;
pub mod checksum;
pub mod client;
pub mod error;
pub mod listing;
pub mod multipart;
pub mod notification;
pub mod pipeline;
pub mod request;
pub mod retry;
pub mod signer;
pub mod transport;
pub mod types;
pub mod validation;
pub mod xml;

// Re-export main types for convenience
pub use bucket_config::{NotificationConfig, NotificationTarget, ObjectLockConfig, RetentionMode};
pub use checksum::{ChecksumAlgorithm, ChecksumValue};
pub use client::{GetObjectResponse, S3Client, S3ClientBuilder};
pub use error::{ErrorResponse, Result, S3Error};
pub use multipart::{PartResult, UploadSession};
pub use notification::{NotificationEvent, NotificationRecord, NotificationStream};
pub use pipeline::{RequestPipeline, S3Response};
pub use request::{ByteRange, S3Request};
pub use retry::RetryPolicy;
pub use signer::{Credentials, RequestSigner};
pub use transport::{Clock, CredentialsProvider, HttpTransport, ResponseBody};
pub use types::{
    BucketInfo, CompleteMultipartUploadResponse, DeleteObjectsResponse, ListObjectsArgs,
    MultipartConfig, ObjectStat, PartInfo, PutObjectOptions, S3Object, UploadInfo,
};
