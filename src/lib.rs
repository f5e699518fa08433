//! s3wire - S3-compatible object storage client

pub mod cli;
pub mod config;
pub mod s3;

pub use config::Config;
pub use s3::{S3Client, S3Error};
