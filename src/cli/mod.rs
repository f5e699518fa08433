//! Command-line front end for s3wire
//!
//! mc-style commands (`mb`, `rb`, `ls`, `put`, `get`, `rm`, `stat`, `listen`)
//! implemented on top of [`crate::s3::S3Client`].
//!
//! ```bash
//! s3wire ls s3://bucket/prefix/ --recursive
//! s3wire put ./backup.tar s3://bucket/backups/
//! s3wire listen s3://bucket/logs/ --event s3:ObjectCreated:* --suffix .gz
//! ```

pub mod args;
pub mod commands;
