use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http_body_util::BodyExt;
use std::fmt::Write as FmtWrite;
use std::io::Write;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::cli::args::S3Path;
use crate::s3::client::MAX_DELETE_KEYS;
use crate::s3::types::{ListObjectsArgs, MultipartConfig, PutObjectOptions};
use crate::s3::S3Client;

/// Make bucket command
pub async fn cmd_mb(client: &S3Client, path: &S3Path) -> Result<()> {
    client.make_bucket(&path.bucket).await?;
    println!("Bucket created: s3://{}", path.bucket);
    Ok(())
}

/// Remove bucket command
pub async fn cmd_rb(client: &S3Client, path: &S3Path) -> Result<()> {
    client.remove_bucket(&path.bucket).await?;
    println!("Bucket removed: s3://{}", path.bucket);
    Ok(())
}

/// List command, one mc-style line per object or prefix
pub async fn cmd_ls(client: &S3Client, path: &S3Path, recursive: bool) -> Result<()> {
    let mut args = ListObjectsArgs::default().recursive(recursive);
    if let Some(prefix) = &path.key {
        args = args.with_prefix(prefix);
    }

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::with_capacity(64 * 1024, stdout.lock());
    let mut line = String::with_capacity(256);

    let mut objects = client.list_objects(&path.bucket, args);
    while let Some(object) = objects.try_next().await? {
        line.clear();
        if object.is_prefix {
            let _ = write!(line, "[{:>23}] {:>7} {}", "", "PRE", object.key);
        } else {
            let _ = write!(
                line,
                "[{}] {:>7} {}",
                format_s3_date(object.last_modified.as_deref()),
                format_bytes_compact(object.size),
                object.key
            );
        }
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}

/// Upload a local file; large files go through multipart
pub async fn cmd_put(client: &S3Client, source: &Path, dest: &S3Path, part_size: u64) -> Result<()> {
    let key = match &dest.key {
        Some(key) if !key.ends_with('/') => key.clone(),
        prefix => {
            let name = source
                .file_name()
                .and_then(|n| n.to_str())
                .context("source path has no file name")?;
            format!("{}{}", prefix.as_deref().unwrap_or(""), name)
        }
    };

    let data = Bytes::from(
        tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?,
    );
    let size = data.len() as u64;

    let etag = if size > part_size {
        let config = MultipartConfig::default().with_part_size(part_size);
        client
            .upload_multipart(&dest.bucket, &key, data, &config)
            .await?
            .etag
    } else {
        client
            .put_object(&dest.bucket, &key, data, &PutObjectOptions::default())
            .await?
    };

    println!(
        "{} -> s3://{}/{} ({}, etag {})",
        source.display(),
        dest.bucket,
        key,
        format_bytes_compact(size),
        etag
    );
    Ok(())
}

/// Download an object to a local file, streaming the body
pub async fn cmd_get(client: &S3Client, source: &S3Path, dest: &Path) -> Result<()> {
    let key = source.require_key()?;
    let response = client.get_object(&source.bucket, key, None).await?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut body = response.body;
    let mut written = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| anyhow::anyhow!("download interrupted: {}", e))?;
        if let Ok(data) = frame.into_data() {
            file.write_all(&data).await?;
            written += data.len() as u64;
        }
    }
    file.flush().await?;

    println!("{} -> {} ({})", source, dest.display(), format_bytes_compact(written));
    Ok(())
}

/// Remove one object, or everything under a prefix in batches
pub async fn cmd_rm(client: &S3Client, path: &S3Path, recursive: bool) -> Result<()> {
    if !recursive {
        let key = path.require_key()?;
        client.remove_object(&path.bucket, key).await?;
        println!("Removed {}", path);
        return Ok(());
    }

    let mut args = ListObjectsArgs::default().recursive(true);
    if let Some(prefix) = &path.key {
        args = args.with_prefix(prefix);
    }

    let mut keys = client
        .list_objects(&path.bucket, args)
        .map_ok(|object| object.key)
        .chunks(MAX_DELETE_KEYS);

    let mut removed = 0usize;
    while let Some(batch) = keys.next().await {
        let batch: Vec<String> = batch.into_iter().collect::<Result<_, _>>()?;
        let result = client.remove_objects(&path.bucket, &batch).await?;
        for error in &result.errors {
            eprintln!("Failed to remove {}: {} {}", error.key, error.code, error.message);
        }
        removed += result.deleted.len();
    }

    println!("Removed {} objects under {}", removed, path);
    Ok(())
}

/// Object metadata
pub async fn cmd_stat(client: &S3Client, path: &S3Path) -> Result<()> {
    let stat = client.stat_object(&path.bucket, path.require_key()?).await?;
    println!("{}", serde_json::to_string_pretty(&stat)?);
    Ok(())
}

/// Print bucket events as JSON lines until interrupted
pub async fn cmd_listen(client: &S3Client, path: &S3Path, events: &[String], suffix: Option<&str>) -> Result<()> {
    let events: Vec<&str> = events.iter().map(String::as_str).collect();
    let mut stream = client
        .listen_bucket_notification(&path.bucket, &events, path.key.as_deref(), suffix)
        .await?;

    while let Some(event) = stream.next().await {
        println!("{}", serde_json::to_string(&event?)?);
    }
    Ok(())
}

// ============================================================================
// Utility functions
// ============================================================================

/// Format bytes in mc-compatible compact form (0B, 1.0KiB, 10MiB, etc.)
pub fn format_bytes_compact(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes == 0 {
        return "0B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exponent = ((bytes_f64.ln() / 1024_f64.ln()).floor() as usize).min(UNITS.len() - 1);
    let value = bytes_f64 / 1024_f64.powi(exponent as i32);

    if exponent == 0 {
        format!("{}B", bytes)
    } else if value >= 10.0 {
        format!("{:.0}{}", value, UNITS[exponent])
    } else {
        format!("{:.1}{}", value, UNITS[exponent])
    }
}

/// `2026-01-22T20:44:33.219Z` -> `2026-01-22 20:44:33 UTC`
pub fn format_s3_date(date_str: Option<&str>) -> String {
    match date_str.and_then(|s| s.split_once('T')) {
        Some((date, time)) => {
            let time = time.get(..8).unwrap_or_else(|| time.trim_end_matches('Z'));
            format!("{} {} UTC", date, time)
        }
        None => date_str.unwrap_or("").to_string(),
    }
}
