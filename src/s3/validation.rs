//! Input validation performed before any network call

use std::net::Ipv4Addr;

use crate::s3::error::{Result, S3Error};

pub const MIN_BUCKET_NAME_LEN: usize = 3;
pub const MAX_BUCKET_NAME_LEN: usize = 63;
pub const MAX_OBJECT_KEY_LEN: usize = 1024;

pub const MIN_PART_NUMBER: u32 = 1;
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Minimum size of every part except the last
pub const MIN_PART_SIZE: u64 = 16 * 1024 * 1024;
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 * 1024;

/// Validate an S3 bucket name.
///
/// - 3-63 characters long
/// - Only lowercase letters, numbers, hyphens, and dots
/// - Must start and end with a letter or number
/// - No consecutive dots (`..`)
/// - Not formatted as an IPv4 address
/// - Must not start with `xn--` or `sthree-`
/// - Must not end with `-s3alias` or `--ol-s3`
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Err(S3Error::validation(format!("invalid bucket name '{}': {}", name, reason)));

    let len = name.len();
    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&len) {
        return invalid("must be between 3 and 63 characters long");
    }

    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return invalid("only lowercase letters, numbers, hyphens and dots are allowed");
    }

    let first = name.as_bytes()[0];
    let last = name.as_bytes()[len - 1];
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return invalid("must start and end with a letter or number");
    }

    if name.contains("..") {
        return invalid("must not contain consecutive dots");
    }

    if name.parse::<Ipv4Addr>().is_ok() {
        return invalid("must not be formatted as an IP address");
    }

    if name.starts_with("xn--") || name.starts_with("sthree-") {
        return invalid("reserved prefix");
    }

    if name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        return invalid("reserved suffix");
    }

    Ok(())
}

/// Validate an object key: 1-1024 bytes
pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(S3Error::validation("object key must not be empty"));
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return Err(S3Error::validation(format!(
            "object key is {} bytes, the maximum is {}",
            key.len(),
            MAX_OBJECT_KEY_LEN
        )));
    }
    Ok(())
}

pub fn validate_part_number(part_number: u32) -> Result<()> {
    if !(MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&part_number) {
        return Err(S3Error::validation(format!(
            "part number {} is outside 1..=10000",
            part_number
        )));
    }
    Ok(())
}

pub fn validate_part_size(size: u64) -> Result<()> {
    if size > MAX_PART_SIZE {
        return Err(S3Error::validation(format!(
            "part size {} exceeds the 5 GiB maximum",
            size
        )));
    }
    Ok(())
}

pub fn validate_object_size(size: u64) -> Result<()> {
    if size > MAX_OBJECT_SIZE {
        return Err(S3Error::validation(format!(
            "object size {} exceeds the 5 TiB maximum",
            size
        )));
    }
    Ok(())
}

/// Part layout for an object of known size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub part_size: u64,
    pub part_count: u32,
    pub last_part_size: u64,
}

impl PartPlan {
    /// Check an explicit part size against a known object size.
    ///
    /// Every part but the last must be at least 16 MiB, no part may exceed
    /// 5 GiB, and there can be at most 10000 parts.
    pub fn new(object_size: u64, part_size: u64) -> Result<Self> {
        validate_object_size(object_size)?;
        validate_part_size(part_size)?;

        if part_size == 0 {
            return Err(S3Error::validation("part size must be positive"));
        }

        let part_count = object_size.div_ceil(part_size).max(1);
        if part_count > 1 && part_size < MIN_PART_SIZE {
            return Err(S3Error::validation(format!(
                "part size {} is below the 16 MiB minimum",
                part_size
            )));
        }
        if part_count > u64::from(MAX_PART_NUMBER) {
            return Err(S3Error::validation(format!(
                "object of {} bytes needs {} parts of {} bytes, the maximum is 10000",
                object_size, part_count, part_size
            )));
        }

        let last_part_size = object_size - (part_count - 1) * part_size;
        Ok(Self {
            part_size,
            part_count: part_count as u32,
            last_part_size,
        })
    }

    /// Smallest multiple of 16 MiB that fits the object in 10000 parts
    pub fn optimal(object_size: u64) -> Result<Self> {
        validate_object_size(object_size)?;
        let min_size = object_size.div_ceil(u64::from(MAX_PART_NUMBER));
        let part_size = min_size.div_ceil(MIN_PART_SIZE).max(1) * MIN_PART_SIZE;
        Self::new(object_size, part_size)
    }

    /// Byte range `[start, end)` of 1-based part `part_number`
    pub fn part_range(&self, part_number: u32) -> (u64, u64) {
        let start = u64::from(part_number - 1) * self.part_size;
        let len = if part_number == self.part_count {
            self.last_part_size
        } else {
            self.part_size
        };
        (start, start + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_bucket_names() {
        assert!(validate_bucket_name("docexamplebucket1").is_ok());
        assert!(validate_bucket_name("my.example.s3.bucket").is_ok());
        assert!(validate_bucket_name("log-delivery-march-2020").is_ok());
    }

    #[test]
    fn test_invalid_bucket_names() {
        assert!(validate_bucket_name("doc_example_bucket").is_err());
        assert!(validate_bucket_name("DocExampleBucket").is_err());
        assert!(validate_bucket_name("doc-example-bucket-").is_err());
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name(&"a".repeat(64)).is_err());
        assert!(validate_bucket_name("my..bucket").is_err());
        assert!(validate_bucket_name("192.168.5.4").is_err());
    }

    #[test]
    fn test_reserved_bucket_prefixes_and_suffixes() {
        assert!(validate_bucket_name("xn--bucket").is_err());
        assert!(validate_bucket_name("sthree-bucket").is_err());
        assert!(validate_bucket_name("bucket-s3alias").is_err());
        assert!(validate_bucket_name("bucket--ol-s3").is_err());
    }

    #[test]
    fn test_object_keys() {
        assert!(validate_object_key("photos/2024/image.jpg").is_ok());
        assert!(validate_object_key(&"k".repeat(1024)).is_ok());
        assert!(validate_object_key("").is_err());
        assert!(validate_object_key(&"k".repeat(1025)).is_err());
    }

    #[test]
    fn test_part_numbers() {
        assert!(validate_part_number(0).is_err());
        assert!(validate_part_number(1).is_ok());
        assert!(validate_part_number(10_000).is_ok());
        assert!(validate_part_number(10_001).is_err());
    }

    #[test]
    fn test_part_plan() {
        let plan = PartPlan::new(40 * 1024 * 1024, MIN_PART_SIZE).unwrap();
        assert_eq!(plan.part_count, 3);
        assert_eq!(plan.last_part_size, 8 * 1024 * 1024);
        assert_eq!(plan.part_range(3), (32 * 1024 * 1024, 40 * 1024 * 1024));

        // A single small part is fine, several small parts are not
        assert_eq!(PartPlan::new(1024, 1024).unwrap().part_count, 1);
        assert!(PartPlan::new(4096, 1024).is_err());
        assert!(PartPlan::new(MAX_OBJECT_SIZE + 1, MAX_PART_SIZE).is_err());
    }

    #[test]
    fn test_optimal_part_size() {
        assert_eq!(PartPlan::optimal(0).unwrap().part_count, 1);
        assert_eq!(PartPlan::optimal(100 * 1024 * 1024).unwrap().part_size, MIN_PART_SIZE);

        let plan = PartPlan::optimal(MAX_OBJECT_SIZE).unwrap();
        assert!(plan.part_count <= MAX_PART_NUMBER);
        assert_eq!(plan.part_size % MIN_PART_SIZE, 0);
    }
}
