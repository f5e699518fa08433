use anyhow::Context;
use std::fmt;
use std::str::FromStr;

/// `s3://bucket/key` or mc-style `s3/bucket/key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Path {
    pub bucket: String,
    pub key: Option<String>,
}

impl S3Path {
    /// The key, for commands that address a single object
    pub fn require_key(&self) -> anyhow::Result<&str> {
        self.key
            .as_deref()
            .with_context(|| format!("{} does not name an object", self))
    }
}

impl FromStr for S3Path {
    type Err = anyhow::Error;

    fn from_str(path: &str) -> anyhow::Result<Self> {
        let path = path.trim();

        let stripped = path
            .strip_prefix("s3://")
            .or_else(|| path.strip_prefix("s3/"))
            .with_context(|| format!("Invalid S3 path '{}'. Expected: s3://bucket/key", path))?;

        let (bucket, key) = match stripped.split_once('/') {
            Some((bucket, key)) => (bucket, Some(key).filter(|k| !k.is_empty())),
            None => (stripped, None),
        };
        if bucket.is_empty() {
            anyhow::bail!("Bucket name cannot be empty");
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.map(str::to_string),
        })
    }
}

impl fmt::Display for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key.as_deref().unwrap_or(""))
    }
}
