//! Storage API resource types
//!
//! Data structures for the bucket and file endpoints, plus the display
//! helpers used when listing them.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bucket resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default = "default_true")]
    pub is_public: bool,
    /// Bytes; `None` means unlimited.
    #[serde(default)]
    pub storage_limit: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Bucket {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }
}

/// Body of `POST /api/buckets`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateBucket {
    pub name: String,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_limit: Option<u64>,
}

impl CreateBucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_public: true,
            storage_limit: None,
        }
    }

    pub fn private(mut self) -> Self {
        self.is_public = false;
        self
    }

    pub fn storage_limit(mut self, bytes: u64) -> Self {
        self.storage_limit = Some(bytes);
        self
    }
}

/// Body of `PATCH /api/buckets/{id}`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateBucket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_limit: Option<u64>,
}

impl UpdateBucket {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.is_public.is_none() && self.storage_limit.is_none()
    }
}

/// File resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: i64,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub bucket_id: Option<i64>,
    #[serde(default, alias = "content_type")]
    pub file_content_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub is_deleted: Option<bool>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl StoredFile {
    pub fn name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("")
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }
}

/// Downloaded file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

fn default_true() -> bool {
    true
}

/// Parse an RFC 3339 timestamp, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Human-readable size in 1024 steps with at most two decimals:
/// `0 Bytes`, `512 Bytes`, `1.5 KB`, `4 MB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, SIZE_UNITS[unit])
}

/// Files whose name contains `query`, ignoring case. An empty query keeps
/// everything.
pub fn filter_files<'a>(files: &'a [StoredFile], query: &str) -> Vec<&'a StoredFile> {
    let needle = query.trim().to_lowercase();
    files
        .iter()
        .filter(|f| needle.is_empty() || f.name().to_lowercase().contains(&needle))
        .collect()
}

/// Sum of known file sizes.
pub fn total_size(files: &[StoredFile]) -> u64 {
    files.iter().filter_map(|f| f.file_size).sum()
}
