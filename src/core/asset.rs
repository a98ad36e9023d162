use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Opaque identifier of one photo, unique within a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Metadata snapshot of a single photo.
///
/// Records are built once during ingestion and only ever cloned or borrowed
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub filename: String,
    pub locator: String,
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
    /// Milliseconds since the Unix epoch.
    pub creation_time: i64,
}

impl AssetRecord {
    /// Pixel area, 0 when either dimension is unknown.
    pub fn pixel_area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Ordering by creation time, then id. Every grouping pass relies on it.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.creation_time
            .cmp(&other.creation_time)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Sort records into canonical order in place.
pub fn sort_canonical(records: &mut [AssetRecord]) {
    records.sort_by(AssetRecord::canonical_cmp);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClassificationTag {
    LowQuality,
    Duplicate,
    Similar,
}

#[cfg(test)]
pub(crate) fn record(
    id: &str,
    byte_size: u64,
    width: u32,
    height: u32,
    creation_time: i64,
) -> AssetRecord {
    AssetRecord {
        id: AssetId::from(id),
        filename: format!("{id}.jpg"),
        locator: format!("/photos/{id}.jpg"),
        byte_size,
        width,
        height,
        creation_time,
    }
}
