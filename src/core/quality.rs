use crate::core::asset::AssetRecord;

pub const DEFAULT_LOW_QUALITY_BYTES: u64 = 100_000;

/// Flags undersized photos.
///
/// A zero byte size (unreadable or empty file) counts as low quality rather
/// than an error; read failures are handled by the asset source.
#[derive(Debug, Clone, Copy)]
pub struct QualityFilter {
    threshold_bytes: u64,
}

impl QualityFilter {
    pub fn new(threshold_bytes: u64) -> Self {
        Self { threshold_bytes }
    }

    pub fn is_low_quality(&self, record: &AssetRecord) -> bool {
        record.byte_size < self.threshold_bytes
    }

    pub fn threshold_bytes(&self) -> u64 {
        self.threshold_bytes
    }
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_QUALITY_BYTES)
    }
}
