use crate::core::embedding::{self, EmbeddingConfig};
use crate::core::quality::{self, QualityFilter};
use crate::core::temporal::{self, PairSimilarity, TemporalGrouper};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Which similarity pass produces the `similar` groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityPolicy {
    /// Embedding groups first, heuristic grouping for what could not be embedded.
    #[default]
    EmbeddingFirst,
    HeuristicOnly,
    /// No heuristic fallback for unevaluated assets.
    EmbeddingOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub low_quality_byte_threshold: u64,
    pub time_window_ms: i64,
    pub heuristic_size_sim_min: f64,
    pub heuristic_dim_sim_min: f64,
    pub embedding_similarity_threshold: f64,
    pub max_assets_per_scan: usize,
    pub per_bucket_pair_ceiling: usize,
    pub embedding_batch_size: usize,
    pub max_resident_embeddings: usize,
    pub embedding_pairwise_ceiling: usize,
    pub extraction_timeout_ms: u64,
    pub similarity_policy: SimilarityPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            low_quality_byte_threshold: quality::DEFAULT_LOW_QUALITY_BYTES,
            time_window_ms: temporal::DEFAULT_TIME_WINDOW_MS,
            heuristic_size_sim_min: temporal::DEFAULT_SIZE_SIM_MIN,
            heuristic_dim_sim_min: temporal::DEFAULT_DIM_SIM_MIN,
            embedding_similarity_threshold: embedding::DEFAULT_SIMILARITY_THRESHOLD,
            max_assets_per_scan: 1000,
            per_bucket_pair_ceiling: temporal::DEFAULT_PAIR_CEILING,
            embedding_batch_size: embedding::DEFAULT_BATCH_SIZE,
            max_resident_embeddings: embedding::DEFAULT_MAX_RESIDENT,
            embedding_pairwise_ceiling: embedding::DEFAULT_PAIRWISE_CEILING,
            extraction_timeout_ms: embedding::DEFAULT_EXTRACTION_TIMEOUT.as_millis() as u64,
            similarity_policy: SimilarityPolicy::default(),
        }
    }
}

impl ScanConfig {
    /// Read a JSON config. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: ScanConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "heuristic_size_sim_min",
            self.heuristic_size_sim_min,
            0.0,
            1.0,
        )?;
        check_range(
            "heuristic_dim_sim_min",
            self.heuristic_dim_sim_min,
            0.0,
            1.0,
        )?;
        check_range(
            "embedding_similarity_threshold",
            self.embedding_similarity_threshold,
            -1.0,
            1.0,
        )?;

        let sizes = [
            ("max_assets_per_scan", self.max_assets_per_scan),
            ("per_bucket_pair_ceiling", self.per_bucket_pair_ceiling),
            ("embedding_batch_size", self.embedding_batch_size),
            ("max_resident_embeddings", self.max_resident_embeddings),
            ("embedding_pairwise_ceiling", self.embedding_pairwise_ceiling),
        ];
        if let Some((field, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*field));
        }
        if self.extraction_timeout_ms == 0 {
            return Err(ConfigError::Zero("extraction_timeout_ms"));
        }
        if self.time_window_ms < 0 {
            return Err(ConfigError::OutOfRange {
                field: "time_window_ms",
                min: 0.0,
                max: f64::MAX,
                value: self.time_window_ms as f64,
            });
        }
        Ok(())
    }

    pub fn quality_filter(&self) -> QualityFilter {
        QualityFilter::new(self.low_quality_byte_threshold)
    }

    pub fn pair_similarity(&self) -> PairSimilarity {
        PairSimilarity::new(self.heuristic_size_sim_min, self.heuristic_dim_sim_min)
    }

    pub fn temporal_grouper(&self) -> TemporalGrouper {
        TemporalGrouper::new(
            self.time_window_ms,
            self.per_bucket_pair_ceiling,
            self.pair_similarity(),
        )
    }

    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            threshold: self.embedding_similarity_threshold,
            batch_size: self.embedding_batch_size,
            max_resident: self.max_resident_embeddings,
            pairwise_ceiling: self.embedding_pairwise_ceiling,
            time_window_ms: self.time_window_ms,
            extraction_timeout: Duration::from_millis(self.extraction_timeout_ms),
        }
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}
