//! Photo classification and grouping: low-quality photos, exact duplicates and
//! similar shots, each group with a recommended photo to keep.

pub mod config;
pub mod core;
pub mod services;

pub use config::{ScanConfig, SimilarityPolicy};
