pub mod asset;
pub mod best_pick;
pub mod duplicate;
pub mod embedding;
pub mod group;
pub mod quality;
pub mod result;
pub mod scanner;
pub mod temporal;

pub use asset::{AssetId, AssetRecord, ClassificationTag};
pub use best_pick::pick_best;
pub use duplicate::DuplicateDetector;
pub use embedding::{EmbeddingDetector, FeatureVector};
pub use group::{Group, GroupKind, GroupMember};
pub use quality::QualityFilter;
pub use result::{ScanResult, SimilaritySource};
pub use scanner::{FailureReason, ScanError, ScanOrchestrator, ScanProgress, ScanState};
pub use temporal::TemporalGrouper;
