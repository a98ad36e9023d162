pub mod deletion;
pub mod extractor;
pub mod history;
pub mod source;

pub use deletion::{apply_deletion, DeletionExecutor, FsDeletionExecutor};
pub use extractor::{FeatureExtractor, PerceptualExtractor, PrecomputedExtractor};
pub use history::{HistoryStore, JsonlHistoryStore, MemoryHistoryStore, ScanSummary};
pub use source::{AssetSource, FsAssetSource, MemoryAssetSource};
