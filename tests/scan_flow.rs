use image::{ImageBuffer, Rgb};
use photosweep::config::ScanConfig;
use photosweep::core::asset::AssetId;
use photosweep::core::embedding::FeatureVector;
use photosweep::core::group::GroupKind;
use photosweep::core::result::SimilaritySource;
use photosweep::core::scanner::{FailureReason, ScanError, ScanOrchestrator, ScanState};
use photosweep::services::deletion::{apply_deletion, FsDeletionExecutor};
use photosweep::services::extractor::{ExtractorError, FeatureExtractor};
use photosweep::services::history::{
    HistoryError, HistoryStore, JsonlHistoryStore, MemoryHistoryStore, ScanSummary,
};
use photosweep::services::source::{
    AssetListing, AssetSource, FsAssetSource, MemoryAssetSource, SourceError,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_image(path: &Path, width: u32, height: u32) {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        let intensity = ((x * 7 + y * 13) % 256) as u8;
        Rgb([intensity, 255 - intensity, intensity / 2])
    });
    img.save(path).unwrap();
}

fn listing(id: &str, time: i64) -> AssetListing {
    AssetListing {
        id: AssetId::from(id),
        filename: format!("{id}.jpg"),
        locator: format!("/library/{id}.jpg"),
        creation_time: time,
        width: 4000,
        height: 3000,
    }
}

struct DisconnectingSource {
    listings: Vec<AssetListing>,
    lost_at: String,
}

impl AssetSource for DisconnectingSource {
    fn list_photo_assets(&self, limit: usize) -> Result<Vec<AssetListing>, SourceError> {
        Ok(self.listings.iter().take(limit).cloned().collect())
    }

    fn byte_size(&self, locator: &str) -> Result<u64, SourceError> {
        if locator == self.lost_at {
            Err(SourceError::Unavailable("library disconnected".to_string()))
        } else {
            Ok(2_000_000)
        }
    }
}

struct SlowListingSource;

impl AssetSource for SlowListingSource {
    fn list_photo_assets(&self, _limit: usize) -> Result<Vec<AssetListing>, SourceError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(vec![listing("a", 0)])
    }

    fn byte_size(&self, _locator: &str) -> Result<u64, SourceError> {
        Ok(2_000_000)
    }
}

struct ReadOnlyHistory;

impl HistoryStore for ReadOnlyHistory {
    fn write_scan_summary(&self, _summary: &ScanSummary) -> Result<(), HistoryError> {
        Err(HistoryError::Unavailable("read-only volume".to_string()))
    }

    fn read_latest_scan_summary(&self) -> Result<Option<ScanSummary>, HistoryError> {
        Ok(None)
    }

    fn replace_latest_scan_summary(&self, _summary: &ScanSummary) -> Result<(), HistoryError> {
        Err(HistoryError::NoEntries)
    }

    fn list_scan_summaries(&self) -> Result<Vec<ScanSummary>, HistoryError> {
        Ok(Vec::new())
    }
}

/// Vectors for some locators, a long stall for the rest.
struct StallingExtractor;

impl FeatureExtractor for StallingExtractor {
    fn embed(&self, locator: &str) -> Result<FeatureVector, ExtractorError> {
        if locator.contains("stall") {
            std::thread::sleep(Duration::from_millis(300));
        }
        Ok(FeatureVector::new(vec![0.5, 0.5, 0.5]))
    }
}

#[tokio::test]
async fn test_directory_scan_end_to_end() {
    let photos = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    create_test_image(&photos.path().join("a.png"), 64, 64);
    create_test_image(&photos.path().join("b.png"), 64, 64);
    create_test_image(&photos.path().join("c.png"), 8, 8);
    std::fs::write(photos.path().join("readme.txt"), b"not a photo").unwrap();

    let history = Arc::new(JsonlHistoryStore::new(data.path().join("history.jsonl")));
    let scanner = ScanOrchestrator::new(
        ScanConfig::default(),
        Arc::new(FsAssetSource::new(photos.path())),
        history.clone(),
    );
    let report = scanner.run().await.unwrap();
    let result = &report.result;

    assert!(report.persisted);
    assert_eq!(result.total_scanned, 3);
    assert_eq!(result.skipped, 0);
    // small PNGs are all under the byte threshold
    assert_eq!(result.low_quality.len(), 3);
    assert_eq!(result.similar.len(), 1);
    assert_eq!(result.similar[0].asset_count(), 2);

    let latest = history.read_latest_scan_summary().unwrap().unwrap();
    assert_eq!(latest.counts, result.counts());
    assert_eq!(latest.result.scan_id, result.scan_id);
}

#[tokio::test]
async fn test_deletion_rewrites_latest_history_entry() {
    let photos = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    create_test_image(&photos.path().join("a.png"), 64, 64);
    create_test_image(&photos.path().join("b.png"), 64, 64);

    let history = Arc::new(JsonlHistoryStore::new(data.path().join("history.jsonl")));
    let config = ScanConfig::default();
    let scanner = ScanOrchestrator::new(
        config.clone(),
        Arc::new(FsAssetSource::new(photos.path())),
        history.clone(),
    );
    let result = scanner.run().await.unwrap().result;

    let group = &result.similar[0];
    let doomed: BTreeSet<AssetId> = group.removable_ids().into_iter().collect();
    let executor = FsDeletionExecutor::for_result(&result);
    let similarity = config.pair_similarity();
    let outcome = apply_deletion(&result, &executor, &doomed, &similarity).unwrap();
    history
        .replace_latest_scan_summary(&ScanSummary::from_result(&outcome.result))
        .unwrap();

    assert!(outcome.is_complete());
    assert!(outcome.result.similar.is_empty());
    assert_eq!(outcome.result.low_quality.len(), 1);
    for id in &doomed {
        let locator = executor.locator(id).unwrap();
        assert!(!Path::new(locator).exists());
    }

    let summaries = history.list_scan_summaries().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].counts.similar_groups, 0);
    assert_eq!(summaries[0].counts.total_scanned, 2);
}

#[tokio::test]
async fn test_missing_directory_fails_without_results() {
    let history = Arc::new(MemoryHistoryStore::new());
    let scanner = ScanOrchestrator::new(
        ScanConfig::default(),
        Arc::new(FsAssetSource::new("/no/such/photo/library")),
        history.clone(),
    );

    let err = scanner.run().await.unwrap_err();
    assert!(matches!(err, ScanError::SourceUnavailable(_)));
    assert!(matches!(
        scanner.state().await,
        ScanState::Failed(FailureReason::SourceUnavailable(_))
    ));
    assert!(history.list_scan_summaries().unwrap().is_empty());
}

#[tokio::test]
async fn test_source_lost_mid_scan_aborts() {
    let source = DisconnectingSource {
        listings: (0..50).map(|i| listing(&format!("p{i}"), i * 1000)).collect(),
        lost_at: "/library/p25.jpg".to_string(),
    };
    let history = Arc::new(MemoryHistoryStore::new());
    let scanner = ScanOrchestrator::new(
        ScanConfig::default(),
        Arc::new(source),
        history.clone(),
    );

    assert!(matches!(scanner.run().await, Err(ScanError::SourceUnavailable(_))));
    assert!(history.read_latest_scan_summary().unwrap().is_none());
}

#[tokio::test]
async fn test_unreadable_assets_are_counted_as_skipped() {
    let source = MemoryAssetSource::new()
        .with_asset(listing("a", 0), Some(3_000_000))
        .with_asset(listing("b", 100_000), None)
        .with_asset(listing("c", 200_000), None);
    let scanner = ScanOrchestrator::new(
        ScanConfig::default(),
        Arc::new(source),
        Arc::new(MemoryHistoryStore::new()),
    );

    let result = scanner.run().await.unwrap().result;
    assert_eq!(result.total_scanned, 1);
    assert_eq!(result.skipped, 2);
}

#[tokio::test]
async fn test_history_failure_still_returns_result() {
    let source = MemoryAssetSource::new()
        .with_asset(listing("a", 0), Some(3_000_000))
        .with_asset(listing("b", 0), Some(3_000_000));
    let scanner = ScanOrchestrator::new(
        ScanConfig::default(),
        Arc::new(source),
        Arc::new(ReadOnlyHistory),
    );

    let report = scanner.run().await.unwrap();
    assert!(!report.persisted);
    assert_eq!(report.result.duplicates.len(), 1);
    assert_eq!(scanner.state().await, ScanState::Completed);
}

#[tokio::test]
async fn test_max_assets_per_scan_limits_ingestion() {
    let mut source = MemoryAssetSource::new();
    for i in 0..30 {
        let asset = listing(&format!("p{i}"), i * 100_000);
        source = source.with_asset(asset, Some(1_000_000));
    }
    let config = ScanConfig {
        max_assets_per_scan: 10,
        ..ScanConfig::default()
    };
    let history = Arc::new(MemoryHistoryStore::new());
    let scanner = ScanOrchestrator::new(config, Arc::new(source), history);
    assert_eq!(scanner.run().await.unwrap().result.total_scanned, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_run_while_running_is_rejected() {
    let scanner = Arc::new(ScanOrchestrator::new(
        ScanConfig::default(),
        Arc::new(SlowListingSource),
        Arc::new(MemoryHistoryStore::new()),
    ));

    let first = {
        let scanner = Arc::clone(&scanner);
        tokio::spawn(async move { scanner.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(scanner.state().await, ScanState::Running);
    assert!(matches!(scanner.run().await, Err(ScanError::AlreadyRunning)));
    assert!(first.await.unwrap().is_ok());
    assert_eq!(scanner.state().await, ScanState::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_ingestion() {
    let scanner = Arc::new(ScanOrchestrator::new(
        ScanConfig::default(),
        Arc::new(SlowListingSource),
        Arc::new(MemoryHistoryStore::new()),
    ));

    let running = {
        let scanner = Arc::clone(&scanner);
        tokio::spawn(async move { scanner.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    scanner.cancel_scan();

    assert!(matches!(running.await.unwrap(), Err(ScanError::Cancelled)));
    assert_eq!(scanner.state().await, ScanState::Cancelled);
}

#[tokio::test]
async fn test_extraction_timeout_falls_back_to_heuristics() {
    let source = MemoryAssetSource::new()
        .with_asset(listing("a", 0), Some(3_000_000))
        .with_asset(listing("b", 900_000_000), Some(8_000_000))
        .with_asset(listing("stall1", 2_000_000_000), Some(3_000_000))
        .with_asset(listing("stall2", 2_000_001_000), Some(3_100_000));
    let config = ScanConfig {
        extraction_timeout_ms: 50,
        ..ScanConfig::default()
    };

    let history = Arc::new(MemoryHistoryStore::new());
    let scanner = ScanOrchestrator::new(config, Arc::new(source), history)
        .with_extractor(Arc::new(StallingExtractor));
    let result = scanner.run().await.unwrap().result;

    assert_eq!(result.similarity_source, SimilaritySource::Mixed);
    assert_eq!(result.similar.len(), 2);
    let embedding = result
        .similar
        .iter()
        .find(|g| g.kind == GroupKind::Embedding)
        .unwrap();
    assert_eq!(embedding.original.id.as_str(), "a");
    let heuristic = result
        .similar
        .iter()
        .find(|g| g.kind == GroupKind::Heuristic)
        .unwrap();
    assert_eq!(heuristic.original.id.as_str(), "stall1");
}
