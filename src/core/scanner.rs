use crate::config::{ConfigError, ScanConfig, SimilarityPolicy};
use crate::core::asset::{sort_canonical, AssetId, AssetRecord};
use crate::core::duplicate::DuplicateDetector;
use crate::core::embedding::EmbeddingDetector;
use crate::core::group::Group;
use crate::core::result::{ResultError, ScanResult, SimilaritySource};
use crate::services::extractor::FeatureExtractor;
use crate::services::history::{HistoryStore, ScanSummary};
use crate::services::source::{AssetListing, AssetSource, SourceError};
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Asset source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("A scan is already running")]
    AlreadyRunning,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Scan produced an invalid result: {0}")]
    InvalidResult(#[from] ResultError),

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Failed(FailureReason),
    Cancelled,
}

/// Why a scan ended in `ScanState::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    SourceUnavailable(String),
    InvalidConfig(String),
    InvalidResult(String),
    Other(String),
}

impl From<&ScanError> for FailureReason {
    fn from(error: &ScanError) -> Self {
        match error {
            ScanError::SourceUnavailable(reason) => {
                FailureReason::SourceUnavailable(reason.clone())
            }
            ScanError::Config(e) => FailureReason::InvalidConfig(e.to_string()),
            ScanError::InvalidResult(e) => FailureReason::InvalidResult(e.to_string()),
            other => FailureReason::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    Ingestion,
    ExactDuplicates,
    Similarity,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub processed: usize,
    pub total: usize,
    pub fraction: f64,
    pub phase: ScanPhase,
    pub current: String,
}

/// A finished scan and whether its summary reached the history store.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub result: ScanResult,
    pub persisted: bool,
}

// exact duplicates, similarity, finalize
const PASS_STEPS: usize = 3;

/// Single writer for progress. The counter is bumped and the update sent under
/// one lock, so consumers see `processed` strictly increasing.
#[derive(Clone)]
struct ProgressTracker {
    processed: Arc<Mutex<usize>>,
    total: usize,
    sender: Option<mpsc::UnboundedSender<ScanProgress>>,
}

impl ProgressTracker {
    fn new(total: usize, sender: Option<mpsc::UnboundedSender<ScanProgress>>) -> Self {
        Self {
            processed: Arc::new(Mutex::new(0)),
            total,
            sender,
        }
    }

    fn step(&self, phase: ScanPhase, current: &str) {
        let Ok(mut processed) = self.processed.lock() else {
            return;
        };
        *processed += 1;
        if let Some(sender) = &self.sender {
            let _ = sender.send(ScanProgress {
                processed: *processed,
                total: self.total,
                fraction: *processed as f64 / self.total.max(1) as f64,
                phase,
                current: current.to_string(),
            });
        }
    }
}

/// Records that made it through ingestion.
struct Ingested {
    records: Vec<AssetRecord>,
    low_quality: Vec<AssetId>,
    skipped: usize,
}

/// Runs one scan at a time: ingestion, exact duplicates, similarity, then
/// persistence of the summary.
pub struct ScanOrchestrator {
    config: ScanConfig,
    source: Arc<dyn AssetSource>,
    extractor: Option<Arc<dyn FeatureExtractor>>,
    history: Arc<dyn HistoryStore>,
    progress_sender: Option<mpsc::UnboundedSender<ScanProgress>>,
    cancellation_token: Arc<AtomicBool>,
    state: RwLock<ScanState>,
}

impl ScanOrchestrator {
    pub fn new(
        config: ScanConfig,
        source: Arc<dyn AssetSource>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            config,
            source,
            extractor: None,
            history,
            progress_sender: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            state: RwLock::new(ScanState::Idle),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel_scan(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    pub async fn state(&self) -> ScanState {
        self.state.read().await.clone()
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn check_cancelled(&self) -> Result<(), ScanError> {
        if self.cancellation_token.load(Ordering::Relaxed) {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run a full scan. A cancellation requested before or during the run is
    /// consumed by it; the token is clear again once the run ends.
    pub async fn run(&self) -> Result<ScanReport, ScanError> {
        {
            let mut state = self.state.write().await;
            if *state == ScanState::Running {
                return Err(ScanError::AlreadyRunning);
            }
            *state = ScanState::Running;
        }

        let outcome = self.execute().await;

        let next = match &outcome {
            Ok(_) => ScanState::Completed,
            Err(ScanError::Cancelled) => {
                log::info!("Scan cancelled");
                ScanState::Cancelled
            }
            Err(e) => {
                log::error!("Scan failed: {}", e);
                ScanState::Failed(FailureReason::from(e))
            }
        };
        *self.state.write().await = next;
        self.cancellation_token.store(false, Ordering::Relaxed);

        outcome
    }

    async fn execute(&self) -> Result<ScanReport, ScanError> {
        self.config.validate()?;
        self.check_cancelled()?;

        let limit = self.config.max_assets_per_scan;
        let source = Arc::clone(&self.source);
        let mut listings = tokio::task::spawn_blocking(move || source.list_photo_assets(limit))
            .await
            .map_err(|e| ScanError::SourceUnavailable(e.to_string()))?
            .map_err(|e| ScanError::SourceUnavailable(e.to_string()))?;
        listings.truncate(limit);

        log::info!("Scanning {} photos", listings.len());
        let progress = ProgressTracker::new(
            listings.len() + PASS_STEPS,
            self.progress_sender.clone(),
        );

        let ingested = self.ingest(listings, progress.clone()).await?;
        let records = ingested.records;
        let total_scanned = records.len();
        if ingested.skipped > 0 {
            log::warn!(
                "Skipped {} photos whose metadata could not be read",
                ingested.skipped
            );
        }

        self.check_cancelled()?;
        let duplicates = DuplicateDetector::new().find_exact_duplicates(&records);
        progress.step(ScanPhase::ExactDuplicates, "exact duplicates");
        log::debug!("{} exact duplicate groups", duplicates.len());

        self.check_cancelled()?;
        let (similar, similarity_source) = self.find_similar(&records).await?;
        progress.step(ScanPhase::Similarity, "similar photos");
        log::debug!("{} similar groups ({:?})", similar.len(), similarity_source);

        let low_quality_ids: HashSet<AssetId> = ingested.low_quality.into_iter().collect();
        let low_quality = records
            .iter()
            .filter(|r| low_quality_ids.contains(&r.id))
            .cloned()
            .collect();

        let result = ScanResult {
            scan_id: format!("scan_{}", Uuid::new_v4().simple()),
            scanned_at: Utc::now(),
            low_quality,
            duplicates,
            similar,
            total_scanned,
            skipped: ingested.skipped,
            similarity_source,
        };
        result.validate()?;

        self.check_cancelled()?;
        let summary = ScanSummary::from_result(&result);
        let persisted = match self.history.write_scan_summary(&summary) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to record scan {}: {}", result.scan_id, e);
                false
            }
        };
        progress.step(ScanPhase::Complete, "scan complete");

        log::info!(
            "Scan {} complete: {} low quality, {} duplicate groups, {} similar groups out of {}",
            result.scan_id,
            result.low_quality.len(),
            result.duplicates.len(),
            result.similar.len(),
            result.total_scanned
        );

        Ok(ScanReport { result, persisted })
    }

    /// Read byte sizes in parallel and classify quality inline. Missing photos
    /// and repeats of an id already read are skipped; an unavailable source
    /// aborts.
    async fn ingest(
        &self,
        listings: Vec<AssetListing>,
        progress: ProgressTracker,
    ) -> Result<Ingested, ScanError> {
        let source = Arc::clone(&self.source);
        let cancellation_token = Arc::clone(&self.cancellation_token);
        let quality = self.config.quality_filter();

        let results = tokio::task::spawn_blocking(move || {
            listings
                .into_par_iter()
                .map(|listing| {
                    if cancellation_token.load(Ordering::Relaxed) {
                        return Err(ScanError::Cancelled);
                    }

                    let filename = listing.filename.clone();
                    let read = match source.byte_size(&listing.locator) {
                        Ok(byte_size) => {
                            let record = AssetRecord {
                                id: listing.id,
                                filename: listing.filename,
                                locator: listing.locator,
                                byte_size,
                                width: listing.width,
                                height: listing.height,
                                creation_time: listing.creation_time,
                            };
                            let low_quality = quality.is_low_quality(&record);
                            Some((record, low_quality))
                        }
                        Err(SourceError::NotFound(locator)) => {
                            log::warn!("Skipping {}: metadata unavailable", locator);
                            None
                        }
                        Err(SourceError::Unavailable(reason)) => {
                            return Err(ScanError::SourceUnavailable(reason));
                        }
                    };

                    progress.step(ScanPhase::Ingestion, &filename);
                    Ok(read)
                })
                .collect::<Result<Vec<_>, ScanError>>()
        })
        .await
        .map_err(|e| ScanError::SourceUnavailable(e.to_string()))??;

        let mut skipped = 0;
        let mut records = Vec::with_capacity(results.len());
        let mut low_quality = Vec::new();
        let mut seen = HashSet::new();
        for read in results {
            match read {
                Some((record, is_low)) => {
                    if !seen.insert(record.id.clone()) {
                        log::warn!(
                            "Skipping {}: id {} already scanned",
                            record.locator,
                            record.id
                        );
                        skipped += 1;
                        continue;
                    }
                    if is_low {
                        low_quality.push(record.id.clone());
                    }
                    records.push(record);
                }
                None => skipped += 1,
            }
        }
        sort_canonical(&mut records);

        Ok(Ingested {
            records,
            low_quality,
            skipped,
        })
    }

    async fn find_similar(
        &self,
        records: &[AssetRecord],
    ) -> Result<(Vec<Group>, SimilaritySource), ScanError> {
        let heuristic = self.config.temporal_grouper();
        let policy = self.config.similarity_policy;

        let extractor = match &self.extractor {
            Some(extractor) if policy != SimilarityPolicy::HeuristicOnly => Arc::clone(extractor),
            _ => return Ok((heuristic.group(records), SimilaritySource::Heuristic)),
        };

        let init = {
            let extractor = Arc::clone(&extractor);
            tokio::task::spawn_blocking(move || extractor.initialize()).await
        };
        match init {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!("{}; grouping by metadata only", e);
                return Ok((heuristic.group(records), SimilaritySource::Heuristic));
            }
            Err(e) => {
                log::warn!(
                    "Feature extractor failed to start: {}; grouping by metadata only",
                    e
                );
                return Ok((heuristic.group(records), SimilaritySource::Heuristic));
            }
        }

        let detector = EmbeddingDetector::new(
            self.config.embedding_config(),
            extractor,
            Arc::clone(&self.cancellation_token),
        );
        let outcome = detector.find_near_duplicates(records).await?;
        let mut groups = outcome.groups;

        if outcome.unevaluated.is_empty() || policy == SimilarityPolicy::EmbeddingOnly {
            return Ok((groups, SimilaritySource::Embedding));
        }

        log::info!(
            "{} photos could not be embedded; grouping them by metadata",
            outcome.unevaluated.len()
        );
        let unevaluated: HashSet<&AssetId> = outcome.unevaluated.iter().collect();
        let leftover: Vec<AssetRecord> = records
            .iter()
            .filter(|r| unevaluated.contains(&r.id))
            .cloned()
            .collect();
        let fallback = heuristic.group(&leftover);

        let source = match (groups.is_empty(), fallback.is_empty()) {
            (_, true) => SimilaritySource::Embedding,
            (true, false) => SimilaritySource::Heuristic,
            (false, false) => SimilaritySource::Mixed,
        };
        groups.extend(fallback);
        Ok((groups, source))
    }
}
