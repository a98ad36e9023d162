// Near-duplicate detection from feature vectors.
//
// Anchor + scan-forward: walking records in canonical order, a record joins the
// group of the earliest still-unassigned record before it whose vector is
// similar enough; otherwise it can anchor a group of its own. Vectors are
// fetched in bounded batches and dropped as soon as no later comparison can
// use them.

use crate::core::asset::{AssetId, AssetRecord};
use crate::core::group::{Group, GroupKind, GroupMember};
use crate::core::scanner::ScanError;
use crate::core::temporal::{PairSimilarity, TemporalGrouper};
use crate::services::extractor::FeatureExtractor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_MAX_RESIDENT: usize = 1024;
pub const DEFAULT_PAIRWISE_CEILING: usize = 1000;
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed-length embedding for one asset. The norm is computed once.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
    norm: f64,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        let norm = values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt();
        Self { values, norm }
    }

    /// Expand hash bits into a ±1 vector, so that cosine similarity between two
    /// such vectors is `1 - 2 * hamming / bit_count`.
    pub fn from_bits(bytes: &[u8], bit_count: usize) -> Self {
        let bit_count = bit_count.min(bytes.len() * 8);
        let values = (0..bit_count)
            .map(|i| {
                if bytes[i / 8] & (1 << (i % 8)) != 0 {
                    1.0
                } else {
                    -1.0
                }
            })
            .collect();
        Self::new(values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Cosine similarity clamped to [-1, 1]. `None` when the lengths differ or
    /// either vector has no usable magnitude.
    pub fn cosine_similarity(&self, other: &FeatureVector) -> Option<f64> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let denom = self.norm * other.norm;
        if denom == 0.0 || !denom.is_finite() {
            return None;
        }
        let dot: f64 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(&a, &b)| f64::from(a) * f64::from(b))
            .sum();
        let sim = dot / denom;
        sim.is_finite().then(|| sim.clamp(-1.0, 1.0))
    }
}

/// Cosine similarity of two raw slices.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    FeatureVector::new(a.to_vec()).cosine_similarity(&FeatureVector::new(b.to_vec()))
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub threshold: f64,
    /// Records extracted concurrently before their vectors are compared.
    pub batch_size: usize,
    /// Upper bound on anchor vectors held at once.
    pub max_resident: usize,
    /// Above this many records, comparisons are limited to time buckets.
    pub pairwise_ceiling: usize,
    pub time_window_ms: i64,
    pub extraction_timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            max_resident: DEFAULT_MAX_RESIDENT,
            pairwise_ceiling: DEFAULT_PAIRWISE_CEILING,
            time_window_ms: crate::core::temporal::DEFAULT_TIME_WINDOW_MS,
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
pub struct EmbeddingOutcome {
    pub groups: Vec<Group>,
    /// Records whose vector could not be obtained, in canonical order.
    pub unevaluated: Vec<AssetId>,
    pub evaluated: usize,
}

pub struct EmbeddingDetector {
    config: EmbeddingConfig,
    extractor: Arc<dyn FeatureExtractor>,
    cancellation_token: Arc<AtomicBool>,
}

/// Per-window bookkeeping, indexed like the window. A record that fails any
/// extraction stays failed, even if an earlier call for it succeeded.
struct WindowState {
    member_of: Vec<Option<(usize, f64)>>,
    failed: Vec<bool>,
    evaluated: Vec<bool>,
}

impl WindowState {
    fn new(n: usize) -> Self {
        Self {
            member_of: vec![None; n],
            failed: vec![false; n],
            evaluated: vec![false; n],
        }
    }

    fn is_candidate(&self, i: usize) -> bool {
        self.member_of[i].is_none() && !self.failed[i]
    }
}

impl EmbeddingDetector {
    pub fn new(
        config: EmbeddingConfig,
        extractor: Arc<dyn FeatureExtractor>,
        cancellation_token: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            extractor,
            cancellation_token,
        }
    }

    fn threshold(&self) -> f64 {
        // negative similarity never groups
        self.config.threshold.max(0.0)
    }

    fn check_cancelled(&self) -> Result<(), ScanError> {
        if self.cancellation_token.load(Ordering::Relaxed) {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn find_near_duplicates(
        &self,
        records: &[AssetRecord],
    ) -> Result<EmbeddingOutcome, ScanError> {
        let windows: Vec<Vec<&AssetRecord>> = if records.len() > self.config.pairwise_ceiling {
            log::info!(
                "{} photos exceed the pairwise ceiling {}; comparing within time buckets",
                records.len(),
                self.config.pairwise_ceiling
            );
            TemporalGrouper::new(
                self.config.time_window_ms,
                usize::MAX,
                PairSimilarity::default(),
            )
            .buckets(records)
        } else {
            let mut all: Vec<&AssetRecord> = records.iter().collect();
            all.sort_by(|a, b| a.canonical_cmp(b));
            vec![all]
        };

        let mut outcome = EmbeddingOutcome::default();
        for window in windows {
            self.check_cancelled()?;
            self.scan_window(&window, &mut outcome).await?;
        }

        log::debug!(
            "Embedding pass: {} groups, {} evaluated, {} unevaluated",
            outcome.groups.len(),
            outcome.evaluated,
            outcome.unevaluated.len()
        );
        Ok(outcome)
    }

    async fn scan_window(
        &self,
        window: &[&AssetRecord],
        outcome: &mut EmbeddingOutcome,
    ) -> Result<(), ScanError> {
        let n = window.len();
        let threshold = self.threshold();
        let batch_size = self.config.batch_size.max(1);
        let block_size = self.config.max_resident.max(1);
        let mut state = WindowState::new(n);

        let mut block_start = 0;
        while block_start < n {
            self.check_cancelled()?;
            let block_end = (block_start + block_size).min(n);

            // Anchor vectors for this block, fetched in batches.
            let mut block: Vec<Option<FeatureVector>> =
                (block_start..block_end).map(|_| None).collect();
            let pending: Vec<usize> = (block_start..block_end)
                .filter(|&i| state.is_candidate(i))
                .collect();
            for chunk in pending.chunks(batch_size) {
                self.check_cancelled()?;
                let vectors = self.fetch(window, chunk, &mut state).await;
                for (&i, vector) in chunk.iter().zip(vectors) {
                    block[i - block_start] = vector;
                }
            }

            // Comparisons inside the block, in index order.
            for j in block_start..block_end {
                let Some(candidate) = block[j - block_start].as_ref() else {
                    continue;
                };
                let found = (block_start..j).find_map(|i| {
                    if state.member_of[i].is_some() {
                        return None;
                    }
                    let anchor = block[i - block_start].as_ref()?;
                    let sim = anchor.cosine_similarity(candidate)?;
                    (sim >= threshold).then_some((i, sim))
                });
                if let Some(hit) = found {
                    state.member_of[j] = Some(hit);
                    block[j - block_start] = None;
                }
            }

            let anchors: Vec<usize> = (block_start..block_end)
                .filter(|&i| state.member_of[i].is_none() && block[i - block_start].is_some())
                .collect();

            // Stream the rest of the window past the block's anchors.
            if !anchors.is_empty() {
                let later: Vec<usize> = (block_end..n).filter(|&j| state.is_candidate(j)).collect();
                for chunk in later.chunks(batch_size) {
                    self.check_cancelled()?;
                    let vectors = self.fetch(window, chunk, &mut state).await;
                    for (&j, vector) in chunk.iter().zip(vectors) {
                        let Some(candidate) = vector else { continue };
                        let found = anchors.iter().find_map(|&i| {
                            let anchor = block[i - block_start].as_ref()?;
                            let sim = anchor.cosine_similarity(&candidate)?;
                            (sim >= threshold).then_some((i, sim))
                        });
                        if found.is_some() {
                            state.member_of[j] = found;
                        }
                    }
                }
            }

            block_start = block_end;
        }

        // Assemble groups in anchor order.
        let mut members: Vec<Vec<GroupMember>> = vec![Vec::new(); n];
        for (j, slot) in state.member_of.iter().enumerate() {
            if let Some((anchor, score)) = *slot {
                members[anchor].push(GroupMember {
                    asset: window[j].clone(),
                    score,
                });
            }
        }
        for (i, group_members) in members.into_iter().enumerate() {
            if group_members.is_empty() {
                continue;
            }
            let original = window[i].clone();
            if let Some(group) = Group::new(GroupKind::Embedding, original, group_members) {
                outcome.groups.push(group);
            }
        }

        for i in 0..n {
            if state.failed[i] {
                outcome.unevaluated.push(window[i].id.clone());
            } else if state.evaluated[i] {
                outcome.evaluated += 1;
            }
        }

        Ok(())
    }

    /// Extract vectors for `indices` concurrently, returned in the same order.
    async fn fetch(
        &self,
        window: &[&AssetRecord],
        indices: &[usize],
        state: &mut WindowState,
    ) -> Vec<Option<FeatureVector>> {
        let batch: Vec<&AssetRecord> = indices.iter().map(|&i| window[i]).collect();
        let vectors = self.extract_batch(&batch).await;
        for (&i, vector) in indices.iter().zip(&vectors) {
            if vector.is_some() {
                state.evaluated[i] = true;
            } else {
                state.failed[i] = true;
                state.evaluated[i] = false;
            }
        }
        vectors
    }

    async fn extract_batch(&self, batch: &[&AssetRecord]) -> Vec<Option<FeatureVector>> {
        let mut tasks = JoinSet::new();
        for (slot, record) in batch.iter().enumerate() {
            let extractor = Arc::clone(&self.extractor);
            let locator = record.locator.clone();
            let timeout = self.config.extraction_timeout;
            tasks.spawn(async move {
                let work = tokio::task::spawn_blocking(move || extractor.embed(&locator));
                (slot, tokio::time::timeout(timeout, work).await)
            });
        }

        let mut vectors: Vec<Option<FeatureVector>> = batch.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, Ok(Ok(Ok(vector))))) => vectors[slot] = Some(vector),
                Ok((slot, Ok(Ok(Err(e))))) => {
                    log::warn!("Embedding unavailable for {}: {}", batch[slot].id, e);
                }
                Ok((slot, Ok(Err(e)))) => {
                    log::warn!("Extractor task failed for {}: {}", batch[slot].id, e);
                }
                Ok((slot, Err(_))) => {
                    log::warn!(
                        "Extraction for {} timed out after {:?}",
                        batch[slot].id,
                        self.config.extraction_timeout
                    );
                }
                Err(e) => log::warn!("Extraction task aborted: {}", e),
            }
        }
        vectors
    }
}
