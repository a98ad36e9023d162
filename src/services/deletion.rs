use crate::core::asset::AssetId;
use crate::core::result::ScanResult;
use crate::core::temporal::PairSimilarity;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeletionError {
    #[error("{} asset(s) could not be deleted", remaining.len())]
    PartialFailure { remaining: BTreeSet<AssetId> },

    #[error("Deletion unavailable: {0}")]
    Unavailable(String),
}

/// Irreversibly removes assets.
pub trait DeletionExecutor: Send + Sync {
    /// `PartialFailure` lists the ids that still exist; everything else in
    /// `ids` is gone.
    fn delete_assets(&self, ids: &BTreeSet<AssetId>) -> Result<(), DeletionError>;
}

/// Deletes files by the locators recorded in a scan.
#[derive(Debug, Clone)]
pub struct FsDeletionExecutor {
    locators: HashMap<AssetId, String>,
    dry_run: bool,
}

impl FsDeletionExecutor {
    pub fn new(locators: HashMap<AssetId, String>) -> Self {
        Self {
            locators,
            dry_run: false,
        }
    }

    pub fn for_result(result: &ScanResult) -> Self {
        let mut locators = HashMap::new();
        let grouped = result
            .duplicates
            .iter()
            .chain(&result.similar)
            .flat_map(|g| g.assets());
        for record in result.low_quality.iter().chain(grouped) {
            locators.insert(record.id.clone(), record.locator.clone());
        }
        Self::new(locators)
    }

    /// Log what would be removed without touching any file.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn locator(&self, id: &AssetId) -> Option<&str> {
        self.locators.get(id).map(String::as_str)
    }
}

impl DeletionExecutor for FsDeletionExecutor {
    fn delete_assets(&self, ids: &BTreeSet<AssetId>) -> Result<(), DeletionError> {
        let mut remaining = BTreeSet::new();

        for id in ids {
            let Some(locator) = self.locators.get(id) else {
                log::warn!("No locator known for {}", id);
                remaining.insert(id.clone());
                continue;
            };
            if self.dry_run {
                log::info!("[dry-run] delete {}", locator);
                continue;
            }
            match fs::remove_file(locator) {
                Ok(()) => log::info!("Deleted {}", locator),
                Err(e) => {
                    log::warn!("Failed to delete {}: {}", locator, e);
                    remaining.insert(id.clone());
                }
            }
        }

        if remaining.is_empty() {
            Ok(())
        } else {
            Err(DeletionError::PartialFailure { remaining })
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeletionOutcome {
    pub result: ScanResult,
    pub deleted: BTreeSet<AssetId>,
    pub remaining: BTreeSet<AssetId>,
}

impl DeletionOutcome {
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Delete `ids` and recompute `result` without the ones actually removed.
///
/// A partial failure still yields an outcome; only an unavailable executor
/// is an error.
pub fn apply_deletion(
    result: &ScanResult,
    executor: &dyn DeletionExecutor,
    ids: &BTreeSet<AssetId>,
    heuristic: &PairSimilarity,
) -> Result<DeletionOutcome, DeletionError> {
    let remaining = match executor.delete_assets(ids) {
        Ok(()) => BTreeSet::new(),
        Err(DeletionError::PartialFailure { remaining }) => remaining,
        Err(e) => return Err(e),
    };
    let deleted: BTreeSet<AssetId> = ids.difference(&remaining).cloned().collect();

    log::info!("Deleted {} of {} requested asset(s)", deleted.len(), ids.len());

    Ok(DeletionOutcome {
        result: result.without_assets(&deleted, heuristic),
        deleted,
        remaining,
    })
}
