use crate::core::asset::{AssetId, AssetRecord, ClassificationTag};
use crate::core::group::{Group, GroupKind};
use crate::core::temporal::PairSimilarity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResultError {
    #[error("Group {group} has no members")]
    EmptyGroup { group: String },

    #[error("Group {group} lists its original as a member")]
    OriginalInMembers { group: String },

    #[error("Group {group} lists {asset} more than once")]
    RepeatedMember { group: String, asset: AssetId },

    #[error("Group {group} has score {score} outside [0, 1]")]
    ScoreOutOfRange { group: String, score: f64 },

    #[error("Group {group} recommends {asset}, which it does not contain")]
    UnknownRecommendation { group: String, asset: AssetId },

    #[error("Group {group} of kind {kind} is in the wrong list")]
    MisplacedGroup { group: String, kind: GroupKind },

    #[error("{classified} low-quality assets exceed {total} scanned")]
    CountMismatch { classified: usize, total: usize },
}

/// Which similarity pass produced the `similar` groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilaritySource {
    Heuristic,
    Embedding,
    /// Embedding groups plus heuristic groups for assets that could not be embedded.
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCounts {
    pub low_quality: usize,
    pub duplicate_groups: usize,
    pub similar_groups: usize,
    pub total_scanned: usize,
    pub skipped: usize,
}

/// Everything one completed scan found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub scanned_at: DateTime<Utc>,
    pub low_quality: Vec<AssetRecord>,
    pub duplicates: Vec<Group>,
    pub similar: Vec<Group>,
    /// Assets whose metadata was read successfully.
    pub total_scanned: usize,
    /// Assets dropped because their metadata could not be read.
    pub skipped: usize,
    pub similarity_source: SimilaritySource,
}

impl ScanResult {
    pub fn counts(&self) -> ScanCounts {
        ScanCounts {
            low_quality: self.low_quality.len(),
            duplicate_groups: self.duplicates.len(),
            similar_groups: self.similar.len(),
            total_scanned: self.total_scanned,
            skipped: self.skipped,
        }
    }

    /// Every tag the asset carries; the classifications are independent.
    pub fn tags_for(&self, id: &AssetId) -> BTreeSet<ClassificationTag> {
        let mut tags = BTreeSet::new();
        if self.low_quality.iter().any(|r| &r.id == id) {
            tags.insert(ClassificationTag::LowQuality);
        }
        if self.duplicates.iter().any(|g| g.contains(id)) {
            tags.insert(ClassificationTag::Duplicate);
        }
        if self.similar.iter().any(|g| g.contains(id)) {
            tags.insert(ClassificationTag::Similar);
        }
        tags
    }

    /// Ids a "remove redundant photos" action would target: every low-quality
    /// asset plus every grouped asset that is not its group's recommendation.
    pub fn removal_candidates(&self) -> BTreeSet<AssetId> {
        let mut ids: BTreeSet<AssetId> = self.low_quality.iter().map(|r| r.id.clone()).collect();
        for group in self.duplicates.iter().chain(&self.similar) {
            ids.extend(group.removable_ids());
        }
        ids
    }

    pub fn validate(&self) -> Result<(), ResultError> {
        if self.low_quality.len() > self.total_scanned {
            return Err(ResultError::CountMismatch {
                classified: self.low_quality.len(),
                total: self.total_scanned,
            });
        }

        for group in &self.duplicates {
            if group.kind != GroupKind::Exact {
                return Err(ResultError::MisplacedGroup {
                    group: group.id.clone(),
                    kind: group.kind,
                });
            }
            validate_group(group)?;
        }
        for group in &self.similar {
            if group.kind == GroupKind::Exact {
                return Err(ResultError::MisplacedGroup {
                    group: group.id.clone(),
                    kind: group.kind,
                });
            }
            validate_group(group)?;
        }
        Ok(())
    }

    /// The result as it stands after `removed` assets are gone.
    ///
    /// Groups left with a single asset disappear. `total_scanned` keeps
    /// describing the scan itself and is not reduced.
    pub fn without_assets(
        &self,
        removed: &BTreeSet<AssetId>,
        heuristic: &PairSimilarity,
    ) -> ScanResult {
        let rebuild = |groups: &[Group]| -> Vec<Group> {
            groups
                .iter()
                .filter_map(|g| {
                    if g.assets().any(|a| removed.contains(&a.id)) {
                        g.without_assets(removed, heuristic)
                    } else {
                        Some(g.clone())
                    }
                })
                .collect()
        };

        ScanResult {
            scan_id: self.scan_id.clone(),
            scanned_at: self.scanned_at,
            low_quality: self
                .low_quality
                .iter()
                .filter(|r| !removed.contains(&r.id))
                .cloned()
                .collect(),
            duplicates: rebuild(&self.duplicates),
            similar: rebuild(&self.similar),
            total_scanned: self.total_scanned,
            skipped: self.skipped,
            similarity_source: self.similarity_source,
        }
    }
}

fn validate_group(group: &Group) -> Result<(), ResultError> {
    if group.members.is_empty() {
        return Err(ResultError::EmptyGroup {
            group: group.id.clone(),
        });
    }

    let mut seen: HashSet<&AssetId> = HashSet::new();
    for member in &group.members {
        if member.asset.id == group.original.id {
            return Err(ResultError::OriginalInMembers {
                group: group.id.clone(),
            });
        }
        if !seen.insert(&member.asset.id) {
            return Err(ResultError::RepeatedMember {
                group: group.id.clone(),
                asset: member.asset.id.clone(),
            });
        }
        if !(0.0..=1.0).contains(&member.score) {
            return Err(ResultError::ScoreOutOfRange {
                group: group.id.clone(),
                score: member.score,
            });
        }
    }

    if !group.contains(&group.recommended) {
        return Err(ResultError::UnknownRecommendation {
            group: group.id.clone(),
            asset: group.recommended.clone(),
        });
    }
    Ok(())
}
