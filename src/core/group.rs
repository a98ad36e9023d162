use crate::core::asset::{AssetId, AssetRecord};
use crate::core::best_pick::pick_best_record;
use crate::core::temporal::PairSimilarity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKind {
    Exact,     // identical (byte size, creation time) fingerprint
    Heuristic, // time window + size/dimension ratios
    Embedding, // cosine similarity of feature vectors
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GroupKind::Exact => "exact",
            GroupKind::Heuristic => "heuristic",
            GroupKind::Embedding => "embedding",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub asset: AssetRecord,
    /// Similarity to the group's original, in [0, 1].
    pub score: f64,
}

/// One original plus the assets found to duplicate or resemble it.
///
/// `original` is the structural anchor (first seen by the detector that built
/// the group) while `recommended` is the best-quality candidate to keep. The two
/// are often the same asset but not always.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub kind: GroupKind,
    pub original: AssetRecord,
    pub members: Vec<GroupMember>,
    pub recommended: AssetId,
}

impl Group {
    /// Build a group, dropping members that repeat an id or the original.
    /// Returns `None` when nothing is left besides the original.
    pub fn new(kind: GroupKind, original: AssetRecord, members: Vec<GroupMember>) -> Option<Self> {
        let mut seen: HashSet<AssetId> = HashSet::new();
        seen.insert(original.id.clone());

        let members: Vec<GroupMember> = members
            .into_iter()
            .filter(|m| seen.insert(m.asset.id.clone()))
            .map(|m| GroupMember {
                score: m.score.clamp(0.0, 1.0),
                ..m
            })
            .collect();

        if members.is_empty() {
            return None;
        }

        let candidates = std::iter::once(&original)
            .chain(members.iter().map(|m| &m.asset));
        let recommended = pick_best_record(candidates)
            .map(|r| r.id.clone())
            .unwrap_or_else(|| original.id.clone());

        Some(Self {
            id: format!("grp_{}_{}", kind, original.id),
            kind,
            original,
            members,
            recommended,
        })
    }

    /// Original followed by members, in group order.
    pub fn assets(&self) -> impl Iterator<Item = &AssetRecord> {
        std::iter::once(&self.original)
            .chain(self.members.iter().map(|m| &m.asset))
    }

    /// Number of assets including the original.
    pub fn asset_count(&self) -> usize {
        self.members.len() + 1
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.assets().any(|a| &a.id == id)
    }

    /// Ids of every asset other than the recommended one.
    pub fn removable_ids(&self) -> Vec<AssetId> {
        self.assets()
            .filter(|a| a.id != self.recommended)
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn recommended_asset(&self) -> &AssetRecord {
        self.assets()
            .find(|a| a.id == self.recommended)
            .unwrap_or(&self.original)
    }

    /// Rebuild the group without `removed` ids.
    ///
    /// A removed original is replaced by the first remaining member. Exact
    /// groups keep score 1.0 and heuristic groups are rescored against the new
    /// original; embedding scores are kept as recorded because vectors do not
    /// outlive the scan.
    pub fn without_assets(
        &self,
        removed: &BTreeSet<AssetId>,
        heuristic: &PairSimilarity,
    ) -> Option<Group> {
        let mut remaining = self.assets().filter(|a| !removed.contains(&a.id));
        let original = remaining.next()?.clone();
        let original_changed = original.id != self.original.id;

        let members = self
            .members
            .iter()
            .filter(|m| !removed.contains(&m.asset.id) && m.asset.id != original.id)
            .map(|m| {
                let score = match self.kind {
                    GroupKind::Exact => 1.0,
                    GroupKind::Heuristic if original_changed => {
                        heuristic.score(&original, &m.asset)
                    }
                    _ => m.score,
                };
                GroupMember {
                    asset: m.asset.clone(),
                    score,
                }
            })
            .collect();

        Group::new(self.kind, original, members)
    }
}
