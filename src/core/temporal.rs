// Similarity grouping from metadata alone: photos taken close together in time
// whose file sizes and pixel areas are within a ratio of each other.

use crate::core::asset::AssetRecord;
use crate::core::group::{Group, GroupKind, GroupMember};
use std::collections::HashMap;

pub const DEFAULT_TIME_WINDOW_MS: i64 = 60_000;
pub const DEFAULT_PAIR_CEILING: usize = 200;
pub const DEFAULT_SIZE_SIM_MIN: f64 = 0.7;
pub const DEFAULT_DIM_SIM_MIN: f64 = 0.7;

/// Size and dimension ratios between two records.
#[derive(Debug, Clone, Copy)]
pub struct PairSimilarity {
    size_min: f64,
    dim_min: f64,
}

impl PairSimilarity {
    pub fn new(size_min: f64, dim_min: f64) -> Self {
        Self { size_min, dim_min }
    }

    pub fn size_sim(a: &AssetRecord, b: &AssetRecord) -> f64 {
        ratio(a.byte_size, b.byte_size)
    }

    pub fn dim_sim(a: &AssetRecord, b: &AssetRecord) -> f64 {
        ratio(a.pixel_area(), b.pixel_area())
    }

    pub fn is_similar(&self, a: &AssetRecord, b: &AssetRecord) -> bool {
        Self::size_sim(a, b) > self.size_min && Self::dim_sim(a, b) > self.dim_min
    }

    pub fn size_only_similar(&self, a: &AssetRecord, b: &AssetRecord) -> bool {
        Self::size_sim(a, b) > self.size_min
    }

    /// Mean of the two ratios.
    pub fn score(&self, a: &AssetRecord, b: &AssetRecord) -> f64 {
        (Self::size_sim(a, b) + Self::dim_sim(a, b)) / 2.0
    }
}

impl Default for PairSimilarity {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE_SIM_MIN, DEFAULT_DIM_SIM_MIN)
    }
}

/// min/max of two quantities; two zeros (both unknown) compare as equal.
fn ratio(x: u64, y: u64) -> f64 {
    let (lo, hi) = (x.min(y), x.max(y));
    if hi == 0 {
        1.0
    } else {
        lo as f64 / hi as f64
    }
}

#[derive(Debug, Clone)]
pub struct TemporalGrouper {
    time_window_ms: i64,
    pair_ceiling: usize,
    similarity: PairSimilarity,
}

impl TemporalGrouper {
    pub fn new(time_window_ms: i64, pair_ceiling: usize, similarity: PairSimilarity) -> Self {
        Self {
            time_window_ms,
            pair_ceiling,
            similarity,
        }
    }

    pub fn similarity(&self) -> &PairSimilarity {
        &self.similarity
    }

    /// Split records into runs where consecutive creation times are at most
    /// `time_window_ms` apart. Each bucket is in canonical order.
    pub fn buckets<'a>(&self, records: &'a [AssetRecord]) -> Vec<Vec<&'a AssetRecord>> {
        let mut sorted: Vec<&AssetRecord> = records.iter().collect();
        sorted.sort_by(|a, b| a.canonical_cmp(b));

        let mut buckets: Vec<Vec<&AssetRecord>> = Vec::new();
        let mut current: Vec<&AssetRecord> = Vec::new();

        for record in sorted {
            if let Some(prev) = current.last() {
                let gap = record.creation_time.saturating_sub(prev.creation_time);
                if gap > self.time_window_ms {
                    buckets.push(std::mem::take(&mut current));
                }
            }
            current.push(record);
        }
        if !current.is_empty() {
            buckets.push(current);
        }

        buckets
    }

    pub fn group(&self, records: &[AssetRecord]) -> Vec<Group> {
        let mut groups = Vec::new();

        for bucket in self.buckets(records) {
            if bucket.len() < 2 {
                continue;
            }
            if bucket.len() > self.pair_ceiling {
                log::warn!(
                    "Time bucket of {} photos exceeds pair ceiling {}; grouping by size only",
                    bucket.len(),
                    self.pair_ceiling
                );
                groups.extend(self.group_by_size(&bucket));
            } else {
                groups.extend(self.group_pairwise(&bucket));
            }
        }

        groups
    }

    fn group_pairwise(&self, bucket: &[&AssetRecord]) -> Vec<Group> {
        let mut sets = UnionFind::new(bucket.len());

        for i in 0..bucket.len() {
            for j in (i + 1)..bucket.len() {
                if self.similarity.is_similar(bucket[i], bucket[j]) {
                    sets.union(i, j);
                }
            }
        }

        let mut components: Vec<Vec<usize>> = Vec::new();
        let mut by_root: HashMap<usize, usize> = HashMap::new();
        for i in 0..bucket.len() {
            let root = sets.find(i);
            let slot = *by_root.entry(root).or_insert_with(|| {
                components.push(Vec::new());
                components.len() - 1
            });
            components[slot].push(i);
        }

        components
            .into_iter()
            .filter(|c| c.len() > 1)
            .filter_map(|c| {
                let members: Vec<&AssetRecord> = c.iter().map(|&i| bucket[i]).collect();
                self.build_group(&members)
            })
            .collect()
    }

    fn group_by_size(&self, bucket: &[&AssetRecord]) -> Vec<Group> {
        let mut by_size: Vec<&AssetRecord> = bucket.to_vec();
        by_size.sort_by_key(|r| (r.byte_size, r.creation_time, r.id.clone()));

        let mut groups = Vec::new();
        let mut chain: Vec<&AssetRecord> = Vec::new();
        for record in by_size {
            if let Some(prev) = chain.last() {
                if !self.similarity.size_only_similar(prev, record) {
                    groups.extend(self.chain_group(&mut chain));
                }
            }
            chain.push(record);
        }
        groups.extend(self.chain_group(&mut chain));
        groups
    }

    fn chain_group(&self, chain: &mut Vec<&AssetRecord>) -> Option<Group> {
        let mut records = std::mem::take(chain);
        if records.len() < 2 {
            return None;
        }
        records.sort_by(|a, b| a.canonical_cmp(b));
        self.build_group(&records)
    }

    /// First record is the original; expects canonical order.
    fn build_group(&self, records: &[&AssetRecord]) -> Option<Group> {
        let (original, rest) = records.split_first()?;
        let members = rest
            .iter()
            .map(|m| GroupMember {
                asset: (*m).clone(),
                score: self.similarity.score(original, m),
            })
            .collect();
        Group::new(GroupKind::Heuristic, (*original).clone(), members)
    }
}

impl Default for TemporalGrouper {
    fn default() -> Self {
        Self::new(
            DEFAULT_TIME_WINDOW_MS,
            DEFAULT_PAIR_CEILING,
            PairSimilarity::default(),
        )
    }
}

/// Disjoint sets with path compression and union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, i: usize, j: usize) {
        let (ri, rj) = (self.find(i), self.find(j));
        if ri == rj {
            return;
        }
        match self.rank[ri].cmp(&self.rank[rj]) {
            std::cmp::Ordering::Less => self.parent[ri] = rj,
            std::cmp::Ordering::Greater => self.parent[rj] = ri,
            std::cmp::Ordering::Equal => {
                self.parent[rj] = ri;
                self.rank[ri] = self.rank[ri].saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::record;

    fn ids(bucket: &[&AssetRecord]) -> Vec<i64> {
        bucket.iter().map(|r| r.creation_time).collect()
    }

    #[test]
    fn test_gap_over_window_starts_new_bucket() {
        let records: Vec<AssetRecord> = [0, 1000, 2000, 70_000, 71_000]
            .iter()
            .enumerate()
            .map(|(i, &t)| record(&format!("p{i}"), 500_000, 100, 100, t))
            .collect();

        let grouper = TemporalGrouper::default();
        let buckets = grouper.buckets(&records);
        assert_eq!(buckets.len(), 2);
        assert_eq!(ids(&buckets[0]), vec![0, 1000, 2000]);
        assert_eq!(ids(&buckets[1]), vec![70_000, 71_000]);
    }

    #[test]
    fn test_gap_equal_to_window_stays_in_bucket() {
        let records = vec![record("a", 1, 1, 1, 0), record("b", 1, 1, 1, 60_000)];
        assert_eq!(TemporalGrouper::default().buckets(&records).len(), 1);
    }

    #[test]
    fn test_buckets_sort_unordered_input() {
        let records = vec![
            record("late", 1, 1, 1, 500_000),
            record("early", 1, 1, 1, 0),
            record("early2", 1, 1, 1, 10),
        ];
        let buckets = TemporalGrouper::default().buckets(&records);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0][0].id.as_str(), "early");
    }

    #[test]
    fn test_similar_sizes_and_dimensions_group_together() {
        let records = vec![
            record("a", 1_000_000, 4000, 3000, 0),
            record("b", 950_000, 4000, 3000, 2000),
            record("c", 200_000, 4000, 3000, 4000), // too small
            record("d", 980_000, 1000, 750, 5000),  // area too different
        ];
        let groups = TemporalGrouper::default().group(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].original.id.as_str(), "a");
        assert_eq!(groups[0].members.len(), 1);
        assert_eq!(groups[0].members[0].asset.id.as_str(), "b");
        assert!((groups[0].members[0].score - 0.975).abs() < 1e-9);
        assert_eq!(groups[0].kind, GroupKind::Heuristic);
    }

    #[test]
    fn test_transitive_similarity_merges_into_one_group() {
        // a~b and b~c but a and c are too far apart in size
        let records = vec![
            record("a", 1_000_000, 100, 100, 0),
            record("b", 750_000, 100, 100, 1),
            record("c", 560_000, 100, 100, 2),
        ];
        let groups = TemporalGrouper::default().group(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].asset_count(), 3);
        assert_eq!(groups[0].original.id.as_str(), "a");
    }

    #[test]
    fn test_separate_buckets_never_share_a_group() {
        let records = vec![
            record("a", 1_000_000, 100, 100, 0),
            record("b", 1_000_000, 100, 100, 200_000),
        ];
        assert!(TemporalGrouper::default().group(&records).is_empty());
    }

    #[test]
    fn test_oversized_bucket_falls_back_to_size_chains() {
        let grouper = TemporalGrouper::new(60_000, 3, PairSimilarity::default());
        let records = vec![
            record("a", 1_000_000, 100, 100, 0),
            record("b", 990_000, 10, 10, 1), // dimensions ignored in fallback
            record("c", 10_000, 100, 100, 2),
            record("d", 9_900, 100, 100, 3),
        ];
        let groups = grouper.group(&records);
        assert_eq!(groups.len(), 2);
        let originals: Vec<&str> = groups.iter().map(|g| g.original.id.as_str()).collect();
        assert!(originals.contains(&"a"));
        assert!(originals.contains(&"c"));
    }

    #[test]
    fn test_unknown_dimensions_compare_as_equal() {
        let a = record("a", 10, 0, 0, 0);
        let b = record("b", 10, 0, 0, 0);
        assert_eq!(PairSimilarity::dim_sim(&a, &b), 1.0);
        let c = record("c", 10, 100, 100, 0);
        assert_eq!(PairSimilarity::dim_sim(&a, &c), 0.0);
    }
}
