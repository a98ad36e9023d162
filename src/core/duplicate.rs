// Exact duplicate detection.
//
// Two photos are treated as exact duplicates when byte size and creation time
// are both identical. Different photos that happen to share both values are
// grouped too; that false positive is a known limit of the fingerprint.

use crate::core::asset::AssetRecord;
use crate::core::group::{Group, GroupKind, GroupMember};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub byte_size: u64,
    pub creation_time: i64,
}

impl From<&AssetRecord> for Fingerprint {
    fn from(record: &AssetRecord) -> Self {
        Self {
            byte_size: record.byte_size,
            creation_time: record.creation_time,
        }
    }
}

#[derive(Debug, Default)]
pub struct DuplicateDetector;

impl DuplicateDetector {
    pub fn new() -> Self {
        Self
    }

    /// Group records by fingerprint. The first record seen for a fingerprint is
    /// the original; later ones are appended in traversal order.
    pub fn find_exact_duplicates(&self, records: &[AssetRecord]) -> Vec<Group> {
        // fingerprint -> (index of original, member indices)
        let mut buckets: HashMap<Fingerprint, (usize, Vec<usize>)> = HashMap::new();
        let mut order: Vec<Fingerprint> = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let key = Fingerprint::from(record);
            match buckets.get_mut(&key) {
                Some((_, members)) => members.push(index),
                None => {
                    buckets.insert(key, (index, Vec::new()));
                    order.push(key);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|key| {
                let (original, members) = buckets.remove(&key)?;
                let members = members
                    .into_iter()
                    .map(|i| GroupMember {
                        asset: records[i].clone(),
                        score: 1.0,
                    })
                    .collect();
                Group::new(GroupKind::Exact, records[original].clone(), members)
            })
            .collect()
    }
}
