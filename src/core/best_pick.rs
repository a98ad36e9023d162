use crate::core::asset::AssetRecord;
use crate::core::group::Group;
use std::cmp::Ordering;

/// Choose the asset to keep from a group.
///
/// Priority:
/// 1. Largest pixel area
/// 2. Largest file size
/// 3. Smallest id (keeps the choice reproducible)
pub fn pick_best(group: &Group) -> &AssetRecord {
    pick_best_record(group.assets()).unwrap_or(&group.original)
}

pub fn pick_best_record<'a>(
    candidates: impl IntoIterator<Item = &'a AssetRecord>,
) -> Option<&'a AssetRecord> {
    candidates.into_iter().max_by(|a, b| quality_cmp(a, b))
}

fn quality_cmp(a: &AssetRecord, b: &AssetRecord) -> Ordering {
    a.pixel_area()
        .cmp(&b.pixel_area())
        .then(a.byte_size.cmp(&b.byte_size))
        .then_with(|| b.id.cmp(&a.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::record;
    use crate::core::group::{GroupKind, GroupMember};

    fn group_of(original: AssetRecord, members: Vec<AssetRecord>) -> Group {
        Group::new(
            GroupKind::Exact,
            original,
            members
                .into_iter()
                .map(|asset| GroupMember { asset, score: 1.0 })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_larger_area_wins() {
        let group = group_of(
            record("a", 5_000_000, 1000, 1000, 0),
            vec![record("b", 1_000_000, 4000, 3000, 0)],
        );
        assert_eq!(pick_best(&group).id.as_str(), "b");
    }

    #[test]
    fn test_byte_size_breaks_area_tie() {
        let group = group_of(
            record("a", 3_000_000, 100, 100, 0),
            vec![record("b", 5_000_000, 100, 100, 0)],
        );
        assert_eq!(pick_best(&group).id.as_str(), "b");
    }

    #[test]
    fn test_smallest_id_breaks_full_tie() {
        let group = group_of(
            record("m", 10, 10, 10, 0),
            vec![record("z", 10, 10, 10, 0), record("c", 10, 10, 10, 0)],
        );
        assert_eq!(pick_best(&group).id.as_str(), "c");
    }

    #[test]
    fn test_pick_is_idempotent_and_matches_recommended() {
        let group = group_of(
            record("a", 10, 30, 10, 0),
            vec![record("b", 20, 10, 30, 0), record("c", 5, 1, 1, 0)],
        );
        let first = pick_best(&group).id.clone();
        let second = pick_best(&group).id.clone();
        assert_eq!(first, second);
        assert_eq!(first, group.recommended);
    }

    #[test]
    fn test_single_candidate_is_returned() {
        let only = record("solo", 1, 1, 1, 0);
        assert_eq!(pick_best_record([&only]).unwrap().id.as_str(), "solo");
        assert!(pick_best_record(std::iter::empty()).is_none());
    }
}
