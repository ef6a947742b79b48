//! Searching the stored transitions: binary search by tick and the edge /
//! trigger scans used to move the scrub cursor.

use crate::sample_store::SampleStore;
use crate::tick_clock::Tick;
use crate::trigger_engine::TriggerEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Offset from `lo` of the first record with `tick >= target` among the
/// `len` records starting at physical index `lo`. Returns `len` when every
/// record is earlier than `target`.
fn lower_bound_from(store: &SampleStore, lo: usize, len: usize, target: Tick) -> usize {
    let capacity = store.capacity();
    let (mut low, mut high) = (0, len);

    while low < high {
        let mid = low + (high - low) / 2;
        if store.at((lo + mid) % capacity).tick < target {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    low
}

/// Physical index of the first record in `[lo, hi]` with `tick >= target`.
///
/// The window may wrap past the end of the buffer (`hi < lo`). Ties go to
/// the earliest index. When every record in the window is earlier than
/// `target` the index after `hi` is returned. On a full store that index is
/// `lo` again, the same answer as for a target before every record, so
/// callers check `target` against the last tick first. [`lower_bound`]
/// returns a logical position that keeps the two cases apart.
pub fn bsearch(store: &SampleStore, lo: usize, hi: usize, target: Tick) -> usize {
    let capacity = store.capacity();
    let len = if hi < lo { hi + capacity - lo + 1 } else { hi - lo + 1 };
    (lo + lower_bound_from(store, lo, len, target)) % capacity
}

/// Logical position of the first stored record with `tick >= target`, or
/// `store.count()` if there is none.
pub fn lower_bound(store: &SampleStore, target: Tick) -> usize {
    lower_bound_from(store, store.read_pos(), store.count(), target)
}

fn level_at(store: &SampleStore, position: usize) -> u32 {
    store.at(store.physical(position)).level
}

fn tick_at(store: &SampleStore, position: usize) -> Tick {
    store.at(store.physical(position)).tick
}

/// Tick of the nearest level change on the selected channels, searching
/// from `cursor` in `direction`.
///
/// Forward lands on the first transition after the cursor. Backward lands
/// on the start of the run the cursor sits in, or of the run before it when
/// the cursor is exactly on an edge. A `mask` of 0 selects every channel.
pub fn search_edge(store: &SampleStore, cursor: Tick, mask: u32, direction: Direction) -> Option<Tick> {
    let mask = if mask == 0 { u32::MAX } else { mask };
    let count = store.count();

    match direction {
        Direction::Forward => {
            let start = lower_bound(store, cursor.saturating_add(1));
            if start >= count {
                return None;
            }
            let baseline = level_at(store, start.saturating_sub(1)) & mask;
            (start..count)
                .find(|&p| level_at(store, p) & mask != baseline)
                .map(|p| tick_at(store, p))
        }
        Direction::Backward => {
            let before = lower_bound(store, cursor);
            if before == 0 {
                return None;
            }
            let last = before - 1;
            let baseline = level_at(store, last) & mask;
            (0..last)
                .rev()
                .find(|&p| level_at(store, p) & mask != baseline)
                .map(|p| tick_at(store, p + 1))
        }
    }
}

/// Tick of the nearest transition matching any configured trigger,
/// strictly after (forward) or before (backward) `cursor`.
pub fn search_trigger(
    store: &SampleStore,
    triggers: &TriggerEngine,
    cursor: Tick,
    direction: Direction,
) -> Option<Tick> {
    let matches = |p: usize| {
        !triggers
            .matches_configured(level_at(store, p), level_at(store, p - 1))
            .is_empty()
    };

    match direction {
        Direction::Forward => {
            let start = lower_bound(store, cursor.saturating_add(1)).max(1);
            (start..store.count()).find(|&p| matches(p)).map(|p| tick_at(store, p))
        }
        Direction::Backward => {
            let before = lower_bound(store, cursor);
            (1..before).rev().find(|&p| matches(p)).map(|p| tick_at(store, p))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger_config::TriggerSpec;

    fn store_from(records: &[(Tick, u32)], capacity: usize) -> SampleStore {
        let mut store = SampleStore::new(capacity);
        for &(tick, level) in records {
            if store.is_full() {
                store.evict_oldest();
            }
            store.append(tick, level).unwrap();
        }
        store
    }

    #[test]
    fn test_bsearch_bounds() {
        let store = store_from(&[(10, 0), (20, 1), (30, 0), (40, 1)], 8);
        assert_eq!(bsearch(&store, 0, 3, 5), 0);
        assert_eq!(bsearch(&store, 0, 3, 20), 1);
        assert_eq!(bsearch(&store, 0, 3, 21), 2);
        assert_eq!(bsearch(&store, 0, 3, 99), 4);
    }

    #[test]
    fn test_bsearch_past_the_end_on_full_store() {
        let store = store_from(&[(10, 0), (20, 1), (30, 0), (40, 1)], 4);
        assert!(store.is_full());
        let (lo, hi) = (store.read_pos(), store.write_pos());

        assert_eq!(bsearch(&store, lo, hi, 5), lo);
        assert_eq!(bsearch(&store, lo, hi, 99), lo);
        assert_eq!(lower_bound(&store, 5), 0);
        assert_eq!(lower_bound(&store, 99), store.count());
    }

    #[test]
    fn test_bsearch_ties_resolve_to_earliest() {
        let store = store_from(&[(10, 0), (20, 1), (20, 3), (20, 2), (30, 0)], 8);
        assert_eq!(bsearch(&store, 0, 4, 20), 1);
    }

    #[test]
    fn test_bsearch_over_wrapped_window() {
        let store = store_from(&[(1, 0), (2, 1), (3, 0), (4, 1), (5, 0), (6, 1)], 4);
        assert_eq!(store.read_pos(), 2);
        assert_eq!(store.write_pos(), 1);

        assert_eq!(bsearch(&store, store.read_pos(), store.write_pos(), 5), 0);
        assert_eq!(bsearch(&store, store.read_pos(), store.write_pos(), 6), 1);
        assert_eq!(bsearch(&store, store.read_pos(), store.write_pos(), 0), 2);
        assert_eq!(store.at(bsearch(&store, store.read_pos(), store.write_pos(), 4)).tick, 4);
    }

    #[test]
    fn test_search_edge_forward_and_backward() {
        let store = store_from(&[(0, 0b00), (10, 0b01), (20, 0b11), (30, 0b10), (40, 0b00)], 8);

        assert_eq!(search_edge(&store, 5, 0, Direction::Forward), Some(10));
        assert_eq!(search_edge(&store, 10, 0, Direction::Forward), Some(20));
        assert_eq!(search_edge(&store, 25, 0, Direction::Backward), Some(20));
        assert_eq!(search_edge(&store, 20, 0, Direction::Backward), Some(10));
        assert_eq!(search_edge(&store, 40, 0, Direction::Forward), None);
    }

    #[test]
    fn test_search_edge_honours_highlight_mask() {
        let store = store_from(&[(0, 0b00), (10, 0b01), (20, 0b11), (30, 0b10), (40, 0b00)], 8);

        assert_eq!(search_edge(&store, 5, 0b10, Direction::Forward), Some(20));
        assert_eq!(search_edge(&store, 35, 0b10, Direction::Backward), Some(20));
        assert_eq!(search_edge(&store, 25, 0b10, Direction::Forward), Some(40));
    }

    #[test]
    fn test_search_trigger() {
        let store = store_from(&[(0, 0), (10, 1), (20, 0), (30, 1), (40, 0)], 8);
        let mut triggers = TriggerEngine::new();
        triggers.configure(0, TriggerSpec::when_channels().rising(0).count()).unwrap();

        assert_eq!(search_trigger(&store, &triggers, 0, Direction::Forward), Some(10));
        assert_eq!(search_trigger(&store, &triggers, 10, Direction::Forward), Some(30));
        assert_eq!(search_trigger(&store, &triggers, 30, Direction::Backward), Some(10));
        assert_eq!(search_trigger(&store, &triggers, 10, Direction::Backward), None);
        assert_eq!(triggers.state(0).unwrap().count, 0);
    }

    #[test]
    fn test_search_on_empty_store() {
        let store = SampleStore::new(4);
        let triggers = TriggerEngine::new();
        assert_eq!(search_edge(&store, 0, 0, Direction::Forward), None);
        assert_eq!(search_edge(&store, 0, 0, Direction::Backward), None);
        assert_eq!(search_trigger(&store, &triggers, 0, Direction::Forward), None);
    }
}
