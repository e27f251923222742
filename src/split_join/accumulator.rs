//! Per-parent collection of completed split items.
//!
//! The table is split into shards, each a mutex-guarded map from parent to
//! bucket. Arrivals for different parents mostly hit different shards, so
//! unrelated groups do not contend. Within a shard, routing an item into its
//! bucket, counting it and comparing against the sibling count all happen
//! under the one lock: exactly one arrival per group sees the count reach
//! the total, and that arrival removes the bucket and builds the result.

use crate::error::{DataflowError, Result};
use crate::split_join::item::{ItemOutcome, ParentKey, SplitGroup, SplitItem};
use crate::split_join::result::{FailedItem, SplitJoinResult};
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct Bucket<P, I> {
    group: Arc<SplitGroup<P>>,
    successes: Vec<I>,
    failures: Vec<FailedItem<I>>,
}

impl<P, I> Bucket<P, I> {
    fn completed(&self) -> usize {
        self.successes.len() + self.failures.len()
    }
}

/// Concurrent table of open split groups keyed by parent.
pub struct IntermediateAccumulator<P, I> {
    shards: Box<[Mutex<HashMap<P, Bucket<P, I>>>]>,
    hasher: RandomState,
}

impl<P: ParentKey, I> IntermediateAccumulator<P, I> {
    /// An accumulator with a shard count derived from the hardware concurrency.
    pub fn new() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_shards((cpus * 4).next_power_of_two())
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, parent: &P) -> MutexGuard<'_, HashMap<P, Bucket<P, I>>> {
        let index = (self.hasher.hash_one(parent) as usize) % self.shards.len();
        // Poisoning is harmless: every mutation is a single push or remove.
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a resolved item. Returns the group result when `item` is the
    /// last of its siblings to arrive, `None` otherwise.
    pub fn complete(&self, item: SplitItem<P, I>) -> Result<Option<SplitJoinResult<P, I>>> {
        let (group, payload, outcome) = item.into_parts();
        let parent = group.parent();

        let failure = match outcome {
            ItemOutcome::Succeeded => None,
            ItemOutcome::Failed(error) => Some(error),
            ItemOutcome::Pending => return Err(DataflowError::OutcomeNotSet),
        };

        let mut shard = self.shard(parent);
        // Checked under the lock: the last arrival marks the group joined
        // before releasing it.
        if group.is_joined() {
            return Err(DataflowError::GroupAlreadyJoined(format!("{:?}", parent)));
        }
        let bucket = shard.entry(parent.clone()).or_insert_with(|| Bucket {
            group: Arc::clone(&group),
            successes: Vec::new(),
            failures: Vec::new(),
        });

        let expected = bucket.group.sibling_count();
        if group.sibling_count() != expected {
            return Err(DataflowError::SiblingCountMismatch {
                parent: format!("{:?}", parent),
                expected,
                actual: group.sibling_count(),
            });
        }
        if bucket.completed() >= expected {
            return Err(DataflowError::AccumulatorOverflow {
                parent: format!("{:?}", parent),
                total: expected,
            });
        }

        match failure {
            None => bucket.successes.push(payload),
            Some(error) => bucket.failures.push(FailedItem {
                item: payload,
                error,
            }),
        }

        if bucket.completed() < expected {
            return Ok(None);
        }

        let successes = std::mem::take(&mut bucket.successes);
        let failures = std::mem::take(&mut bucket.failures);
        bucket.group.mark_joined();
        group.mark_joined();
        shard.remove(parent);
        drop(shard);

        SplitJoinResult::new(parent.clone(), successes, failures, expected).map(Some)
    }

    /// Number of parents with at least one, but not all, siblings recorded.
    pub fn open_groups(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.open_groups() == 0
    }
}

impl<P: ParentKey, I> Default for IntermediateAccumulator<P, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, I> fmt::Debug for IntermediateAccumulator<P, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntermediateAccumulator")
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Barrier;

    fn resolved(
        items: Vec<SplitItem<String, u32>>,
        failing: &[u32],
    ) -> Vec<SplitItem<String, u32>> {
        items
            .into_iter()
            .map(|mut item| {
                let n = *item.item();
                if failing.contains(&n) {
                    item.mark_failed(anyhow::anyhow!("item {} failed", n)).unwrap();
                } else {
                    item.mark_succeeded().unwrap();
                }
                item
            })
            .collect()
    }

    #[test]
    fn test_last_arrival_builds_result() {
        let acc = IntermediateAccumulator::with_shards(4);
        let mut items = resolved(SplitItem::fan_out("p".to_string(), vec![1, 2, 3]), &[2]);
        let last = items.pop().unwrap();

        for item in items {
            assert!(acc.complete(item).unwrap().is_none());
        }
        assert_eq!(acc.open_groups(), 1);

        let result = acc.complete(last).unwrap().unwrap();
        assert_eq!(result.parent(), "p");
        assert_eq!(result.successfully_completed_items(), &[1, 3]);
        assert_eq!(result.failed_items().len(), 1);
        assert_eq!(result.total_items_count(), 3);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_pending_item_rejected() {
        let acc = IntermediateAccumulator::with_shards(1);
        let item = SplitItem::new("p".to_string(), 1u32, 2).unwrap();
        assert!(matches!(acc.complete(item), Err(DataflowError::OutcomeNotSet)));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_sibling_count_mismatch_detected() {
        let acc = IntermediateAccumulator::with_shards(1);
        for _ in 0..2 {
            let mut item = SplitItem::new("p".to_string(), 1u32, 3).unwrap();
            item.mark_succeeded().unwrap();
            assert!(acc.complete(item).unwrap().is_none());
        }
        let mut mismatched = SplitItem::new("p".to_string(), 1u32, 2).unwrap();
        mismatched.mark_succeeded().unwrap();
        let err = acc.complete(mismatched).unwrap_err();
        assert!(matches!(
            err,
            DataflowError::SiblingCountMismatch { expected: 3, actual: 2, .. }
        ));
    }

    #[test]
    fn test_overflow_of_full_bucket() {
        let acc: IntermediateAccumulator<String, u32> = IntermediateAccumulator::with_shards(1);
        let mut shard = acc.shard(&"p".to_string());
        let group = SplitGroup::new("p".to_string(), 1).unwrap();
        shard.insert(
            "p".to_string(),
            Bucket {
                group,
                successes: vec![0],
                failures: Vec::new(),
            },
        );
        drop(shard);

        let mut item = SplitItem::new("p".to_string(), 1u32, 1).unwrap();
        item.mark_succeeded().unwrap();
        let err = acc.complete(item).unwrap_err();
        assert!(matches!(err, DataflowError::AccumulatorOverflow { total: 1, .. }));
    }

    #[test]
    fn test_late_arrival_after_join_rejected() {
        let acc = IntermediateAccumulator::with_shards(2);
        let mut items = resolved(SplitItem::fan_out("p".to_string(), vec![1]), &[]);
        let item = items.pop().unwrap();
        let group = Arc::clone(item.group());
        assert!(acc.complete(item).unwrap().is_some());

        let mut late = SplitItem::in_group(group, 9);
        late.mark_succeeded().unwrap();
        let err = acc.complete(late).unwrap_err();
        assert!(matches!(err, DataflowError::GroupAlreadyJoined(_)));
    }

    #[test]
    fn test_barrier_synchronized_siblings_join_once() {
        let acc = Arc::new(IntermediateAccumulator::with_shards(8));
        let items = resolved(SplitItem::fan_out("bc".to_string(), vec![1, 2]), &[]);
        let barrier = Arc::new(Barrier::new(items.len()));

        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let acc = Arc::clone(&acc);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    acc.complete(item).unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(results.len(), 1);
        let mut members = results[0].successfully_completed_items().to_vec();
        members.sort_unstable();
        assert_eq!(members, vec![1, 2]);
    }

    proptest! {
        #[test]
        fn prop_arrival_order_does_not_change_membership(
            count in 1usize..24,
            failing_mask in any::<u32>(),
            seed in any::<u64>(),
        ) {
            let acc = IntermediateAccumulator::with_shards(4);
            let payloads: Vec<u32> = (0..count as u32).collect();
            let failing: Vec<u32> = payloads
                .iter()
                .copied()
                .filter(|n| failing_mask & (1 << (n % 32)) != 0)
                .collect();
            let mut items =
                resolved(SplitItem::fan_out("p".to_string(), payloads.clone()), &failing);

            // Deterministic shuffle driven by the seed.
            let mut state = seed | 1;
            for i in (1..items.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                items.swap(i, (state % (i as u64 + 1)) as usize);
            }

            let mut results = Vec::new();
            for item in items {
                if let Some(result) = acc.complete(item).unwrap() {
                    results.push(result);
                }
            }

            prop_assert_eq!(results.len(), 1);
            let result = &results[0];
            prop_assert_eq!(
                result.successfully_completed_items().len() + result.failed_items().len(),
                result.total_items_count()
            );
            let mut succeeded = result.successfully_completed_items().to_vec();
            succeeded.sort_unstable();
            let mut failed: Vec<u32> = result.failed_items().iter().map(|f| f.item).collect();
            failed.sort_unstable();
            let expected_ok: Vec<u32> = payloads
                .iter()
                .copied()
                .filter(|n| !failing.contains(n))
                .collect();
            prop_assert_eq!(succeeded, expected_ok);
            prop_assert_eq!(failed, failing);
            prop_assert!(acc.is_empty());
        }
    }
}
