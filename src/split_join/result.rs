//! Aggregated outcome of one split group.

use crate::error::{DataflowError, Result};
use crate::pipeline::{ErrorSink, SharedError};
use std::fmt;

/// A split item whose processing failed, with the error that failed it.
#[derive(Debug, Clone)]
pub struct FailedItem<I> {
    pub item: I,
    pub error: SharedError,
}

/// Everything a parent was split into, partitioned by outcome.
///
/// Built once per parent by the last arriving sibling; never changes after.
/// `successfully_completed_items().len() + failed_items().len()` always
/// equals `total_items_count()`.
#[derive(Clone)]
pub struct SplitJoinResult<P, I> {
    parent: P,
    successfully_completed_items: Vec<I>,
    failed_items: Vec<FailedItem<I>>,
    total_items_count: usize,
}

impl<P: fmt::Debug, I> SplitJoinResult<P, I> {
    pub fn new(
        parent: P,
        successfully_completed_items: Vec<I>,
        failed_items: Vec<FailedItem<I>>,
        total_items_count: usize,
    ) -> Result<Self> {
        if total_items_count == 0 {
            return Err(DataflowError::InvalidSiblingCount(total_items_count));
        }
        let actual = successfully_completed_items.len() + failed_items.len();
        if actual != total_items_count {
            return Err(DataflowError::SiblingCountMismatch {
                parent: format!("{:?}", parent),
                expected: total_items_count,
                actual,
            });
        }
        Ok(Self {
            parent,
            successfully_completed_items,
            failed_items,
            total_items_count,
        })
    }
}

impl<P, I> SplitJoinResult<P, I> {
    pub fn parent(&self) -> &P {
        &self.parent
    }

    pub fn successfully_completed_items(&self) -> &[I] {
        &self.successfully_completed_items
    }

    pub fn failed_items(&self) -> &[FailedItem<I>] {
        &self.failed_items
    }

    pub fn total_items_count(&self) -> usize {
        self.total_items_count
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed_items.is_empty()
    }

    pub fn into_parts(self) -> (P, Vec<I>, Vec<FailedItem<I>>) {
        (self.parent, self.successfully_completed_items, self.failed_items)
    }
}

impl<P: fmt::Debug, I: fmt::Debug> fmt::Debug for SplitJoinResult<P, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitJoinResult")
            .field("parent", &self.parent)
            .field("succeeded", &self.successfully_completed_items)
            .field("failed", &self.failed_items.len())
            .field("total", &self.total_items_count)
            .finish()
    }
}

/// Failures downstream of a join are offered to the parent.
impl<P: ErrorSink, I> ErrorSink for SplitJoinResult<P, I> {
    fn on_error(&self, error: &anyhow::Error) -> bool {
        self.parent.on_error(error)
    }
}
