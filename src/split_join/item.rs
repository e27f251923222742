//! Derived items produced by a split stage.

use crate::error::{DataflowError, Result};
use crate::pipeline::error_sink::{ErrorSink, Payload};
use crate::pipeline::SharedError;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Types usable as the parent of a split: the grouping key of the join.
///
/// Parents are compared by value. Two splits of equal parents must not be in
/// flight at the same time within one dataflow run.
pub trait ParentKey: Payload + Clone + Eq + Hash + Sync {}

impl<T> ParentKey for T where T: Payload + Clone + Eq + Hash + Sync {}

/// State shared by every sibling produced from one parent by one split.
pub struct SplitGroup<P> {
    parent: P,
    sibling_count: usize,
    joined: AtomicBool,
}

impl<P> SplitGroup<P> {
    pub(crate) fn new(parent: P, sibling_count: usize) -> Result<Arc<Self>> {
        if sibling_count == 0 {
            return Err(DataflowError::InvalidSiblingCount(sibling_count));
        }
        Ok(Arc::new(Self {
            parent,
            sibling_count,
            joined: AtomicBool::new(false),
        }))
    }

    pub fn parent(&self) -> &P {
        &self.parent
    }

    pub fn sibling_count(&self) -> usize {
        self.sibling_count
    }

    /// Whether the join result of this group has been produced.
    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Acquire)
    }

    pub(crate) fn mark_joined(&self) {
        self.joined.store(true, Ordering::Release);
    }
}

impl<P: fmt::Debug> fmt::Debug for SplitGroup<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitGroup")
            .field("parent", &self.parent)
            .field("sibling_count", &self.sibling_count)
            .field("joined", &self.is_joined())
            .finish()
    }
}

/// Completion state of a split item.
#[derive(Debug, Clone, Default)]
pub enum ItemOutcome {
    #[default]
    Pending,
    Succeeded,
    Failed(SharedError),
}

impl ItemOutcome {
    fn name(&self) -> &'static str {
        match self {
            ItemOutcome::Pending => "pending",
            ItemOutcome::Succeeded => "succeeded",
            ItemOutcome::Failed(_) => "failed",
        }
    }
}

/// One of the items a parent was split into.
///
/// The outcome moves from `Pending` to `Succeeded` or `Failed` exactly once.
/// Every stage that runs user logic on the item resolves it; a failed item
/// keeps its error through the rest of the chain.
pub struct SplitItem<P, I> {
    group: Arc<SplitGroup<P>>,
    item: I,
    outcome: ItemOutcome,
}

impl<P, I> SplitItem<P, I> {
    /// A standalone item belonging to a group of `sibling_count` items.
    ///
    /// Items built this way do not share a group with each other; the join
    /// still matches them by parent value.
    pub fn new(parent: P, item: I, sibling_count: usize) -> Result<Self> {
        Ok(Self::in_group(SplitGroup::new(parent, sibling_count)?, item))
    }

    /// Fan `items` out of `parent`, all sharing one group. An empty input
    /// produces no items.
    pub fn fan_out(parent: P, items: Vec<I>) -> Vec<Self> {
        let Ok(group) = SplitGroup::new(parent, items.len()) else {
            return Vec::new();
        };
        items
            .into_iter()
            .map(|item| Self::in_group(Arc::clone(&group), item))
            .collect()
    }

    pub(crate) fn in_group(group: Arc<SplitGroup<P>>, item: I) -> Self {
        Self {
            group,
            item,
            outcome: ItemOutcome::Pending,
        }
    }

    pub fn parent(&self) -> &P {
        &self.group.parent
    }

    pub fn item(&self) -> &I {
        &self.item
    }

    pub fn into_item(self) -> I {
        self.item
    }

    pub fn sibling_count(&self) -> usize {
        self.group.sibling_count
    }

    pub fn group(&self) -> &Arc<SplitGroup<P>> {
        &self.group
    }

    pub fn outcome(&self) -> &ItemOutcome {
        &self.outcome
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&SharedError> {
        match &self.outcome {
            ItemOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn mark_succeeded(&mut self) -> Result<()> {
        self.resolve(ItemOutcome::Succeeded)
    }

    pub fn mark_failed(&mut self, error: impl Into<SharedError>) -> Result<()> {
        self.resolve(ItemOutcome::Failed(error.into()))
    }

    fn resolve(&mut self, outcome: ItemOutcome) -> Result<()> {
        match self.outcome {
            ItemOutcome::Pending => {
                self.outcome = outcome;
                Ok(())
            }
            ref done => Err(DataflowError::OutcomeAlreadySet(done.name())),
        }
    }

    /// Re-open a succeeded item for the next processing stage.
    ///
    /// Failed items cannot be re-opened; stages pass them through instead.
    pub(crate) fn begin_processing(&mut self) -> Result<()> {
        match self.outcome {
            ItemOutcome::Pending => Ok(()),
            ItemOutcome::Succeeded => {
                self.outcome = ItemOutcome::Pending;
                Ok(())
            }
            ItemOutcome::Failed(_) => Err(DataflowError::OutcomeAlreadySet("failed")),
        }
    }

    /// Replace the payload, keeping the group and the outcome.
    pub(crate) fn rewrap<O>(self, item: O) -> SplitItem<P, O> {
        SplitItem {
            group: self.group,
            item,
            outcome: self.outcome,
        }
    }

    pub(crate) fn into_parts(self) -> (Arc<SplitGroup<P>>, I, ItemOutcome) {
        (self.group, self.item, self.outcome)
    }
}

impl<P: fmt::Debug, I: fmt::Debug> fmt::Debug for SplitItem<P, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitItem")
            .field("parent", self.parent())
            .field("item", &self.item)
            .field("sibling_count", &self.sibling_count())
            .field("outcome", &self.outcome.name())
            .finish()
    }
}

/// Failures of a split item go to its payload.
impl<P, I: ErrorSink> ErrorSink for SplitItem<P, I> {
    fn on_error(&self, error: &anyhow::Error) -> bool {
        self.item.on_error(error)
    }
}
