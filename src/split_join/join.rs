//! Fan-in stage: collects split items per parent and emits one result per
//! completed group.
//!
//! Items still pending when they reach the join never ran through a
//! processing stage and count as succeeded. The emission step runs one
//! group at a time, so emission callbacks need not be thread safe.

use crate::error::{DataflowError, Result};
use crate::split_join::accumulator::IntermediateAccumulator;
use crate::split_join::item::{ItemOutcome, ParentKey, SplitItem};
use crate::split_join::result::SplitJoinResult;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::{Arc, Mutex, PoisonError};

/// Turns a completed group into the stage outputs.
pub(crate) type Emission<P, I, O> =
    Box<dyn FnMut(SplitJoinResult<P, I>) -> BoxFuture<'static, Vec<O>> + Send>;

pub struct JoinStage<P, I> {
    accumulator: IntermediateAccumulator<P, I>,
}

impl<P: ParentKey, I: Send + 'static> JoinStage<P, I> {
    pub fn new() -> Self {
        Self::with_accumulator(IntermediateAccumulator::new())
    }

    pub fn with_accumulator(accumulator: IntermediateAccumulator<P, I>) -> Self {
        Self { accumulator }
    }

    pub fn accumulator(&self) -> &IntermediateAccumulator<P, I> {
        &self.accumulator
    }

    /// Record one item; returns the group result if it completed the group.
    pub fn accept(&self, mut item: SplitItem<P, I>) -> Result<Option<SplitJoinResult<P, I>>> {
        if matches!(item.outcome(), ItemOutcome::Pending) {
            item.mark_succeeded()?;
        }
        let completed = self.accumulator.complete(item)?;
        if let Some(result) = &completed {
            tracing::trace!(
                parent = ?result.parent(),
                failed = result.failed_items().len(),
                total = result.total_items_count(),
                "Split group joined"
            );
        }
        Ok(completed)
    }

    pub(crate) fn worker<O: Send + 'static>(
        self,
        emission: Emission<P, I, O>,
    ) -> impl Fn(SplitItem<P, I>) -> BoxFuture<'static, Result<Vec<O>>> + Send + Sync + 'static {
        let stage = Arc::new(self);
        let emission = Arc::new(Mutex::new(emission));
        move |item| {
            let stage = Arc::clone(&stage);
            let emission = Arc::clone(&emission);
            async move {
                let Some(result) = stage.accept(item)? else {
                    return Ok::<_, DataflowError>(Vec::new());
                };
                let pending = {
                    let mut emit = emission.lock().unwrap_or_else(PoisonError::into_inner);
                    emit(result)
                };
                Ok(pending.await)
            }
            .boxed()
        }
    }
}

impl<P: ParentKey, I: Send + 'static> Default for JoinStage<P, I> {
    fn default() -> Self {
        Self::new()
    }
}
