//! Split/join sections: fan a parent out into items, process them
//! independently and in parallel, then fan them back in.
//!
//! # Lifecycle of a group
//!
//! ```text
//!            ┌─► SplitItem(p, a, 3) ─► process ─► transform ─┐
//! parent p ──┼─► SplitItem(p, b, 3) ─► process ─► transform ─┼─► join ─► SplitJoinResult(p)
//!            └─► SplitItem(p, c, 3) ─► process ─► transform ─┘
//! ```
//!
//! - The split tags every item with its parent and the sibling count.
//! - Each per-item stage resolves the item's outcome. A failed item skips the
//!   remaining stages and reaches the join with its first error.
//! - The join buffers items per parent in an [`IntermediateAccumulator`] and
//!   emits exactly one [`SplitJoinResult`] when the last sibling arrives, in
//!   whatever order the siblings complete.
//! - A parent that splits into no items produces no result.

pub mod accumulator;
pub mod builder;
pub mod item;
pub mod join;
pub mod process;
pub mod result;
pub mod split;

pub use accumulator::IntermediateAccumulator;
pub use builder::SplitBuilder;
pub use item::{ItemOutcome, ParentKey, SplitGroup, SplitItem};
pub use join::JoinStage;
pub use process::{ProcessStage, TransformStage};
pub use result::{FailedItem, SplitJoinResult};
pub use split::SplitStage;
