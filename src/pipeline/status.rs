//! Lifecycle state of a [`Dataflow`](crate::pipeline::Dataflow).

use std::fmt;

/// Lifecycle of a dataflow run.
///
/// Transitions only move forward:
/// `NotStarted -> InProgress -> AllDataSent -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataflowStatus {
    /// Built but not started; no stage task exists yet.
    NotStarted,
    /// Stage tasks are running and the entry accepts items.
    InProgress,
    /// The entry has been closed; in-flight items are draining.
    AllDataSent,
    /// Every stage task has finished.
    Completed,
}

impl DataflowStatus {
    pub fn is_running(self) -> bool {
        matches!(self, DataflowStatus::InProgress | DataflowStatus::AllDataSent)
    }
}

impl fmt::Display for DataflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataflowStatus::NotStarted => "not started",
            DataflowStatus::InProgress => "in progress",
            DataflowStatus::AllDataSent => "all data sent",
            DataflowStatus::Completed => "completed",
        };
        f.write_str(name)
    }
}
