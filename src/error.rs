//! Error handling for dataflow-rs
//!
//! This module defines the crate error type and a Result alias. Item-level
//! failures of user stage logic are *not* represented here: they travel with
//! the item as an [`anyhow::Error`] and end up in
//! [`SplitJoinResult::failed_items`](crate::split_join::SplitJoinResult).
//! `DataflowError` covers what is left: lifecycle misuse, broken engine
//! invariants, cancellation and configuration problems.

use crate::pipeline::DataflowStatus;
use thiserror::Error;

/// Main error type for dataflow-rs operations
#[derive(Error, Debug)]
pub enum DataflowError {
    /// The dataflow is in the wrong lifecycle state for the requested call
    #[error("Dataflow status {0:?} is invalid for performing current operation")]
    InvalidStatus(DataflowStatus),

    /// A cancellation token fired while an item was waiting to be admitted
    #[error("Dataflow was cancelled")]
    Cancelled,

    /// The first stage stopped accepting items before the entry was closed
    #[error("Dataflow input is closed")]
    InputClosed,

    /// A split item outcome was resolved twice
    #[error("Split item outcome already resolved as {0}")]
    OutcomeAlreadySet(&'static str),

    /// A split item reached the accumulator without a resolved outcome
    #[error("Split item has not been completed")]
    OutcomeNotSet,

    /// A split group was created with a non-positive sibling count
    #[error("Sibling count must be greater than zero, got {0}")]
    InvalidSiblingCount(usize),

    /// Two items for the same parent disagree on the sibling count
    #[error("Sibling count mismatch for parent {parent}: bucket expects {expected}, item carries {actual}")]
    SiblingCountMismatch {
        parent: String,
        expected: usize,
        actual: usize,
    },

    /// More completions arrived for a parent than it has siblings
    #[error("Completed items count already equal to total items count ({total}) for parent {parent}")]
    AccumulatorOverflow { parent: String, total: usize },

    /// An item arrived for a split group whose result was already emitted
    #[error("Split group for parent {0} was already joined")]
    GroupAlreadyJoined(String),

    /// A stage task panicked outside of per-item user logic
    #[error("Stage '{stage}' panicked: {message}")]
    StagePanicked { stage: &'static str, message: String },

    /// A stage task failed with an engine error
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: &'static str,
        #[source]
        source: Box<DataflowError>,
    },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DataflowError>,
    },
}

impl DataflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DataflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Attribute an engine error to the stage that raised it
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            err @ (DataflowError::StageFailed { .. } | DataflowError::StagePanicked { .. }) => err,
            other => DataflowError::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// True when the error stems from a broken engine invariant rather than
    /// from lifecycle misuse or configuration.
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            DataflowError::OutcomeAlreadySet(_)
            | DataflowError::OutcomeNotSet
            | DataflowError::InvalidSiblingCount(_)
            | DataflowError::SiblingCountMismatch { .. }
            | DataflowError::AccumulatorOverflow { .. }
            | DataflowError::GroupAlreadyJoined(_) => true,
            DataflowError::StageFailed { source, .. }
            | DataflowError::WithContext { source, .. } => source.is_invariant_violation(),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for DataflowError {
    fn from(err: toml::de::Error) -> Self {
        DataflowError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for DataflowError {
    fn from(err: toml::ser::Error) -> Self {
        DataflowError::Serialization(err.to_string())
    }
}

/// Result type alias for dataflow-rs operations
pub type Result<T> = std::result::Result<T, DataflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
