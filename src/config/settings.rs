//! Per-stage execution settings
//!
//! Every stage of a dataflow is created from an explicit [`StageOptions`]
//! value. A [`DataflowSettings`] bundles the defaults for one builder chain
//! (including the default error logger) so the chain is configured once, at
//! composition time, instead of mutating shared state as stages are added.
//!
//! # Defaults
//!
//! - **Bounded capacity**: 1000 queued items per stage input
//! - **Degree of parallelism**: the available hardware concurrency
//! - **Ordering**: not ensured (completion order)

use crate::config::{DEFAULT_BOUNDED_CAPACITY, UNBOUNDED};
use crate::pipeline::ErrorLogger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Largest channel capacity used when a stage is configured as unbounded.
///
/// tokio rejects channel sizes above its semaphore permit limit, so
/// "unbounded" is a very large bound rather than an unbounded channel.
pub const UNBOUNDED_CHANNEL_CAPACITY: usize = usize::MAX >> 4;

/// Execution options for a single stage
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOptions {
    /// Maximum number of items queued at the stage input (0 = unbounded)
    pub bounded_capacity: usize,

    /// Maximum number of items processed concurrently (0 = hardware concurrency)
    pub max_degree_of_parallelism: usize,

    /// Forward outputs in input order instead of completion order
    pub ensure_ordered: bool,

    /// Stops the stage from accepting new input when cancelled
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,

    /// Runtime the stage workers are spawned on (current runtime when unset)
    #[serde(skip)]
    pub scheduler: Option<Handle>,

    /// Fallback for failures whose payload does not consume them
    #[serde(skip)]
    pub error_logger: Option<ErrorLogger>,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            bounded_capacity: DEFAULT_BOUNDED_CAPACITY,
            max_degree_of_parallelism: 0,
            ensure_ordered: false,
            cancellation: None,
            scheduler: None,
            error_logger: None,
        }
    }
}

impl fmt::Debug for StageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageOptions")
            .field("bounded_capacity", &self.bounded_capacity)
            .field("max_degree_of_parallelism", &self.max_degree_of_parallelism)
            .field("ensure_ordered", &self.ensure_ordered)
            .field("cancellable", &self.cancellation.is_some())
            .field("scheduler", &self.scheduler.is_some())
            .field("error_logger", &self.error_logger.is_some())
            .finish()
    }
}

impl StageOptions {
    /// Create options with the documented defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a stage that must run one item at a time
    pub fn serial() -> Self {
        Self::default().with_max_degree_of_parallelism(1)
    }

    pub fn with_bounded_capacity(mut self, capacity: usize) -> Self {
        self.bounded_capacity = capacity;
        self
    }

    pub fn with_max_degree_of_parallelism(mut self, parallelism: usize) -> Self {
        self.max_degree_of_parallelism = parallelism;
        self
    }

    pub fn with_ensure_ordered(mut self, ensure_ordered: bool) -> Self {
        self.ensure_ordered = ensure_ordered;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_scheduler(mut self, handle: Handle) -> Self {
        self.scheduler = Some(handle);
        self
    }

    pub fn with_error_logger(mut self, logger: ErrorLogger) -> Self {
        self.error_logger = Some(logger);
        self
    }

    /// Options used by join stages: same logger, scheduler and cancellation,
    /// but one item at a time and an unbounded input so that upstream
    /// workers never wait on the aggregation step.
    pub fn for_join(&self) -> Self {
        Self {
            bounded_capacity: UNBOUNDED,
            max_degree_of_parallelism: 1,
            ensure_ordered: false,
            ..self.clone()
        }
    }

    /// Effective number of concurrent workers
    pub fn resolve_parallelism(&self) -> usize {
        resolve_parallelism(self.max_degree_of_parallelism)
    }

    /// Effective capacity of the stage input channel, never above
    /// [`UNBOUNDED_CHANNEL_CAPACITY`]
    pub fn channel_capacity(&self) -> usize {
        if self.bounded_capacity == UNBOUNDED {
            UNBOUNDED_CHANNEL_CAPACITY
        } else {
            self.bounded_capacity.min(UNBOUNDED_CHANNEL_CAPACITY)
        }
    }

    /// Apply a partial override on top of these options
    pub fn apply(mut self, over: &StageOverride) -> Self {
        if let Some(capacity) = over.bounded_capacity {
            self.bounded_capacity = capacity;
        }
        if let Some(parallelism) = over.max_degree_of_parallelism {
            self.max_degree_of_parallelism = parallelism;
        }
        if let Some(ordered) = over.ensure_ordered {
            self.ensure_ordered = ordered;
        }
        self
    }
}

/// Maps a configured degree of parallelism to a worker count.
///
/// `0` resolves to the available hardware concurrency.
pub fn resolve_parallelism(configured: usize) -> usize {
    if configured == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        configured
    }
}

/// Partial stage options, as found under `[stages.<name>]` in the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOverride {
    pub bounded_capacity: Option<usize>,
    pub max_degree_of_parallelism: Option<usize>,
    pub ensure_ordered: Option<bool>,
}

/// Stage defaults for one dataflow builder chain
#[derive(Debug, Clone, Default)]
pub struct DataflowSettings {
    defaults: StageOptions,
    overrides: BTreeMap<String, StageOverride>,
}

impl DataflowSettings {
    pub fn new(defaults: StageOptions) -> Self {
        Self {
            defaults,
            overrides: BTreeMap::new(),
        }
    }

    /// Build settings from a loaded configuration file
    pub fn from_config(config: &crate::config::DataflowConfig) -> Self {
        Self {
            defaults: config.defaults.clone(),
            overrides: config.stages.clone(),
        }
    }

    /// Set the logger used by every stage whose failing payload does not
    /// consume the error itself.
    pub fn with_default_error_logger(mut self, logger: ErrorLogger) -> Self {
        self.defaults.error_logger = Some(logger);
        self
    }

    /// Share one cancellation token across every stage of the chain
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.defaults.cancellation = Some(token);
        self
    }

    pub fn with_override(mut self, name: impl Into<String>, over: StageOverride) -> Self {
        self.overrides.insert(name.into(), over);
        self
    }

    /// Default options for unnamed stages
    pub fn defaults(&self) -> &StageOptions {
        &self.defaults
    }

    /// Options for a named stage: the defaults with the stage override applied
    pub fn options_for(&self, name: &str) -> StageOptions {
        match self.overrides.get(name) {
            Some(over) => self.defaults.clone().apply(over),
            None => self.defaults.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let opts = StageOptions::default();
        assert_eq!(opts.bounded_capacity, 1000);
        assert_eq!(opts.max_degree_of_parallelism, 0);
        assert!(!opts.ensure_ordered);
        assert!(opts.resolve_parallelism() >= 1);
        assert_eq!(opts.channel_capacity(), 1000);
    }

    #[test]
    fn test_unbounded_capacity() {
        let opts = StageOptions::default().with_bounded_capacity(UNBOUNDED);
        assert_eq!(opts.channel_capacity(), UNBOUNDED_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_oversized_capacity_is_clamped() {
        let opts = StageOptions::default().with_bounded_capacity(usize::MAX);
        assert_eq!(opts.channel_capacity(), UNBOUNDED_CHANNEL_CAPACITY);

        let just_above =
            StageOptions::default().with_bounded_capacity(UNBOUNDED_CHANNEL_CAPACITY + 1);
        assert_eq!(just_above.channel_capacity(), UNBOUNDED_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_for_join_is_serial_and_keeps_logger() {
        let logger: ErrorLogger = Arc::new(|_, _| {});
        let opts = StageOptions::default()
            .with_max_degree_of_parallelism(8)
            .with_bounded_capacity(4)
            .with_error_logger(logger);

        let join = opts.for_join();
        assert_eq!(join.resolve_parallelism(), 1);
        assert_eq!(join.bounded_capacity, UNBOUNDED);
        assert!(join.error_logger.is_some());
    }

    #[test]
    fn test_options_for_named_stage() {
        let settings = DataflowSettings::new(StageOptions::default().with_bounded_capacity(10))
            .with_override(
                "tokenize",
                StageOverride {
                    max_degree_of_parallelism: Some(2),
                    ensure_ordered: Some(true),
                    ..Default::default()
                },
            );

        let tokenize = settings.options_for("tokenize");
        assert_eq!(tokenize.bounded_capacity, 10);
        assert_eq!(tokenize.max_degree_of_parallelism, 2);
        assert!(tokenize.ensure_ordered);

        let other = settings.options_for("other");
        assert_eq!(other.max_degree_of_parallelism, 0);
        assert!(!other.ensure_ordered);
    }

    #[test]
    fn test_default_logger_reaches_named_stages() {
        let logger: ErrorLogger = Arc::new(|_, _| {});
        let settings = DataflowSettings::default().with_default_error_logger(logger);
        assert!(settings.options_for("anything").error_logger.is_some());
    }
}
