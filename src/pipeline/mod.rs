//! Stage-based dataflow pipelines.
//!
//! Items flow through a chain of concurrently executing stages. Each stage
//! is a tokio task reading a bounded channel and running user logic on up to
//! `max_degree_of_parallelism` items at a time.
//!
//! # Architecture
//!
//! ```text
//! send ──► [transform] ──► [split] ──► [process]* ──► [join] ──► [action]
//!           1 → 1           1 → N       N → N          N → 1
//! ```
//!
//! # Design
//!
//! - **Lazy composition**: [`DataflowBuilder`] records stages; nothing runs
//!   until [`Dataflow::start`].
//! - **Backpressure**: bounded stage inputs; a full input suspends the sender.
//! - **Per-item failure isolation**: user logic errors and panics are routed
//!   to the item's [`ErrorSink`] or the stage's [`ErrorLogger`], never to the
//!   dataflow itself.
//! - **Engine errors fail loudly**: broken invariants end the stage and are
//!   returned by [`Dataflow::wait`].

pub mod builder;
pub mod dataflow;
pub mod error_sink;
pub mod executor;
pub(crate) mod stages;
pub mod status;

pub use builder::DataflowBuilder;
pub use dataflow::Dataflow;
pub use error_sink::{tracing_error_logger, ErrorLogger, ErrorSink, Payload, SharedError};
pub use executor::StageTasks;
pub use status::DataflowStatus;
