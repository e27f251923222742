//! # dataflow-rs: split/join dataflow coordination
//!
//! Builds chains of concurrently executing stages over tokio. Items are sent
//! into the head of a [`Dataflow`], flow through bounded stage inputs and are
//! processed by user logic with per-stage parallelism. A split stage fans
//! each parent out into items; the matching join fans them back in and
//! reports, per parent, which items succeeded and which failed.
//!
//! ## Architecture
//!
//! - **Pipeline**: the stage executor, the [`DataflowBuilder`] and the
//!   [`Dataflow`] runner with its status lifecycle
//! - **Split/join**: split items, the per-parent accumulator and the join
//!   result
//! - **Config**: stage options, per-chain settings and the optional TOML file
//!
//! ## Configuration
//!
//! Stage defaults may be loaded from `dataflow.toml` in the platform
//! configuration directory under `dev.hxyulin.dataflow-rs`:
//!
//! - **Linux**: `~/.config/dev.hxyulin.dataflow-rs/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.dataflow-rs/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.dataflow-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use dataflow_rs::{config::DataflowConfig, DataflowBuilder};
//!
//! #[tokio::main]
//! async fn main() -> dataflow_rs::Result<()> {
//!     let settings = DataflowConfig::load_or_default().settings();
//!
//!     let mut dataflow = DataflowBuilder::<String>::receive(settings)
//!         .split(|line: &String| {
//!             Ok(line.split_whitespace().map(str::to_string).collect::<Vec<_>>())
//!         })
//!         .transform(|_line, word| Ok(word.to_uppercase()))
//!         .final_join(|result| {
//!             println!("{:?}: {} words", result.parent(), result.total_items_count());
//!         });
//!
//!     dataflow.process(vec!["hello split join".to_string()], None).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod split_join;

// Re-export commonly used types
pub use config::{DataflowConfig, DataflowSettings, StageOptions};
pub use error::{DataflowError, Result};
pub use pipeline::{Dataflow, DataflowBuilder, DataflowStatus, ErrorLogger, ErrorSink};
pub use split_join::{SplitBuilder, SplitItem, SplitJoinResult};
