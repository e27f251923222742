//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use dataflow_rs::{DataflowSettings, StageOptions};
use std::future::Future;
use std::time::Duration;

/// Upper bound for a whole dataflow run in tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Fail the test instead of hanging when a dataflow never completes
pub async fn within_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(test_timeout(), future)
        .await
        .expect("dataflow did not finish in time")
}

/// Settings where every stage runs `parallelism` workers
pub fn parallel_settings(parallelism: usize) -> DataflowSettings {
    DataflowSettings::new(StageOptions::new().with_max_degree_of_parallelism(parallelism))
}

/// Split a string into its characters
pub fn chars(s: &String) -> anyhow::Result<Vec<char>> {
    Ok(s.chars().collect())
}
