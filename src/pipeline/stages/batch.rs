//! Batch stage: groups consecutive items into `Vec`s of a fixed size.
//!
//! A partial batch is flushed when its oldest item has waited `timeout`, and
//! once more when the input completes.

use crate::error::{DataflowError, Result};
use crate::pipeline::executor::cancelled;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

async fn flush_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive a batch stage until its input completes or it is cancelled.
pub async fn run_batch<T: Send + 'static>(
    stage: &'static str,
    mut input: mpsc::Receiver<T>,
    output: mpsc::Sender<Vec<T>>,
    size: usize,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
) -> Result<()> {
    let size = size.max(1);
    let mut batch = Vec::with_capacity(size);
    let mut deadline = None;
    let mut was_cancelled = false;
    let mut batches = 0u64;

    tracing::debug!(stage, size, ?timeout, "Batch stage started");

    loop {
        let flush = tokio::select! {
            biased;
            _ = cancelled(cancellation.as_ref()) => {
                tracing::warn!(stage, "Stage cancelled, no longer accepting input");
                was_cancelled = true;
                break;
            }
            item = input.recv() => match item {
                Some(item) => {
                    if batch.is_empty() {
                        deadline = timeout.map(|t| Instant::now() + t);
                    }
                    batch.push(item);
                    batch.len() >= size
                }
                None => break,
            },
            _ = flush_due(deadline) => true,
        };

        if flush {
            deadline = None;
            let full = std::mem::replace(&mut batch, Vec::with_capacity(size));
            if output.send(full).await.is_err() {
                tracing::debug!(stage, "Downstream closed");
                return Ok(());
            }
            batches += 1;
        }
    }

    input.close();
    if !batch.is_empty() && output.send(batch).await.is_ok() {
        batches += 1;
    }
    tracing::debug!(stage, batches, "Batch stage finished");

    if was_cancelled {
        Err(DataflowError::Cancelled)
    } else {
        Ok(())
    }
}
