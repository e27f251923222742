//! Runnable dataflow: lifecycle, item submission and completion.

use crate::error::{DataflowError, Result};
use crate::pipeline::executor::StageTasks;
use crate::pipeline::DataflowStatus;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Deferred construction of the stage chain. Called once on start; spawns
/// every stage driver and returns the sender feeding the first stage.
pub(crate) type Wiring<S> = Box<dyn FnOnce(&mut StageTasks) -> mpsc::Sender<S> + Send + Sync>;

/// A composed chain of stages accepting items of type `S`.
///
/// Built by [`DataflowBuilder`](crate::pipeline::DataflowBuilder). Stage tasks
/// are only spawned by [`start`](Self::start) (or [`process`](Self::process)),
/// so a dataflow can be created outside of a tokio runtime.
pub struct Dataflow<S> {
    wiring: Option<Wiring<S>>,
    entry: Option<mpsc::Sender<S>>,
    tasks: StageTasks,
    status: DataflowStatus,
    started_at: Option<Instant>,
    elapsed: Option<Duration>,
}

impl<S> fmt::Debug for Dataflow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataflow")
            .field("status", &self.status)
            .field("stages", &self.tasks.stages())
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

impl<S: Send + 'static> Dataflow<S> {
    pub(crate) fn new(wiring: Wiring<S>) -> Self {
        Self {
            wiring: Some(wiring),
            entry: None,
            tasks: StageTasks::new(),
            status: DataflowStatus::NotStarted,
            started_at: None,
            elapsed: None,
        }
    }

    pub fn status(&self) -> DataflowStatus {
        self.status
    }

    /// Time since start; frozen once the dataflow has completed.
    ///
    /// Fails with [`DataflowError::InvalidStatus`] before the dataflow is
    /// started.
    pub fn elapsed(&self) -> Result<Duration> {
        if let Some(elapsed) = self.elapsed {
            return Ok(elapsed);
        }
        self.started_at
            .map(|at| at.elapsed())
            .ok_or(DataflowError::InvalidStatus(self.status))
    }

    /// Spawn every stage task. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.status != DataflowStatus::NotStarted {
            return Err(DataflowError::InvalidStatus(self.status));
        }
        let wiring = self
            .wiring
            .take()
            .ok_or(DataflowError::InvalidStatus(self.status))?;
        self.entry = Some(wiring(&mut self.tasks));
        self.started_at = Some(Instant::now());
        self.status = DataflowStatus::InProgress;
        tracing::info!(stages = self.tasks.len(), "Dataflow started");
        Ok(())
    }

    fn entry(&self) -> Result<&mpsc::Sender<S>> {
        match (&self.entry, self.status) {
            (Some(entry), DataflowStatus::InProgress) => Ok(entry),
            (_, status) => Err(DataflowError::InvalidStatus(status)),
        }
    }

    /// Submit one item, waiting while the first stage's input is full.
    pub async fn send(&self, item: S) -> Result<()> {
        self.entry()?
            .send(item)
            .await
            .map_err(|_| DataflowError::InputClosed)
    }

    /// Like [`send`](Self::send), but gives up with
    /// [`DataflowError::Cancelled`] if `token` fires while waiting for room.
    pub async fn send_with_cancellation(&self, item: S, token: &CancellationToken) -> Result<()> {
        let entry = self.entry()?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(DataflowError::Cancelled),
            sent = entry.send(item) => sent.map_err(|_| DataflowError::InputClosed),
        }
    }

    /// Signal that no more items will be sent.
    pub fn complete(&mut self) -> Result<()> {
        if self.status != DataflowStatus::InProgress {
            return Err(DataflowError::InvalidStatus(self.status));
        }
        self.entry = None;
        self.status = DataflowStatus::AllDataSent;
        Ok(())
    }

    /// Wait until every stage has drained. Returns the first stage failure.
    pub async fn wait(&mut self) -> Result<()> {
        if self.status != DataflowStatus::AllDataSent {
            return Err(DataflowError::InvalidStatus(self.status));
        }
        let outcome = self.tasks.join_all().await;
        self.elapsed = self.started_at.map(|at| at.elapsed());
        self.status = DataflowStatus::Completed;
        match &outcome {
            Ok(()) => tracing::info!(elapsed = ?self.elapsed, "Dataflow completed"),
            Err(err) => {
                tracing::warn!(elapsed = ?self.elapsed, "Dataflow completed with failure: {}", err)
            }
        }
        outcome
    }

    /// Run the whole lifecycle: start, send every item, complete, wait.
    ///
    /// If `cancellation` fires while an item waits to be admitted, the
    /// remaining items are not sent, already admitted items still finish and
    /// [`DataflowError::Cancelled`] is returned.
    pub async fn process<I>(
        &mut self,
        items: I,
        cancellation: Option<&CancellationToken>,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
    {
        self.start()?;

        let mut sent = 0usize;
        let mut interrupted = None;
        for item in items {
            let result = match cancellation {
                Some(token) => self.send_with_cancellation(item, token).await,
                None => self.send(item).await,
            };
            if let Err(err) = result {
                interrupted = Some(err);
                break;
            }
            sent += 1;
        }
        tracing::debug!(sent, "All items submitted");

        self.complete()?;
        let outcome = self.wait().await;
        match interrupted {
            Some(DataflowError::Cancelled) => Err(DataflowError::Cancelled),
            // A closed entry means a stage failed; its error is the useful one.
            Some(err) => outcome.and(Err(err)),
            None => outcome,
        }
    }
}
