//! Stage executor: the per-stage driver task and the task set of a dataflow.
//!
//! Every stage runs one driver task. The driver reads its bounded input
//! channel, spawns one worker per item (up to the stage's degree of
//! parallelism) and forwards the worker outputs to the next stage's input.
//! Only the driver owns the output sender, so a full downstream channel
//! stops the driver from admitting more input: backpressure propagates
//! upstream stage by stage.
//!
//! ```text
//! input rx ──► driver ──spawn──► worker ─┐
//!                 ▲                       │ Vec<O>
//!                 └───── in flight ◄──────┘
//!                 │
//!                 └──► output tx (next stage)
//! ```
//!
//! Worker results are forwarded in completion order, or in input order when
//! the stage has `ensure_ordered` set.

use crate::config::StageOptions;
use crate::error::{DataflowError, Result};
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Run `logic`, converting a panic into an item failure.
pub(crate) async fn guarded<T, F>(logic: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(logic).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("panicked: {}", panic_message(&*panic))),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn join_failure(stage: &'static str, err: JoinError) -> DataflowError {
    if err.is_panic() {
        DataflowError::StagePanicked {
            stage,
            message: panic_message(&*err.into_panic()),
        }
    } else {
        DataflowError::Cancelled.in_stage(stage)
    }
}

pub(crate) async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Workers of one stage that have been spawned but not yet settled.
enum InFlight<T> {
    Unordered(JoinSet<T>),
    Ordered(VecDeque<JoinHandle<T>>),
}

impl<T: Send + 'static> InFlight<T> {
    fn new(ordered: bool) -> Self {
        if ordered {
            InFlight::Ordered(VecDeque::new())
        } else {
            InFlight::Unordered(JoinSet::new())
        }
    }

    fn len(&self) -> usize {
        match self {
            InFlight::Unordered(set) => set.len(),
            InFlight::Ordered(queue) => queue.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn<F>(&mut self, worker: F, scheduler: Option<&Handle>)
    where
        F: Future<Output = T> + Send + 'static,
    {
        match (self, scheduler) {
            (InFlight::Unordered(set), Some(handle)) => {
                set.spawn_on(worker, handle);
            }
            (InFlight::Unordered(set), None) => {
                set.spawn(worker);
            }
            (InFlight::Ordered(queue), Some(handle)) => queue.push_back(handle.spawn(worker)),
            (InFlight::Ordered(queue), None) => queue.push_back(tokio::spawn(worker)),
        }
    }

    /// Next settled worker. Cancel safe: nothing is removed until it is ready.
    async fn next(&mut self) -> Option<std::result::Result<T, JoinError>> {
        match self {
            InFlight::Unordered(set) => set.join_next().await,
            InFlight::Ordered(queue) => {
                let head = queue.front_mut()?;
                let result = head.await;
                queue.pop_front();
                Some(result)
            }
        }
    }
}

/// Forwards settled worker outputs and remembers the first stage failure.
struct Forwarder<O> {
    stage: &'static str,
    output: Option<mpsc::Sender<O>>,
    downstream_closed: bool,
    failure: Option<DataflowError>,
    forwarded: u64,
}

impl<O> Forwarder<O> {
    fn fail(&mut self, err: DataflowError) {
        tracing::error!(stage = self.stage, "Stage failed: {}", err);
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }

    /// Settle one worker. Returns whether the stage may keep admitting input.
    async fn settle(&mut self, done: std::result::Result<Result<Vec<O>>, JoinError>) -> bool {
        match done {
            Ok(Ok(outputs)) => {
                if let (Some(tx), false) = (&self.output, self.downstream_closed) {
                    for out in outputs {
                        if tx.send(out).await.is_err() {
                            tracing::debug!(stage = self.stage, "Downstream closed");
                            self.downstream_closed = true;
                            break;
                        }
                        self.forwarded += 1;
                    }
                }
            }
            Ok(Err(err)) => self.fail(err.in_stage(self.stage)),
            Err(err) => self.fail(join_failure(self.stage, err)),
        }
        self.failure.is_none() && !self.downstream_closed
    }
}

/// Drive one stage until its input is exhausted, it is cancelled, its
/// downstream goes away or a worker fails with an engine error.
///
/// `work` is called on the driver task and must only build the worker
/// future; the user logic runs inside the returned future. Terminal stages
/// pass `None` as output and their worker outputs are discarded.
pub(crate) async fn drive<I, O, W, Fut>(
    stage: &'static str,
    mut input: mpsc::Receiver<I>,
    output: Option<mpsc::Sender<O>>,
    options: StageOptions,
    work: W,
) -> Result<()>
where
    I: Send + 'static,
    O: Send + 'static,
    W: Fn(I) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<O>>> + Send + 'static,
{
    let limit = options.resolve_parallelism();
    let mut in_flight = InFlight::new(options.ensure_ordered);
    let mut forwarder = Forwarder {
        stage,
        output,
        downstream_closed: false,
        failure: None,
        forwarded: 0,
    };
    let mut was_cancelled = false;
    let mut admitted = 0u64;

    tracing::debug!(
        stage,
        parallelism = limit,
        ordered = options.ensure_ordered,
        "Stage started"
    );

    loop {
        tokio::select! {
            biased;
            Some(done) = in_flight.next(), if !in_flight.is_empty() => {
                if !forwarder.settle(done).await {
                    break;
                }
            }
            _ = cancelled(options.cancellation.as_ref()) => {
                tracing::warn!(stage, "Stage cancelled, no longer accepting input");
                was_cancelled = true;
                break;
            }
            item = input.recv(), if in_flight.len() < limit => match item {
                Some(item) => {
                    admitted += 1;
                    in_flight.spawn(work(item), options.scheduler.as_ref());
                }
                None => break,
            },
        }
    }

    // Upstream senders now fail fast; admitted items still run to completion.
    input.close();
    while let Some(done) = in_flight.next().await {
        forwarder.settle(done).await;
    }

    tracing::debug!(
        stage,
        admitted,
        forwarded = forwarder.forwarded,
        "Stage finished"
    );

    match forwarder.failure {
        Some(err) => Err(err),
        None if was_cancelled => Err(DataflowError::Cancelled),
        None => Ok(()),
    }
}

/// The driver tasks of one dataflow.
pub struct StageTasks {
    tasks: JoinSet<Result<()>>,
    stages: Vec<&'static str>,
}

impl StageTasks {
    pub(crate) fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            stages: Vec::new(),
        }
    }

    pub(crate) fn spawn<F>(&mut self, stage: &'static str, scheduler: Option<&Handle>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        match scheduler {
            Some(handle) => {
                self.tasks.spawn_on(task, handle);
            }
            None => {
                self.tasks.spawn(task);
            }
        }
        self.stages.push(stage);
    }

    /// Stage names in the order they were spawned (last stage first).
    pub fn stages(&self) -> &[&'static str] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wait for every driver, returning the first failure observed.
    pub(crate) async fn join_all(&mut self) -> Result<()> {
        let mut first = None;
        while let Some(done) = self.tasks.join_next().await {
            let outcome = done.unwrap_or_else(|err| Err(join_failure("dataflow", err)));
            if let Err(err) = outcome {
                if first.is_none() {
                    first = Some(err);
                } else {
                    tracing::debug!("Additional stage failure: {}", err);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }
}
