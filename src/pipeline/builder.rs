//! Fluent composition of stages into a [`Dataflow`].
//!
//! ```ignore
//! let mut dataflow = DataflowBuilder::<String>::receive(settings)
//!     .transform(|line: &String| Ok(line.trim().to_string()))
//!     .batch(64, Some(Duration::from_millis(10)))
//!     .action(|lines: &Vec<String>| store(lines));
//! dataflow.process(lines, None).await?;
//! ```
//!
//! Composition is lazy: each call only records how to spawn its stage. The
//! stage tasks and channels are created when the resulting [`Dataflow`] is
//! started. Unless a `*_with` form is used, a stage takes its options from
//! [`DataflowSettings::options_for`] with the stage kind as name
//! (`"transform"`, `"process"`, `"split"`, `"join"`, ...).

use crate::config::{DataflowSettings, StageOptions};
use crate::error::Result;
use crate::pipeline::dataflow::{Dataflow, Wiring};
use crate::pipeline::error_sink::Payload;
use crate::pipeline::executor::{drive, StageTasks};
use crate::pipeline::stages::linear::{emit_all, emit_input, emit_nothing, emit_result};
use crate::pipeline::stages::{async_fn, linear_worker, run_batch, sync_fn, Emit, StageFn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

/// Spawns every stage composed so far, given the sender of the next stage,
/// and returns the sender of the first stage.
type Head<S, T> =
    Box<dyn FnOnce(mpsc::Sender<T>, &mut StageTasks) -> mpsc::Sender<S> + Send + Sync>;

/// A partially composed dataflow accepting `S` and currently producing `T`.
pub struct DataflowBuilder<S, T = S> {
    settings: DataflowSettings,
    head: Head<S, T>,
}

impl<S: Send + 'static> DataflowBuilder<S, S> {
    /// Start a chain whose stages take their options from `settings`.
    pub fn receive(settings: DataflowSettings) -> Self {
        Self {
            settings,
            head: Box::new(|entry, _| entry),
        }
    }

    pub fn new() -> Self {
        Self::receive(DataflowSettings::default())
    }
}

impl<S: Send + 'static> Default for DataflowBuilder<S, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + 'static, T: Send + 'static> DataflowBuilder<S, T> {
    pub fn settings(&self) -> &DataflowSettings {
        &self.settings
    }

    pub(crate) fn options(&self, stage: &str) -> StageOptions {
        self.settings.options_for(stage)
    }

    /// Append a stage with a custom driver.
    pub(crate) fn attach<U, F, Fut>(
        self,
        stage: &'static str,
        options: StageOptions,
        run: F,
    ) -> DataflowBuilder<S, U>
    where
        U: Send + 'static,
        F: FnOnce(mpsc::Receiver<T>, mpsc::Sender<U>, StageOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let DataflowBuilder { settings, head } = self;
        DataflowBuilder {
            settings,
            head: Box::new(move |output, tasks| {
                let (tx, rx) = mpsc::channel(options.channel_capacity());
                let scheduler = options.scheduler.clone();
                tasks.spawn(stage, scheduler.as_ref(), run(rx, output, options));
                head(tx, tasks)
            }),
        }
    }

    /// Append a stage run by the standard per-item driver.
    pub(crate) fn chain<U, W, Fut>(
        self,
        stage: &'static str,
        options: StageOptions,
        work: W,
    ) -> DataflowBuilder<S, U>
    where
        U: Send + 'static,
        W: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<U>>> + Send + 'static,
    {
        self.attach(stage, options, move |rx, tx, options| {
            drive(stage, rx, Some(tx), options, work)
        })
    }

    /// Close the chain with a stage that produces nothing.
    pub(crate) fn finish<W, Fut>(
        self,
        stage: &'static str,
        options: StageOptions,
        work: W,
    ) -> Dataflow<S>
    where
        W: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<()>>> + Send + 'static,
    {
        let head = self.head;
        let wiring: Wiring<S> = Box::new(move |tasks| {
            let (tx, rx) = mpsc::channel(options.channel_capacity());
            let scheduler = options.scheduler.clone();
            tasks.spawn(
                stage,
                scheduler.as_ref(),
                drive::<T, (), _, _>(stage, rx, None, options, work),
            );
            head(tx, tasks)
        });
        Dataflow::new(wiring)
    }

    /// Terminal stage that discards every item.
    pub fn drain(self) -> Dataflow<S> {
        let options = self.options("drain");
        self.finish("drain", options, |_item: T| async { Ok(Vec::new()) })
    }

    /// Group items into vectors of `size`, flushing a partial batch after
    /// `timeout` and when the input completes.
    pub fn batch(self, size: usize, timeout: Option<Duration>) -> DataflowBuilder<S, Vec<T>> {
        let options = self.options("batch");
        self.batch_with(options, size, timeout)
    }

    pub fn batch_with(
        self,
        options: StageOptions,
        size: usize,
        timeout: Option<Duration>,
    ) -> DataflowBuilder<S, Vec<T>> {
        self.attach("batch", options, move |rx, tx, options| {
            run_batch("batch", rx, tx, size, timeout, options.cancellation)
        })
    }
}

impl<S: Send + 'static, T: Payload> DataflowBuilder<S, T> {
    fn linear<R, U>(
        self,
        stage: &'static str,
        options: StageOptions,
        logic: StageFn<T, R>,
        emit: Emit<T, R, U>,
    ) -> DataflowBuilder<S, U>
    where
        R: Send + 'static,
        U: Send + 'static,
    {
        let worker = linear_worker(stage, logic, options.error_logger.clone(), emit);
        self.chain(stage, options, worker)
    }

    /// Map every item to one output. A failing item is reported and dropped.
    pub fn transform<U, F>(self, f: F) -> DataflowBuilder<S, U>
    where
        U: Send + 'static,
        F: Fn(&T) -> anyhow::Result<U> + Send + Sync + 'static,
    {
        let options = self.options("transform");
        self.transform_with(options, f)
    }

    pub fn transform_with<U, F>(self, options: StageOptions, f: F) -> DataflowBuilder<S, U>
    where
        U: Send + 'static,
        F: Fn(&T) -> anyhow::Result<U> + Send + Sync + 'static,
    {
        self.linear("transform", options, sync_fn(f), emit_result)
    }

    pub fn transform_async<U, F, Fut>(self, f: F) -> DataflowBuilder<S, U>
    where
        T: Clone,
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        let options = self.options("transform");
        self.transform_async_with(options, f)
    }

    pub fn transform_async_with<U, F, Fut>(
        self,
        options: StageOptions,
        f: F,
    ) -> DataflowBuilder<S, U>
    where
        T: Clone,
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        self.linear("transform", options, async_fn(f), emit_result)
    }

    /// Map every item to any number of outputs.
    pub fn transform_many<U, R, F>(self, f: F) -> DataflowBuilder<S, U>
    where
        U: Send + 'static,
        R: IntoIterator<Item = U> + Send + 'static,
        F: Fn(&T) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let options = self.options("transform_many");
        self.transform_many_with(options, f)
    }

    pub fn transform_many_with<U, R, F>(self, options: StageOptions, f: F) -> DataflowBuilder<S, U>
    where
        U: Send + 'static,
        R: IntoIterator<Item = U> + Send + 'static,
        F: Fn(&T) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.linear("transform_many", options, sync_fn(f), emit_all)
    }

    pub fn transform_many_async<U, R, F, Fut>(self, f: F) -> DataflowBuilder<S, U>
    where
        T: Clone,
        U: Send + 'static,
        R: IntoIterator<Item = U> + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let options = self.options("transform_many");
        self.transform_many_async_with(options, f)
    }

    pub fn transform_many_async_with<U, R, F, Fut>(
        self,
        options: StageOptions,
        f: F,
    ) -> DataflowBuilder<S, U>
    where
        T: Clone,
        U: Send + 'static,
        R: IntoIterator<Item = U> + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.linear("transform_many", options, async_fn(f), emit_all)
    }

    /// Run a side effect; the item passes through unless the effect fails.
    pub fn process<F>(self, f: F) -> DataflowBuilder<S, T>
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let options = self.options("process");
        self.process_with(options, f)
    }

    pub fn process_with<F>(self, options: StageOptions, f: F) -> DataflowBuilder<S, T>
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.linear("process", options, sync_fn(f), emit_input)
    }

    pub fn process_async<F, Fut>(self, f: F) -> DataflowBuilder<S, T>
    where
        T: Clone,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let options = self.options("process");
        self.process_async_with(options, f)
    }

    pub fn process_async_with<F, Fut>(self, options: StageOptions, f: F) -> DataflowBuilder<S, T>
    where
        T: Clone,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.linear("process", options, async_fn(f), emit_input)
    }

    /// Terminal side effect.
    pub fn action<F>(self, f: F) -> Dataflow<S>
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let options = self.options("action");
        self.action_with(options, f)
    }

    pub fn action_with<F>(self, options: StageOptions, f: F) -> Dataflow<S>
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let worker = linear_worker(
            "action",
            sync_fn(f),
            options.error_logger.clone(),
            emit_nothing,
        );
        self.finish("action", options, worker)
    }

    pub fn action_async<F, Fut>(self, f: F) -> Dataflow<S>
    where
        T: Clone,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let options = self.options("action");
        self.action_async_with(options, f)
    }

    pub fn action_async_with<F, Fut>(self, options: StageOptions, f: F) -> Dataflow<S>
    where
        T: Clone,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let worker = linear_worker(
            "action",
            async_fn(f),
            options.error_logger.clone(),
            emit_nothing,
        );
        self.finish("action", options, worker)
    }
}
