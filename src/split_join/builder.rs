//! Builder methods for split/join sections of a dataflow.
//!
//! ```ignore
//! let mut dataflow = DataflowBuilder::<String>::receive(settings)
//!     .split(|line: &String| Ok(line.split_whitespace().map(str::to_string).collect::<Vec<_>>()))
//!     .process(|_line, word| check(word))
//!     .transform(|_line, word| Ok(word.len()))
//!     .final_join(|result| println!("{:?}", result));
//! ```

use crate::config::StageOptions;
use crate::pipeline::{Dataflow, DataflowBuilder, Payload};
use crate::split_join::item::{ParentKey, SplitItem};
use crate::split_join::join::{Emission, JoinStage};
use crate::split_join::process::{ProcessStage, TransformStage};
use crate::split_join::result::SplitJoinResult;
use crate::split_join::split::SplitStage;
use futures::future;
use futures::FutureExt;
use std::future::Future;

impl<S: Send + 'static, P: ParentKey> DataflowBuilder<S, P> {
    /// Split every parent into items; continue with per-item stages.
    pub fn split<I, R, F>(self, f: F) -> SplitBuilder<S, P, I>
    where
        I: Payload,
        R: IntoIterator<Item = I>,
        F: Fn(&P) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let options = self.options("split");
        self.split_with(options, f)
    }

    pub fn split_with<I, R, F>(self, options: StageOptions, f: F) -> SplitBuilder<S, P, I>
    where
        I: Payload,
        R: IntoIterator<Item = I>,
        F: Fn(&P) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.split_stage(options, SplitStage::new(f))
    }

    pub fn split_async<I, R, F, Fut>(self, f: F) -> SplitBuilder<S, P, I>
    where
        I: Payload,
        R: IntoIterator<Item = I>,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let options = self.options("split");
        self.split_async_with(options, f)
    }

    pub fn split_async_with<I, R, F, Fut>(
        self,
        options: StageOptions,
        f: F,
    ) -> SplitBuilder<S, P, I>
    where
        I: Payload,
        R: IntoIterator<Item = I>,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.split_stage(options, SplitStage::new_async(f))
    }

    fn split_stage<I: Payload>(
        self,
        options: StageOptions,
        stage: SplitStage<P, I>,
    ) -> SplitBuilder<S, P, I> {
        let worker = stage
            .with_error_logger(options.error_logger.clone())
            .worker();
        SplitBuilder {
            inner: self.chain("split", options, worker),
        }
    }
}

impl<S: Send + 'static, P: ParentKey> DataflowBuilder<S, Option<P>> {
    /// Split parents that may be absent. `None` produces nothing.
    pub fn split_optional<I, R, F>(self, f: F) -> SplitBuilder<S, P, I>
    where
        I: Payload,
        R: IntoIterator<Item = I>,
        F: Fn(&P) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let options = self.options("split");
        self.split_optional_with(options, f)
    }

    pub fn split_optional_with<I, R, F>(self, options: StageOptions, f: F) -> SplitBuilder<S, P, I>
    where
        I: Payload,
        R: IntoIterator<Item = I>,
        F: Fn(&P) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let worker = SplitStage::new(f)
            .with_error_logger(options.error_logger.clone())
            .optional_worker();
        SplitBuilder {
            inner: self.chain("split", options, worker),
        }
    }
}

/// The per-item section of a dataflow, between a split and its join.
pub struct SplitBuilder<S, P, I> {
    inner: DataflowBuilder<S, SplitItem<P, I>>,
}

impl<S: Send + 'static, P: ParentKey, I: Payload> SplitBuilder<S, P, I> {
    /// Run a side effect for every item that has not failed yet.
    pub fn process<F>(self, f: F) -> Self
    where
        F: Fn(&P, &I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let options = self.inner.options("process");
        self.process_with(options, f)
    }

    pub fn process_with<F>(self, options: StageOptions, f: F) -> Self
    where
        F: Fn(&P, &I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.process_stage(options, ProcessStage::new(f))
    }

    pub fn process_async<F, Fut>(self, f: F) -> Self
    where
        I: Clone,
        F: Fn(P, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let options = self.inner.options("process");
        self.process_async_with(options, f)
    }

    pub fn process_async_with<F, Fut>(self, options: StageOptions, f: F) -> Self
    where
        I: Clone,
        F: Fn(P, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.process_stage(options, ProcessStage::new_async(f))
    }

    fn process_stage(self, options: StageOptions, stage: ProcessStage<P, I>) -> Self {
        let worker = stage
            .with_error_logger(options.error_logger.clone())
            .worker();
        SplitBuilder {
            inner: self.inner.chain("process", options, worker),
        }
    }

    /// Map every item that has not failed yet to a new payload.
    pub fn transform<O, F>(self, f: F) -> SplitBuilder<S, P, O>
    where
        O: Payload + Default,
        F: Fn(&P, &I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        let options = self.inner.options("transform");
        self.transform_with(options, f)
    }

    pub fn transform_with<O, F>(self, options: StageOptions, f: F) -> SplitBuilder<S, P, O>
    where
        O: Payload + Default,
        F: Fn(&P, &I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        self.transform_stage(options, TransformStage::new(f))
    }

    pub fn transform_async<O, F, Fut>(self, f: F) -> SplitBuilder<S, P, O>
    where
        I: Clone,
        O: Payload + Default,
        F: Fn(P, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let options = self.inner.options("transform");
        self.transform_async_with(options, f)
    }

    pub fn transform_async_with<O, F, Fut>(
        self,
        options: StageOptions,
        f: F,
    ) -> SplitBuilder<S, P, O>
    where
        I: Clone,
        O: Payload + Default,
        F: Fn(P, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        self.transform_stage(options, TransformStage::new_async(f))
    }

    fn transform_stage<O>(
        self,
        options: StageOptions,
        stage: TransformStage<P, I, O>,
    ) -> SplitBuilder<S, P, O>
    where
        O: Payload + Default,
    {
        let worker = stage
            .with_error_logger(options.error_logger.clone())
            .worker();
        SplitBuilder {
            inner: self.inner.chain("transform", options, worker),
        }
    }

    fn join_stage<O: Send + 'static>(
        self,
        options: StageOptions,
        emission: Emission<P, I, O>,
    ) -> DataflowBuilder<S, O> {
        let worker = JoinStage::new().worker(emission);
        self.inner.chain("join", options.for_join(), worker)
    }

    fn final_stage(self, options: StageOptions, emission: Emission<P, I, ()>) -> Dataflow<S> {
        let worker = JoinStage::new().worker(emission);
        self.inner.finish("join", options.for_join(), worker)
    }

    /// Emit one [`SplitJoinResult`] per completed parent.
    pub fn join(self) -> DataflowBuilder<S, SplitJoinResult<P, I>> {
        let options = self.inner.options("join");
        self.join_with(options)
    }

    /// Like [`join`](Self::join). Parallelism and capacity in `options` are
    /// replaced by the join's own: one group at a time, unbounded input.
    pub fn join_with(self, options: StageOptions) -> DataflowBuilder<S, SplitJoinResult<P, I>> {
        self.join_stage(
            options,
            Box::new(|result: SplitJoinResult<P, I>| future::ready(vec![result]).boxed()),
        )
    }

    /// Map every completed group to one output.
    pub fn join_into<O, F>(self, f: F) -> DataflowBuilder<S, O>
    where
        O: Send + 'static,
        F: FnMut(SplitJoinResult<P, I>) -> O + Send + 'static,
    {
        let options = self.inner.options("join");
        self.join_into_with(options, f)
    }

    pub fn join_into_with<O, F>(self, options: StageOptions, mut f: F) -> DataflowBuilder<S, O>
    where
        O: Send + 'static,
        F: FnMut(SplitJoinResult<P, I>) -> O + Send + 'static,
    {
        self.join_stage(
            options,
            Box::new(move |result: SplitJoinResult<P, I>| future::ready(vec![f(result)]).boxed()),
        )
    }

    pub fn join_into_async<O, F, Fut>(self, f: F) -> DataflowBuilder<S, O>
    where
        O: Send + 'static,
        F: FnMut(SplitJoinResult<P, I>) -> Fut + Send + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        let options = self.inner.options("join");
        self.join_into_async_with(options, f)
    }

    pub fn join_into_async_with<O, F, Fut>(
        self,
        options: StageOptions,
        mut f: F,
    ) -> DataflowBuilder<S, O>
    where
        O: Send + 'static,
        F: FnMut(SplitJoinResult<P, I>) -> Fut + Send + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        self.join_stage(
            options,
            Box::new(move |result: SplitJoinResult<P, I>| {
                f(result).map(|output| vec![output]).boxed()
            }),
        )
    }

    /// Close the dataflow, calling `f` once per completed parent.
    pub fn final_join<F>(self, f: F) -> Dataflow<S>
    where
        F: FnMut(SplitJoinResult<P, I>) + Send + 'static,
    {
        let options = self.inner.options("join");
        self.final_join_with(options, f)
    }

    pub fn final_join_with<F>(self, options: StageOptions, mut f: F) -> Dataflow<S>
    where
        F: FnMut(SplitJoinResult<P, I>) + Send + 'static,
    {
        self.final_stage(
            options,
            Box::new(move |result: SplitJoinResult<P, I>| {
                f(result);
                future::ready(Vec::new()).boxed()
            }),
        )
    }

    pub fn final_join_async<F, Fut>(self, f: F) -> Dataflow<S>
    where
        F: FnMut(SplitJoinResult<P, I>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let options = self.inner.options("join");
        self.final_join_async_with(options, f)
    }

    pub fn final_join_async_with<F, Fut>(self, options: StageOptions, mut f: F) -> Dataflow<S>
    where
        F: FnMut(SplitJoinResult<P, I>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.final_stage(
            options,
            Box::new(move |result: SplitJoinResult<P, I>| {
                f(result).map(|()| Vec::new()).boxed()
            }),
        )
    }

    /// Close the dataflow, joining every group and discarding the results.
    pub fn final_join_discard(self) -> Dataflow<S> {
        let options = self.inner.options("join");
        self.final_join_discard_with(options)
    }

    pub fn final_join_discard_with(self, options: StageOptions) -> Dataflow<S> {
        self.final_stage(
            options,
            Box::new(|_: SplitJoinResult<P, I>| future::ready(Vec::new()).boxed()),
        )
    }
}
