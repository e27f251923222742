//! Linear stages: transform, transform-many, process and action.
//!
//! All four share one worker shape. The user logic produces an `R` for the
//! input; an [`Emit`] function decides what goes downstream from the input
//! and that `R`. A failed input is reported (item error sink first, then the
//! stage logger) and emits nothing.

use crate::error::Result;
use crate::pipeline::error_sink::{report_failure, ErrorLogger, Payload};
use crate::pipeline::stages::{invoke, StageFn};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

/// Maps an input and its logic result to the stage outputs.
pub type Emit<T, R, U> = fn(T, R) -> Vec<U>;

pub(crate) fn emit_result<T, U>(_input: T, output: U) -> Vec<U> {
    vec![output]
}

pub(crate) fn emit_all<T, R, U>(_input: T, outputs: R) -> Vec<U>
where
    R: IntoIterator<Item = U>,
{
    outputs.into_iter().collect()
}

pub(crate) fn emit_input<T>(input: T, _done: ()) -> Vec<T> {
    vec![input]
}

pub(crate) fn emit_nothing<T>(_input: T, _done: ()) -> Vec<()> {
    Vec::new()
}

/// Build the per-item worker of a linear stage.
pub fn linear_worker<T, R, U>(
    stage: &'static str,
    logic: StageFn<T, R>,
    logger: Option<ErrorLogger>,
    emit: Emit<T, R, U>,
) -> impl Fn(T) -> BoxFuture<'static, Result<Vec<U>>> + Send + Sync + 'static
where
    T: Payload,
    R: Send + 'static,
    U: Send + 'static,
{
    move |input: T| {
        let logic = Arc::clone(&logic);
        let logger = logger.clone();
        async move {
            let pending = invoke(&logic, &input);
            match pending.await {
                Ok(result) => Ok(emit(input, result)),
                Err(err) => {
                    report_failure(stage, &input, &err, logger.as_ref());
                    Ok(Vec::new())
                }
            }
        }
        .boxed()
    }
}
