//! Built-in stage kinds.
//!
//! User logic of every stage is normalized to a [`StageFn`]: a shared
//! function from a borrowed input to a boxed `'static` future. Synchronous
//! functions run when the future is created, asynchronous ones receive a
//! clone of the input. Either way the call happens inside the stage worker.

pub mod batch;
pub mod linear;

pub use batch::run_batch;
pub use linear::{linear_worker, Emit};

use crate::pipeline::executor::{guarded, panic_message};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Normalized user logic of a stage.
pub type StageFn<T, R> = Arc<dyn Fn(&T) -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync>;

/// Wrap a synchronous function.
pub fn sync_fn<T, R, F>(f: F) -> StageFn<T, R>
where
    T: 'static,
    R: Send + 'static,
    F: Fn(&T) -> anyhow::Result<R> + Send + Sync + 'static,
{
    Arc::new(move |input: &T| future::ready(f(input)).boxed())
}

/// Wrap an asynchronous function taking its input by value.
pub fn async_fn<T, R, F, Fut>(f: F) -> StageFn<T, R>
where
    T: Clone + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    Arc::new(move |input: &T| f(input.clone()).boxed())
}

/// Start `logic` for `input`. Panics, whether raised by the call itself or
/// while the returned future is polled, come back as `Err`.
pub fn invoke<T, R>(logic: &StageFn<T, R>, input: &T) -> BoxFuture<'static, anyhow::Result<R>>
where
    R: Send + 'static,
{
    match std::panic::catch_unwind(AssertUnwindSafe(|| logic(input))) {
        Ok(pending) => guarded(pending).boxed(),
        Err(panic) => {
            let err = anyhow::anyhow!("panicked: {}", panic_message(&*panic));
            future::ready(Err(err)).boxed()
        }
    }
}
