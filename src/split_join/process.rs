//! Per-item stages between split and join.
//!
//! Both stages skip items that already failed: a [`ProcessStage`] forwards
//! them as they are, a [`TransformStage`] forwards them with a default
//! payload of the new type and the original error.

use crate::error::{DataflowError, Result};
use crate::pipeline::error_sink::{report_failure, ErrorLogger, Payload};
use crate::pipeline::stages::{invoke, sync_fn, StageFn};
use crate::split_join::item::{ParentKey, SplitItem};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Runs a side effect for every split item. The payload is unchanged.
pub struct ProcessStage<P, I> {
    logic: StageFn<SplitItem<P, I>, ()>,
    error_logger: Option<ErrorLogger>,
}

impl<P: ParentKey, I: Payload> ProcessStage<P, I> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&P, &I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            logic: sync_fn(move |item: &SplitItem<P, I>| f(item.parent(), item.item())),
            error_logger: None,
        }
    }

    pub fn new_async<F, Fut>(f: F) -> Self
    where
        I: Clone,
        F: Fn(P, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            logic: Arc::new(move |item: &SplitItem<P, I>| {
                f(item.parent().clone(), item.item().clone()).boxed()
            }),
            error_logger: None,
        }
    }

    pub fn with_error_logger(mut self, logger: Option<ErrorLogger>) -> Self {
        self.error_logger = logger;
        self
    }

    /// Run the side effect and resolve the item's outcome.
    ///
    /// Only engine errors (an outcome resolved twice) are returned as `Err`.
    pub async fn process(&self, mut item: SplitItem<P, I>) -> Result<SplitItem<P, I>> {
        if item.is_failed() {
            return Ok(item);
        }
        item.begin_processing()?;

        let pending = invoke(&self.logic, &item);
        match pending.await {
            Ok(()) => item.mark_succeeded()?,
            Err(err) => {
                report_failure("process", item.item(), &err, self.error_logger.as_ref());
                item.mark_failed(err)?;
            }
        }
        Ok(item)
    }

    pub(crate) fn worker(
        self,
    ) -> impl Fn(SplitItem<P, I>) -> BoxFuture<'static, Result<Vec<SplitItem<P, I>>>>
           + Send
           + Sync
           + 'static {
        let stage = Arc::new(self);
        move |item| {
            let stage = Arc::clone(&stage);
            async move { Ok::<_, DataflowError>(vec![stage.process(item).await?]) }.boxed()
        }
    }
}

/// Maps every split item's payload to a new type.
pub struct TransformStage<P, I, O> {
    logic: StageFn<SplitItem<P, I>, O>,
    error_logger: Option<ErrorLogger>,
}

impl<P: ParentKey, I: Payload, O: Default + Send + 'static> TransformStage<P, I, O> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&P, &I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        Self {
            logic: sync_fn(move |item: &SplitItem<P, I>| f(item.parent(), item.item())),
            error_logger: None,
        }
    }

    pub fn new_async<F, Fut>(f: F) -> Self
    where
        I: Clone,
        F: Fn(P, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        Self {
            logic: Arc::new(move |item: &SplitItem<P, I>| {
                f(item.parent().clone(), item.item().clone()).boxed()
            }),
            error_logger: None,
        }
    }

    pub fn with_error_logger(mut self, logger: Option<ErrorLogger>) -> Self {
        self.error_logger = logger;
        self
    }

    /// Transform the payload, keeping parent and sibling count.
    ///
    /// A failed item, or one whose transform fails, carries `O::default()`.
    pub async fn transform(&self, mut item: SplitItem<P, I>) -> Result<SplitItem<P, O>> {
        if item.is_failed() {
            return Ok(item.rewrap(O::default()));
        }
        item.begin_processing()?;

        let pending = invoke(&self.logic, &item);
        match pending.await {
            Ok(output) => {
                let mut next = item.rewrap(output);
                next.mark_succeeded()?;
                Ok(next)
            }
            Err(err) => {
                report_failure("transform", item.item(), &err, self.error_logger.as_ref());
                let mut next = item.rewrap(O::default());
                next.mark_failed(err)?;
                Ok(next)
            }
        }
    }

    pub(crate) fn worker(
        self,
    ) -> impl Fn(SplitItem<P, I>) -> BoxFuture<'static, Result<Vec<SplitItem<P, O>>>>
           + Send
           + Sync
           + 'static {
        let stage = Arc::new(self);
        move |item| {
            let stage = Arc::clone(&stage);
            async move { Ok::<_, DataflowError>(vec![stage.transform(item).await?]) }.boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ErrorSink, SharedError};
    use crate::split_join::item::ItemOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fan(parent: &str) -> Vec<SplitItem<String, char>> {
        SplitItem::fan_out(parent.to_string(), parent.chars().collect())
    }

    /// An item that keeps its own failures.
    #[derive(Debug, Clone)]
    struct Ticket {
        id: u32,
        errors: Arc<Mutex<Vec<String>>>,
    }

    impl ErrorSink for Ticket {
        fn on_error(&self, error: &anyhow::Error) -> bool {
            self.errors.lock().unwrap().push(error.to_string());
            true
        }
    }

    fn tickets(ids: &[u32]) -> (Vec<SplitItem<String, Ticket>>, Arc<Mutex<Vec<String>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let items = ids
            .iter()
            .map(|&id| Ticket {
                id,
                errors: errors.clone(),
            })
            .collect();
        (SplitItem::fan_out("batch".to_string(), items), errors)
    }

    fn counting_logger() -> (ErrorLogger, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let logger: ErrorLogger = Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (logger, calls)
    }

    #[tokio::test]
    async fn test_process_failure_marks_item() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let logger: ErrorLogger = Arc::new(move |err, item| {
            sink.lock().unwrap().push(format!("{item:?}: {err}"));
        });
        let stage = ProcessStage::new(|_: &String, c: &char| {
            anyhow::ensure!(*c != 'b', "no b allowed");
            Ok(())
        })
        .with_error_logger(Some(logger));

        let mut items = fan("bc");
        let c = stage.process(items.pop().unwrap()).await.unwrap();
        let b = stage.process(items.pop().unwrap()).await.unwrap();

        assert!(matches!(c.outcome(), ItemOutcome::Succeeded));
        assert_eq!(b.error().unwrap().to_string(), "no b allowed");
        assert_eq!(seen.lock().unwrap().as_slice(), ["'b': no b allowed"]);
    }

    #[tokio::test]
    async fn test_failed_item_bypasses_process() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stage = ProcessStage::new(move |_: &String, _: &char| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut item = fan("x").pop().unwrap();
        let err: SharedError = Arc::new(anyhow::anyhow!("earlier"));
        item.mark_failed(err.clone()).unwrap();

        let item = stage.process(item).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(Arc::ptr_eq(item.error().unwrap(), &err));
    }

    #[tokio::test]
    async fn test_successive_process_stages() {
        let first = ProcessStage::new(|_: &String, _: &char| Ok(()));
        let second = ProcessStage::new(|_: &String, _: &char| Ok(()));

        let item = fan("a").pop().unwrap();
        let item = first.process(item).await.unwrap();
        let item = second.process(item).await.unwrap();
        assert!(matches!(item.outcome(), ItemOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_transform_changes_payload() {
        let stage = TransformStage::new(|parent: &String, c: &char| Ok(format!("{parent}:{c}")));
        let item = stage.transform(fan("ab").remove(1)).await.unwrap();
        assert_eq!(item.item(), "ab:b");
        assert_eq!(item.sibling_count(), 2);
        assert!(matches!(item.outcome(), ItemOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_transform_forwards_failure_with_default() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stage = TransformStage::new(move |_: &String, c: &char| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(*c as u32)
        });

        let mut item = fan("z").pop().unwrap();
        let err: SharedError = Arc::new(anyhow::anyhow!("process failed"));
        item.mark_failed(err.clone()).unwrap();

        let out = stage.transform(item).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(*out.item(), 0);
        assert!(Arc::ptr_eq(out.error().unwrap(), &err));
    }

    #[tokio::test]
    async fn test_async_transform_panic_becomes_failure() {
        let stage: TransformStage<String, char, String> =
            TransformStage::new_async(|_: String, c: char| async move {
                assert!(c != 'q', "q is cursed");
                Ok(c.to_string())
            });
        let out = stage.transform(fan("q").pop().unwrap()).await.unwrap();
        assert!(out.is_failed());
        assert!(out.item().is_empty());
    }

    #[tokio::test]
    async fn test_process_failure_consumed_by_item() {
        let (logger, logged) = counting_logger();
        let stage = ProcessStage::new(|_: &String, ticket: &Ticket| {
            anyhow::ensure!(ticket.id != 7, "ticket {} is void", ticket.id);
            Ok(())
        })
        .with_error_logger(Some(logger));

        let (items, errors) = tickets(&[6, 7]);
        for item in items {
            stage.process(item).await.unwrap();
        }

        assert_eq!(errors.lock().unwrap().as_slice(), ["ticket 7 is void"]);
        assert_eq!(logged.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transform_failure_consumed_by_item() {
        let (logger, logged) = counting_logger();
        let stage = TransformStage::new(|_: &String, ticket: &Ticket| {
            anyhow::ensure!(ticket.id % 2 == 0, "odd ticket {}", ticket.id);
            Ok(ticket.id / 2)
        })
        .with_error_logger(Some(logger));

        let (items, errors) = tickets(&[4, 5]);
        let mut outputs = Vec::new();
        for item in items {
            outputs.push(stage.transform(item).await.unwrap());
        }

        assert_eq!(*outputs[0].item(), 2);
        assert!(outputs[1].is_failed());
        assert_eq!(errors.lock().unwrap().as_slice(), ["odd ticket 5"]);
        assert_eq!(logged.load(Ordering::SeqCst), 0);
    }
}
