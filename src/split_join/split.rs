//! Fan-out stage: one parent in, one [`SplitItem`] per derived item out.

use crate::error::Result;
use crate::pipeline::error_sink::{report_failure, ErrorLogger, Payload};
use crate::pipeline::stages::{async_fn, invoke, sync_fn, StageFn};
use crate::split_join::item::{ParentKey, SplitItem};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Splits parents into sibling groups.
///
/// A failing split function never fails the dataflow: the error goes to the
/// parent's [`ErrorSink`](crate::pipeline::ErrorSink), else to the error
/// logger, and the parent produces no items.
pub struct SplitStage<P, I> {
    logic: StageFn<P, Vec<I>>,
    error_logger: Option<ErrorLogger>,
}

impl<P: ParentKey, I: Payload> SplitStage<P, I> {
    pub fn new<F, R>(f: F) -> Self
    where
        F: Fn(&P) -> anyhow::Result<R> + Send + Sync + 'static,
        R: IntoIterator<Item = I>,
    {
        Self {
            logic: sync_fn(move |parent: &P| Ok(f(parent)?.into_iter().collect::<Vec<I>>())),
            error_logger: None,
        }
    }

    pub fn new_async<F, Fut, R>(f: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: IntoIterator<Item = I>,
    {
        Self {
            logic: async_fn(move |parent: P| {
                let pending = f(parent);
                async move {
                    Ok::<_, anyhow::Error>(pending.await?.into_iter().collect::<Vec<I>>())
                }
            }),
            error_logger: None,
        }
    }

    pub fn with_error_logger(mut self, logger: Option<ErrorLogger>) -> Self {
        self.error_logger = logger;
        self
    }

    /// Split one parent. Returns no items when the split fails or is empty.
    pub async fn split(&self, parent: P) -> Vec<SplitItem<P, I>> {
        let pending = invoke(&self.logic, &parent);
        match pending.await {
            Ok(items) => {
                if items.is_empty() {
                    tracing::trace!("Split of {:?} produced no items", parent);
                }
                SplitItem::fan_out(parent, items)
            }
            Err(err) => {
                report_failure("split", &parent, &err, self.error_logger.as_ref());
                Vec::new()
            }
        }
    }

    pub(crate) fn worker(
        self,
    ) -> impl Fn(P) -> BoxFuture<'static, Result<Vec<SplitItem<P, I>>>> + Send + Sync + 'static {
        let stage = Arc::new(self);
        move |parent: P| {
            let stage = Arc::clone(&stage);
            async move { Ok(stage.split(parent).await) }.boxed()
        }
    }

    /// Like [`worker`](Self::worker), for parents that may be absent. An
    /// absent parent produces no items and no error.
    pub(crate) fn optional_worker(
        self,
    ) -> impl Fn(Option<P>) -> BoxFuture<'static, Result<Vec<SplitItem<P, I>>>>
           + Send
           + Sync
           + 'static {
        let stage = Arc::new(self);
        move |parent: Option<P>| {
            let stage = Arc::clone(&stage);
            async move {
                Ok(match parent {
                    Some(parent) => stage.split(parent).await,
                    None => Vec::new(),
                })
            }
            .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ErrorSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Order(u32);

    static ORDER_ERRORS: AtomicUsize = AtomicUsize::new(0);

    impl ErrorSink for Order {
        fn on_error(&self, _error: &anyhow::Error) -> bool {
            ORDER_ERRORS.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn test_split_tags_sibling_count() {
        let stage = SplitStage::new(|s: &String| Ok(s.chars().collect::<Vec<_>>()));
        let items = stage.split("ccc".to_string()).await;
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.sibling_count() == 3 && i.parent() == "ccc"));
    }

    #[tokio::test]
    async fn test_empty_split_emits_nothing() {
        let stage = SplitStage::new(|s: &String| Ok(s.chars().collect::<Vec<_>>()));
        assert!(stage.split(String::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_split_failure_goes_to_parent() {
        let stage: SplitStage<Order, u32> = SplitStage::new(|order: &Order| {
            anyhow::ensure!(order.0 > 0, "empty order");
            Ok(0..order.0)
        });

        assert!(stage.split(Order(0)).await.is_empty());
        assert_eq!(ORDER_ERRORS.load(Ordering::SeqCst), 1);
        assert_eq!(stage.split(Order(2)).await.len(), 2);
    }

    #[tokio::test]
    async fn test_async_split_panic_is_contained() {
        let stage: SplitStage<String, char> = SplitStage::new_async(|s: String| async move {
            assert!(!s.is_empty(), "nothing to split");
            Ok(s.chars().collect::<Vec<_>>())
        });
        assert!(stage.split(String::new()).await.is_empty());
        assert_eq!(stage.split("ab".to_string()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_optional_worker_skips_absent_parent() {
        let worker =
            SplitStage::new(|s: &String| Ok(s.chars().collect::<Vec<_>>())).optional_worker();
        assert!(worker(None).await.unwrap().is_empty());
        assert_eq!(worker(Some("xy".to_string())).await.unwrap().len(), 2);
    }
}
