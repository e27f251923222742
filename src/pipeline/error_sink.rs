//! Failure routing for stage payloads.
//!
//! When user logic fails for an item, the stage offers the error to the item
//! itself first ([`ErrorSink`]). If the item does not consume it, the stage's
//! [`ErrorLogger`] is called. With neither, the failure is only recorded on the
//! item (split/join stages) or the item is dropped (linear stages).

use std::fmt;
use std::sync::Arc;

/// An item-level failure, shared between the failed item, the join result
/// and whoever inspects it afterwards.
pub type SharedError = Arc<anyhow::Error>;

/// Fallback receiver for failures: `(error, failing payload)`.
pub type ErrorLogger = Arc<dyn Fn(&anyhow::Error, &dyn fmt::Debug) + Send + Sync>;

/// Capability of a payload type to receive its own failures.
///
/// Every type flowing through a stage that runs user logic must implement
/// this trait; the default implementation declines every error so that it
/// falls through to the stage's [`ErrorLogger`].
///
/// ```ignore
/// struct Job { errors: Mutex<Vec<String>> }
///
/// impl ErrorSink for Job {
///     fn on_error(&self, error: &anyhow::Error) -> bool {
///         self.errors.lock().unwrap().push(error.to_string());
///         true
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait ErrorSink {
    /// Offer a failure to the payload. Returns `true` when it was consumed.
    fn on_error(&self, _error: &anyhow::Error) -> bool {
        false
    }
}

/// Types that can flow through stages running user logic.
pub trait Payload: ErrorSink + fmt::Debug + Send + 'static {}

impl<T> Payload for T where T: ErrorSink + fmt::Debug + Send + 'static {}

macro_rules! decline_errors {
    ($($ty:ty),* $(,)?) => {
        $(impl ErrorSink for $ty {})*
    };
}

decline_errors!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    String, &'static str, std::path::PathBuf, std::time::Duration,
);

impl<T> ErrorSink for Vec<T> {}

impl<T> ErrorSink for std::collections::VecDeque<T> {}

impl<K, V> ErrorSink for std::collections::HashMap<K, V> {}

impl<K, V> ErrorSink for std::collections::BTreeMap<K, V> {}

impl<A, B> ErrorSink for (A, B) {}

impl<A, B, C> ErrorSink for (A, B, C) {}

impl<T: ErrorSink + ?Sized> ErrorSink for Box<T> {
    fn on_error(&self, error: &anyhow::Error) -> bool {
        (**self).on_error(error)
    }
}

impl<T: ErrorSink + ?Sized> ErrorSink for Arc<T> {
    fn on_error(&self, error: &anyhow::Error) -> bool {
        (**self).on_error(error)
    }
}

impl<T: ErrorSink> ErrorSink for Option<T> {
    fn on_error(&self, error: &anyhow::Error) -> bool {
        self.as_ref().is_some_and(|inner| inner.on_error(error))
    }
}

/// Logger that forwards failures to `tracing` at warn level.
pub fn tracing_error_logger() -> ErrorLogger {
    Arc::new(|error, payload| {
        tracing::warn!("Item {:?} failed: {:#}", payload, error);
    })
}

/// Route a failure: payload first, then the logger, then only a debug trace.
pub(crate) fn report_failure<T>(
    stage: &'static str,
    payload: &T,
    error: &anyhow::Error,
    logger: Option<&ErrorLogger>,
) where
    T: ErrorSink + fmt::Debug + ?Sized,
{
    if payload.on_error(error) {
        return;
    }
    match logger {
        Some(logger) => logger(error, &payload),
        None => tracing::debug!(stage, "Unhandled failure for {:?}: {:#}", payload, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_logger() -> (ErrorLogger, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let logger: ErrorLogger = Arc::new(move |error, payload| {
            sink.lock()
                .unwrap()
                .push(format!("{:?}: {}", payload, error));
        });
        (logger, seen)
    }

    #[test]
    fn test_payload_consumes_error() {
        let mut sink = MockErrorSink::new();
        sink.expect_on_error().times(1).return_const(true);
        let (logger, seen) = recording_logger();

        report_failure("test", &sink, &anyhow::anyhow!("boom"), Some(&logger));

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_declined_error_reaches_logger() {
        let mut sink = MockErrorSink::new();
        sink.expect_on_error().times(1).return_const(false);
        let (logger, seen) = recording_logger();

        report_failure("test", &sink, &anyhow::anyhow!("boom"), Some(&logger));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].ends_with(": boom"));
    }

    #[test]
    fn test_no_logger_swallows() {
        report_failure("test", &'x', &anyhow::anyhow!("boom"), None);
    }

    #[test]
    fn test_std_types_decline() {
        let err = anyhow::anyhow!("boom");
        assert!(!"text".to_string().on_error(&err));
        assert!(!42u32.on_error(&err));
        assert!(!vec![1, 2, 3].on_error(&err));
        assert!(!None::<String>.on_error(&err));
    }

    #[test]
    fn test_wrappers_delegate() {
        let mut sink = MockErrorSink::new();
        sink.expect_on_error().times(2).return_const(true);
        let shared = Arc::new(sink);
        let err = anyhow::anyhow!("boom");

        assert!(shared.on_error(&err));
        assert!(Some(shared.clone()).on_error(&err));
    }
}
