//! Recording helpers standing in for loggers and downstream consumers

use crossbeam_channel::{unbounded, Receiver, Sender};
use dataflow_rs::ErrorLogger;
use std::sync::{Arc, Mutex};

/// An error logger that records `"{payload:?}: {error}"` lines
pub fn recording_logger() -> (ErrorLogger, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let logger: ErrorLogger = Arc::new(move |error, payload| {
        sink.lock().unwrap().push(format!("{:?}: {}", payload, error));
    });
    (logger, seen)
}

/// A channel collecting values emitted from stage callbacks
pub fn collector<T>() -> (Sender<T>, Receiver<T>) {
    unbounded()
}

/// Everything currently buffered in `rx`
pub fn drain<T>(rx: &Receiver<T>) -> Vec<T> {
    rx.try_iter().collect()
}
