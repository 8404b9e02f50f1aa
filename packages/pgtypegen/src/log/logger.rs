use std::sync::{Arc, Mutex};
use tracing::{error, warn};

///
/// Sink for user-facing diagnostics.
///
/// Warnings are non-fatal issues (a degraded type, an unscannable file).
/// Errors are per-file or per-query failures that were skipped.
///
pub trait Logger: Send + Sync {
    fn warn(&self, message: &str);

    fn error(&self, message: &str);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn warn(&self, message: &str) {
        warn!(msg = message);
    }

    fn error(&self, message: &str) {
        error!(msg = message);
    }
}

/// Keeps every message so callers can assert on them
#[derive(Clone, Debug, Default)]
pub struct RecordingLogger {
    warnings: Arc<Mutex<Vec<String>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut w) = self.warnings.lock() {
            w.clear();
        }
        if let Ok(mut e) = self.errors.lock() {
            e.clear();
        }
    }
}

impl Logger for RecordingLogger {
    fn warn(&self, message: &str) {
        if let Ok(mut w) = self.warnings.lock() {
            w.push(message.to_owned());
        }
    }

    fn error(&self, message: &str) {
        if let Ok(mut e) = self.errors.lock() {
            e.push(message.to_owned());
        }
    }
}
