//! Status reporting for long-running, multi-step operations
//!
//! Library code reports progress through [`Reporter`] so the CLI can render
//! it for humans while tests and non-interactive callers fall back to
//! structured logs.

use std::sync::Arc;

use tracing::{info, warn};

/// Sink for step-by-step progress of an operation
pub trait Reporter: Send + Sync {
    /// A new step started; any step still open is considered finished
    fn start(&self, message: &str);

    /// The current step (or a sub-step) succeeded
    fn success(&self, message: &str);

    /// Something noteworthy but non-fatal happened
    fn warning(&self, message: &str);

    /// The current step failed
    fn failure(&self, message: &str);

    /// Close the current step without a dedicated message
    fn end(&self);
}

/// Reporter that emits tracing events
#[derive(Clone, Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn start(&self, message: &str) {
        info!(status = "start", "{}", message);
    }

    fn success(&self, message: &str) {
        info!(status = "success", "{}", message);
    }

    fn warning(&self, message: &str) {
        warn!(status = "warning", "{}", message);
    }

    fn failure(&self, message: &str) {
        warn!(status = "failure", "{}", message);
    }

    fn end(&self) {}
}

/// Reporter that prefixes every message with a scope, e.g. a cluster name
#[derive(Clone)]
pub struct ScopedReporter {
    scope: String,
    inner: Arc<dyn Reporter>,
}

impl ScopedReporter {
    /// Wrap `inner`, prefixing messages with `[scope]`
    pub fn new(scope: impl Into<String>, inner: Arc<dyn Reporter>) -> Self {
        Self {
            scope: scope.into(),
            inner,
        }
    }

    fn scoped(&self, message: &str) -> String {
        format!("[{}] {}", self.scope, message)
    }
}

impl Reporter for ScopedReporter {
    fn start(&self, message: &str) {
        self.inner.start(&self.scoped(message));
    }

    fn success(&self, message: &str) {
        self.inner.success(&self.scoped(message));
    }

    fn warning(&self, message: &str) {
        self.inner.warning(&self.scoped(message));
    }

    fn failure(&self, message: &str) {
        self.inner.failure(&self.scoped(message));
    }

    fn end(&self) {
        self.inner.end();
    }
}
