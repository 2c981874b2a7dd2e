use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::{Error, Result};

/// Checked at every suspension point enumerated in `spec.md` §5: between
/// scan iterations, predicate tasks, result batches, BFS depth levels,
/// Morton range intervals, and ANN expansion steps.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled())
        } else {
            Ok(())
        }
    }
}

/// A monotonic-clock deadline checked alongside the cancellation token.
#[derive(Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(d: Duration) -> Self {
        Deadline { at: Instant::now() + d }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            Err(Error::new(crate::core::error::ErrorKind::Cancelled, "deadline exceeded"))
        } else {
            Ok(())
        }
    }
}

/// Bundles both suspension-point checks an execution context threads
/// through scans, BFS, and ANN expansion.
#[derive(Clone)]
pub struct ExecutionContext {
    pub token: CancellationToken,
    pub deadline: Option<Deadline>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        ExecutionContext { token: CancellationToken::new(), deadline: None }
    }
}

impl ExecutionContext {
    pub fn with_deadline(d: Duration) -> Self {
        ExecutionContext { token: CancellationToken::new(), deadline: Some(Deadline::after(d)) }
    }

    pub fn check(&self) -> Result<()> {
        self.token.check()?;
        if let Some(d) = &self.deadline {
            d.check()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_propagates() {
        let ctx = ExecutionContext::default();
        assert!(ctx.check().is_ok());
        ctx.token.cancel();
        assert!(ctx.check().is_err());
    }

    #[test]
    fn deadline_expires() {
        let ctx = ExecutionContext::with_deadline(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.check().is_err());
    }
}
