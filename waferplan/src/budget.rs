//! Cancellation and deadline tracking for long-running operations.
//!
//! Every parser, execution, and validation call takes an [`OpBudget`].
//! Parsers check it at record boundaries, the execution engine between
//! rules, and the validator between candidate points; partial results are
//! discarded when the budget is exhausted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BudgetExceeded {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation {operation} exceeded its {limit_ms} ms limit")]
    Timeout { operation: String, limit_ms: u64 },
}

/// A shared flag used to request cancellation of an in-flight operation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// The per-call budget: an optional cancellation token plus an optional
/// wall-clock deadline.
#[derive(Debug, Clone)]
pub struct OpBudget {
    operation: &'static str,
    cancel: Option<CancelToken>,
    started: Instant,
    limit: Option<Duration>,
}

impl OpBudget {
    /// An unbounded budget. Useful for tests and internal callers.
    pub fn unlimited(operation: &'static str) -> Self {
        Self {
            operation,
            cancel: None,
            started: Instant::now(),
            limit: None,
        }
    }

    /// A budget with a wall-clock limit starting now.
    pub fn with_timeout(operation: &'static str, limit: Duration) -> Self {
        Self {
            operation,
            cancel: None,
            started: Instant::now(),
            limit: Some(limit),
        }
    }

    /// Attaches a cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Checks the budget, returning an error once cancelled or past the
    /// deadline.
    pub fn check(&self) -> Result<(), BudgetExceeded> {
        if let Some(cancel) = &self.cancel {
            if cancel.is_cancelled() {
                return Err(BudgetExceeded::Cancelled);
            }
        }
        if let Some(limit) = self.limit {
            if self.started.elapsed() > limit {
                return Err(BudgetExceeded::Timeout {
                    operation: self.operation.to_string(),
                    limit_ms: limit.as_millis() as u64,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_trips_check() {
        let token = CancelToken::new();
        let budget = OpBudget::unlimited("parse").with_cancel(token.clone());
        assert!(budget.check().is_ok());
        token.cancel();
        assert_eq!(budget.check(), Err(BudgetExceeded::Cancelled));
    }

    #[test]
    fn elapsed_deadline_times_out() {
        let budget = OpBudget::with_timeout("simulate", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        match budget.check() {
            Err(BudgetExceeded::Timeout { operation, .. }) => assert_eq!(operation, "simulate"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
