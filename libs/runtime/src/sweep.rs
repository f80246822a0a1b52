//! Sweep reports for best-effort bulk operations.
//!
//! `kill_all_nodes` and `unregister_all_virtual_nodes` visit every element
//! and commit each independently; a failure on one never stops the rest.

use crate::RuntimeError;
use std::fmt;

/// One element that could not be cleaned up
#[derive(Debug)]
pub struct SweepFailure {
    pub target: String,
    pub error: RuntimeError,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub attempted: usize,
    pub succeeded: Vec<String>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, target: impl Into<String>) {
        self.attempted += 1;
        self.succeeded.push(target.into());
    }

    pub fn record_failure(&mut self, target: impl Into<String>, error: RuntimeError) {
        self.attempted += 1;
        self.failures.push(SweepFailure {
            target: target.into(),
            error,
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempted, {} succeeded, {} failed",
            self.attempted,
            self.succeeded.len(),
            self.failures.len()
        )
    }
}
