//! Warning bookkeeping
//!
//! Recoverable problems (for example unwatching a watcher that was never
//! registered) are reported through a [`Diagnostics`] value owned by a
//! [`Context`](crate::context::Context) instead of process-wide counters, so
//! independent contexts never see each other's warnings.

use std::cell::Cell;

use crate::error::{ParamError, Result};

/// Counts warnings and optionally promotes them to errors.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Cell<usize>,
    warnings_as_errors: Cell<bool>,
}

impl Diagnostics {
    /// Create an empty diagnostics record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a recoverable problem.
    ///
    /// The warning is logged through `tracing` and counted. When warnings are
    /// configured to be errors, [`ParamError::Warning`] is returned instead.
    pub fn warn(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        if self.warnings_as_errors.get() {
            return Err(ParamError::Warning(message));
        }
        self.warnings.set(self.warnings.get() + 1);
        tracing::warn!("{}", message);
        Ok(())
    }

    /// Number of warnings reported since creation or the last [`reset`](Self::reset).
    pub fn warning_count(&self) -> usize {
        self.warnings.get()
    }

    pub fn warnings_as_errors(&self) -> bool {
        self.warnings_as_errors.get()
    }

    pub fn set_warnings_as_errors(&self, enabled: bool) {
        self.warnings_as_errors.set(enabled);
    }

    /// Clear the warning counter.
    pub fn reset(&self) {
        self.warnings.set(0);
    }
}
