use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DkError, DkResult};

/// Cooperative cancellation flag shared between a host and an orchestrator.
///
/// Orchestrators poll it between entries; cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(DkError::Cancelled)` once `cancel` has been called.
    pub fn check(&self) -> DkResult<()> {
        if self.is_cancelled() {
            Err(DkError::Cancelled)
        } else {
            Ok(())
        }
    }
}
