//! Per-operation context: which database the operation is bound to and a
//! cooperative interrupt flag checked between documents.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, StoreError};

/// Identity and cancellation state of one logical operation.
///
/// The interrupt flag is shared; clone [`OperationContext::interrupt_handle`]
/// into another thread to cancel a long-running maintenance operation
/// cooperatively.
#[derive(Debug, Clone)]
pub struct OperationContext {
    db_name: String,
    root: PathBuf,
    interrupt: Arc<AtomicBool>,
}

impl OperationContext {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(db_name: S, root: P) -> Self {
        Self {
            db_name: db_name.into(),
            root: root.into(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared handle to the interrupt flag; storing `true` cancels the
    /// operation at its next check point.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn check_for_interrupt(&self) -> Result<()> {
        if self.is_interrupted() {
            return Err(StoreError::Interrupted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_propagates_through_shared_handle() {
        let ctx = OperationContext::new("app", "/data");
        assert!(ctx.check_for_interrupt().is_ok());

        ctx.interrupt_handle().store(true, Ordering::SeqCst);
        assert!(matches!(
            ctx.check_for_interrupt(),
            Err(StoreError::Interrupted)
        ));
    }
}
