use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation signal threaded through long-running DB calls.
///
/// The runner never cancels on its own behalf; it exists so an embedding
/// application can ask a migration, backfill, or Complete/Rollback pass to
/// stop between suspension points. Cancelling does not trigger an automatic
/// Rollback — per the concurrency model, that remains an explicit operator
/// action.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns an error if cancellation has been requested. Call between
    /// suspension points so long operations notice promptly.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("operation cancelled");
        }
        Ok(())
    }
}
