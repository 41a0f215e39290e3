use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// upper bound on how long a blocked waiter sleeps before re-checking an [`Interrupt`]
pub(crate) const INTERRUPT_POLL: Duration = Duration::from_millis(20);

/// A cooperative interrupt flag shared between the thread that blocks and the threads that
/// may want it to stop blocking.
///
/// Once raised the flag stays raised: every later blocking wait that observes it returns
/// [`StoreError::Interrupted`] immediately, so the interrupted status is never lost.
///
/// [`StoreError::Interrupted`]: ./enum.StoreError.html
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// creates a flag that is not raised
    pub fn new() -> Self {
        Interrupt::default()
    }

    /// raises the flag
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// whether the flag has been raised
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
