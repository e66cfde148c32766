//! Process-wide exclusive flag serializing imports and purges.
//!
//! The lock never blocks: a contended `try_acquire` fails immediately and the caller
//! reports the operation as busy. Holders get an [`ImportLockGuard`] that clears the
//! flag when dropped, so every exit path (including `?` and panics) releases it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct ImportLock {
    busy: Arc<AtomicBool>,
}

impl ImportLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically flip the flag from free to busy.
    ///
    /// Returns `None` when another operation already holds it.
    pub fn try_acquire(&self) -> Option<ImportLockGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ImportLockGuard { lock: self.clone() })
    }

    /// Unconditionally clear the flag.
    ///
    /// Guards call this on drop; calling it directly is only meant for recovering a
    /// flag left set by an operation that can no longer release it.
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of exclusive access; releases the lock exactly once on drop.
#[derive(Debug)]
pub struct ImportLockGuard {
    lock: ImportLock,
}

impl Drop for ImportLockGuard {
    fn drop(&mut self) {
        self.lock.release();
        log::trace!("import lock released");
    }
}
