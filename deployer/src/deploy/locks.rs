//! Per-stack mutual exclusion

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Named locks keyed by stack, created on first use and kept for the
/// lifetime of the process.
#[derive(Default)]
pub struct StackLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StackLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, stack: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(stack.to_string()).or_default().clone()
    }

    /// Wait until no other pipeline holds `stack`.
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn acquire(&self, stack: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(stack);
        if let Ok(guard) = lock.clone().try_lock_owned() {
            return guard;
        }
        debug!("Stack {} is being deployed, waiting for the running pipeline", stack);
        lock.lock_owned().await
    }

    /// True while a pipeline holds `stack`
    pub fn is_locked(&self, stack: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(stack)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of stacks seen so far
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
