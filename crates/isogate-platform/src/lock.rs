//! Recursive execution lock.
//!
//! The owning thread may re-acquire the lock any number of times; other
//! threads either block until it is fully released or fail fast with
//! [`RecursiveLock::try_lock`].

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Debug)]
struct Ownership {
    /// Thread currently holding the lock
    owner: Option<ThreadId>,
    /// Number of nested acquisitions by the owner
    depth: usize,
}

/// A mutex that supports try-lock, recursive acquisition by the owning
/// thread, and blocking acquisition by others.
#[derive(Debug)]
pub struct RecursiveLock {
    state: Mutex<Ownership>,
    released: Condvar,
}

impl RecursiveLock {
    /// Create an unlocked lock.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Ownership {
                owner: None,
                depth: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Acquire the lock, blocking while another thread holds it.
    pub fn lock(&self) -> RecursiveLockGuard<'_> {
        let me = thread::current().id();
        let mut state = self.ownership();

        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }

        RecursiveLockGuard::new(self, state.depth)
    }

    /// Acquire the lock only if it is free or already held by this thread.
    pub fn try_lock(&self) -> Option<RecursiveLockGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.ownership();

        match state.owner {
            None => {
                state.owner = Some(me);
                state.depth = 1;
            }
            Some(owner) if owner == me => state.depth += 1,
            Some(_) => return None,
        }

        Some(RecursiveLockGuard::new(self, state.depth))
    }

    /// Check whether the calling thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.ownership().owner == Some(thread::current().id())
    }

    /// Check whether any thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.ownership().owner.is_some()
    }

    fn unlock(&self) {
        let mut state = self.ownership();
        debug_assert_eq!(state.owner, Some(thread::current().id()));

        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_one();
        }
    }

    fn ownership(&self) -> MutexGuard<'_, Ownership> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RecursiveLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped ownership of a [`RecursiveLock`]. Released on drop.
///
/// Guards are tied to the acquiring thread and cannot be sent elsewhere.
#[derive(Debug)]
pub struct RecursiveLockGuard<'a> {
    lock: &'a RecursiveLock,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl<'a> RecursiveLockGuard<'a> {
    fn new(lock: &'a RecursiveLock, depth: usize) -> Self {
        Self {
            lock,
            depth,
            _not_send: PhantomData,
        }
    }

    /// Nesting depth of this acquisition (1 for the outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether this guard is the outermost acquisition on its thread.
    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }
}

impl Drop for RecursiveLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_recursive_acquisition() {
        let lock = RecursiveLock::new();

        let outer = lock.lock();
        assert!(outer.is_outermost());

        let inner = lock.try_lock().unwrap();
        assert_eq!(inner.depth(), 2);
        assert!(lock.is_held_by_current_thread());

        drop(inner);
        assert!(lock.is_locked());

        drop(outer);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_try_lock_fails_for_other_threads() {
        let lock = Arc::new(RecursiveLock::new());
        let guard = lock.lock();

        let other = Arc::clone(&lock);
        let acquired = std::thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!acquired);

        drop(guard);
    }

    #[test]
    fn test_blocking_acquisition_waits_for_release() {
        let lock = Arc::new(RecursiveLock::new());
        let (tx, rx) = unbounded();
        let guard = lock.lock();

        let other = Arc::clone(&lock);
        let handle = std::thread::spawn(move || {
            let guard = other.lock();
            tx.send(guard.depth()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        drop(guard);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
        handle.join().unwrap();
    }
}
