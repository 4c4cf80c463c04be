//! Isolate scope: holding the execution lock.
//!
//! Entering marks the isolate as current on the calling thread. The
//! outermost scope on a thread drains the locked-call queue on entry and
//! again on exit, so work submitted while the isolate was busy runs as soon
//! as the lock changes hands.

use crate::controller::IsolateController;
use isogate_engine::EngineHandle;
use isogate_platform::RecursiveLockGuard;
use std::cell::RefCell;

thread_local! {
    /// Isolates entered on this thread, innermost last
    static CURRENT_ENGINES: RefCell<Vec<EngineHandle>> = const { RefCell::new(Vec::new()) };
}

/// The isolate the calling thread is currently running inside, if any.
pub fn current_engine() -> Option<EngineHandle> {
    CURRENT_ENGINES.with(|current| current.borrow().last().copied())
}

/// Scoped ownership of an isolate's execution lock.
pub struct IsolateScope<'a> {
    controller: &'a IsolateController,
    guard: RecursiveLockGuard<'a>,
}

impl<'a> IsolateScope<'a> {
    fn new(controller: &'a IsolateController, guard: RecursiveLockGuard<'a>) -> Self {
        CURRENT_ENGINES.with(|current| current.borrow_mut().push(controller.handle()));

        let scope = Self { controller, guard };
        if scope.guard.is_outermost() {
            controller.process_call_queue();
        }
        scope
    }

    /// Nesting depth on this thread (1 for the outermost scope).
    pub fn depth(&self) -> usize {
        self.guard.depth()
    }
}

impl Drop for IsolateScope<'_> {
    fn drop(&mut self) {
        if self.guard.is_outermost() {
            self.controller.process_call_queue();
        }
        CURRENT_ENGINES.with(|current| {
            current.borrow_mut().pop();
        });
    }
}

impl IsolateController {
    /// Enter the isolate, blocking while another thread is inside it.
    pub fn enter(&self) -> IsolateScope<'_> {
        IsolateScope::new(self, self.lock.lock())
    }

    /// Enter the isolate only if no other thread is inside it.
    pub fn try_enter(&self) -> Option<IsolateScope<'_>> {
        self.lock
            .try_lock()
            .map(|guard| IsolateScope::new(self, guard))
    }

    /// Check whether the calling thread is inside this isolate.
    pub fn is_entered_by_current_thread(&self) -> bool {
        self.lock.is_held_by_current_thread()
    }
}
