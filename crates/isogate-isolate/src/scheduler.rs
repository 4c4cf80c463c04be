//! Locked-call scheduler.
//!
//! Any thread may submit a closure that must run with the execution lock
//! held. Closures run in submission order on whichever thread next drains
//! the queue: the thread running the message loop, the thread leaving the
//! outermost isolate scope, or the engine's interrupt at its next safe
//! point.

use crate::controller::IsolateController;
use isogate_platform::panic_message;
use std::collections::VecDeque;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

/// A closure run with the execution lock held.
pub type LockedCall = Box<dyn FnOnce(&IsolateController) + Send + 'static>;

impl IsolateController {
    /// Queue `f` to run with the execution lock held.
    ///
    /// Wakes the message loop if it is running. Otherwise the first call
    /// queued after a drain asks the engine for an interrupt so that a
    /// thread busy inside the isolate picks it up.
    pub fn call_with_lock_async<F>(&self, f: F)
    where
        F: FnOnce(&IsolateController) + Send + 'static,
    {
        let request_interrupt = {
            let mut state = self.state();
            state.call_queue.push_back(Box::new(f));

            if state.in_message_loop {
                self.queue_changed.notify_one();
                false
            } else {
                state.call_queue.len() == 1
            }
        };

        if request_interrupt {
            let controller = self.weak_self.clone();
            self.engine.request_interrupt(Box::new(move || {
                if let Some(controller) = controller.upgrade() {
                    let _scope = controller.enter();
                    controller.process_call_queue();
                }
            }));
        }
    }

    /// Run `f` right away if the execution lock is free or already held by
    /// this thread, otherwise queue it. Never blocks.
    pub fn call_with_lock_no_wait<F>(&self, f: F)
    where
        F: FnOnce(&IsolateController) + Send + 'static,
    {
        // f may drop the last outside reference; keep the controller alive
        // until the scope is gone
        let _pinned = self.weak_self.upgrade();

        match self.try_enter() {
            Some(_scope) => self.run_locked_call(Box::new(f)),
            None => self.call_with_lock_async(f),
        }
    }

    /// Drain the call queue until it is observed empty.
    ///
    /// Calls submitted while a batch runs are picked up by the next batch
    /// before this returns.
    pub(crate) fn process_call_queue(&self) {
        loop {
            let calls = mem::take(&mut self.state().call_queue);
            if calls.is_empty() {
                break;
            }
            self.run_locked_calls(calls);
        }
    }

    fn run_locked_calls(&self, calls: VecDeque<LockedCall>) {
        for call in calls {
            self.run_locked_call(call);
        }
    }

    fn run_locked_call(&self, call: LockedCall) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| call(self))) {
            warn!(
                "Isolate '{}' dropped a locked call that panicked: {}",
                self.name(),
                panic_message(payload.as_ref())
            );
            self.state().dropped_calls += 1;
        }
    }

    /// Number of calls waiting to run.
    pub fn queued_call_count(&self) -> usize {
        self.state().call_queue.len()
    }
}
