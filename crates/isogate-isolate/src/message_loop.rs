//! Message loop.
//!
//! Blocks the thread inside the isolate and serves the locked-call queue
//! until the loop is quit or aborted. Used while execution is paused in the
//! debugger and while awaiting a debugger connection.

use crate::controller::IsolateController;
use std::mem;
use std::sync::PoisonError;
use tracing::debug;

impl IsolateController {
    /// Run the message loop on the calling thread.
    ///
    /// Returns true if the loop was quit and false if it was aborted. A
    /// loop is never nested: calling this while the loop is already
    /// running returns false immediately.
    pub fn run_message_loop(&self, awaiting_debugger: bool) -> bool {
        let _scope = self.enter();

        let was_awaiting = {
            let mut state = self.state();
            if state.in_message_loop {
                return false;
            }
            state.quit_message_loop = false;
            state.abort_message_loop = false;
            state.in_message_loop = true;
            mem::replace(&mut state.awaiting_debugger, awaiting_debugger)
        };
        debug!("Isolate '{}' entered message loop", self.name());

        self.process_call_queue();

        loop {
            {
                let state = self.state();
                if state.quit_message_loop || state.abort_message_loop {
                    break;
                }

                let state = self
                    .queue_changed
                    .wait_while(state, |state| {
                        state.call_queue.is_empty()
                            && !state.quit_message_loop
                            && !state.abort_message_loop
                    })
                    .unwrap_or_else(PoisonError::into_inner);
                drop(state);
            }
            self.process_call_queue();
        }

        let quit = {
            let mut state = self.state();
            state.in_message_loop = false;
            state.awaiting_debugger = was_awaiting;
            state.quit_message_loop
        };
        debug!(
            "Isolate '{}' left message loop ({})",
            self.name(),
            if quit { "quit" } else { "aborted" }
        );

        self.process_call_queue();
        quit
    }

    /// Ask the message loop to return true after its current batch.
    pub fn quit_message_loop(&self) {
        self.state().quit_message_loop = true;
        self.queue_changed.notify_all();
    }

    /// Ask the message loop to return false after its current batch.
    pub fn abort_message_loop(&self) {
        self.state().abort_message_loop = true;
        self.queue_changed.notify_all();
    }

    /// Abort the message loop if it is waiting for a debugger to connect.
    pub fn cancel_await_debugger(&self) {
        let mut state = self.state();
        if state.awaiting_debugger {
            state.abort_message_loop = true;
            self.queue_changed.notify_all();
        }
    }

    pub fn is_in_message_loop(&self) -> bool {
        self.state().in_message_loop
    }

    pub fn is_awaiting_debugger(&self) -> bool {
        self.state().awaiting_debugger
    }
}
