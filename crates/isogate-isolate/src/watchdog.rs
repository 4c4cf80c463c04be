//! Resource watchdogs.
//!
//! Execution scopes nest. The outermost scope with a stack limit computes
//! the lowest stack address allowed and hands it to the engine; nested
//! scopes entered below that address fail fast. The outermost scope with a
//! heap limit checks the heap right away and then re-checks it on the
//! execution thread every sample interval until the scope exits.

use crate::controller::IsolateController;
use crate::error::IsolateError;
use isogate_platform::{Timer, TimerId};
use std::hint::black_box;
use std::time::Duration;
use tracing::{debug, warn};

/// Stack usage limits below this are raised to it
const STACK_BREATHING_ROOM: usize = 16 * 1024;

/// Lowest non-null stack address; also resets the engine's limit
pub(crate) const MIN_STACK_LIMIT: usize = size_of::<usize>();

/// Heap sampling never runs more often than this
const MIN_HEAP_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// An entered execution scope. Exits on drop.
struct ExecutionScope<'a> {
    controller: &'a IsolateController,
    exited: bool,
}

impl ExecutionScope<'_> {
    /// Exit and report whether engine execution started inside the scope.
    fn exit(mut self) -> bool {
        self.exited = true;
        self.controller.exit_execution_scope()
    }
}

impl Drop for ExecutionScope<'_> {
    fn drop(&mut self) {
        if !self.exited {
            self.controller.exit_execution_scope();
        }
    }
}

impl IsolateController {
    /// Run `f` inside the isolate under the heap and stack watchdogs.
    ///
    /// Fails with a `General` error, without running `f`, if a nested call
    /// is already below the stack limit. Fails with a `Fatal` error after
    /// `f` returns if the heap watchdog declared the isolate out of memory.
    pub fn execute<F, R>(&self, f: F) -> Result<R, IsolateError>
    where
        F: FnOnce() -> R,
    {
        let _scope = self.enter();

        let marker = 0_usize;
        let stack_marker = black_box(&marker) as *const usize as usize;

        let execution = self.enter_execution_scope(stack_marker)?;
        let result = f();
        let execution_started = execution.exit();

        if self.is_out_of_memory() {
            return Err(IsolateError::OutOfMemory {
                name: self.name().to_string(),
                execution_started,
            });
        }
        Ok(result)
    }

    fn enter_execution_scope(&self, stack_marker: usize) -> Result<ExecutionScope<'_>, IsolateError> {
        let mut new_stack_limit = None;
        let mut heap_check = None;

        {
            let mut state = self.state();

            if state.stack_watch_level > 0 {
                if let Some(limit) = state.stack_limit {
                    if stack_marker < limit {
                        warn!("Isolate '{}' exceeded its stack usage limit", self.name());
                        return Err(IsolateError::StackOverflow {
                            name: self.name().to_string(),
                        });
                    }
                }
                state.stack_watch_level += 1;
            } else if state.max_stack_usage > 0 {
                let usage = state.max_stack_usage.max(STACK_BREATHING_ROOM);
                let usage = usage / MIN_STACK_LIMIT * MIN_STACK_LIMIT;
                let limit = stack_marker
                    .checked_sub(usage)
                    .filter(|limit| *limit >= MIN_STACK_LIMIT)
                    .unwrap_or(MIN_STACK_LIMIT);

                state.stack_limit = Some(limit);
                state.stack_watch_level = 1;
                new_stack_limit = Some(limit);
            }

            if state.heap_watch_level > 0 {
                state.heap_watch_level += 1;
            } else if state.max_heap_size > 0 {
                state.heap_watch_level = 1;
                heap_check = Some(state.max_heap_size);
            }

            state.execution_terminating = false;
            state.execution_scopes.push(false);
        }

        let scope = ExecutionScope {
            controller: self,
            exited: false,
        };

        if let Some(limit) = new_stack_limit {
            self.engine.set_stack_limit(limit);
        }
        if let Some(max_heap_size) = heap_check {
            self.check_heap_size(max_heap_size);
        }
        Ok(scope)
    }

    fn exit_execution_scope(&self) -> bool {
        let mut reset_stack_limit = false;

        let (execution_started, heap_watch_timer) = {
            let mut state = self.state();
            let execution_started = state.execution_scopes.pop().unwrap_or(false);

            if state.stack_watch_level > 0 {
                state.stack_watch_level -= 1;
                if state.stack_watch_level == 0 {
                    reset_stack_limit = state.stack_limit.take().is_some();
                }
            }

            let mut heap_watch_timer = None;
            if state.heap_watch_level > 0 {
                state.heap_watch_level -= 1;
                if state.heap_watch_level == 0 {
                    heap_watch_timer = state.heap_watch_timer.take();
                }
            }

            (execution_started, heap_watch_timer)
        };

        // Let remaining frames unwind normally
        self.engine.cancel_terminate_execution();

        if reset_stack_limit {
            self.engine.set_stack_limit(MIN_STACK_LIMIT);
        }
        drop(heap_watch_timer);

        execution_started
    }

    /// Compare the heap against the limit. Over the limit, collect once;
    /// still over, flag the isolate out of memory and terminate execution.
    /// Otherwise re-arm the heap watch timer.
    pub(crate) fn check_heap_size(&self, max_heap_size: usize) {
        if self.engine.heap_statistics().exceeds(max_heap_size) {
            self.engine.low_memory_notification();

            let stats = self.engine.heap_statistics();
            if stats.exceeds(max_heap_size) {
                warn!(
                    "Isolate '{}' exceeded its heap limit of {} bytes ({})",
                    self.name(),
                    max_heap_size,
                    stats.format()
                );
                self.state().out_of_memory = true;
                self.terminate_execution();
                return;
            }
        }

        self.set_up_heap_watch_timer(max_heap_size);
    }

    fn set_up_heap_watch_timer(&self, max_heap_size: usize) {
        let interval = self
            .heap_size_sample_interval()
            .max(MIN_HEAP_SAMPLE_INTERVAL);

        let controller = self.weak_self.clone();
        let timer = Timer::once(interval, move |timer_id| {
            if let Some(controller) = controller.upgrade() {
                controller.call_with_lock_async(move |controller| {
                    if controller.is_heap_watch_timer(timer_id) {
                        controller.check_heap_size(max_heap_size);
                    }
                });
            }
        });

        if let Err(err) = timer.start() {
            warn!("Isolate '{}' could not start heap watch: {}", self.name(), err);
            return;
        }

        let previous = {
            let mut state = self.state();
            if state.heap_watch_level == 0 {
                return;
            }
            state.heap_watch_timer.replace(timer)
        };
        drop(previous);
        debug!("Isolate '{}' heap watch armed ({:?})", self.name(), interval);
    }

    fn is_heap_watch_timer(&self, timer_id: TimerId) -> bool {
        self.state()
            .heap_watch_timer
            .as_ref()
            .is_some_and(|timer| timer.id() == timer_id)
    }
}
