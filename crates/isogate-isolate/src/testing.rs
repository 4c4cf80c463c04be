//! Shared test helpers.

use crate::controller::{IsolateBuilder, IsolateController};
use isogate_engine::SimEngine;
use isogate_platform::{CallbackQueue, NativeCallback};
use std::mem;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Build a controller with default options around `sim`.
pub(crate) fn build(sim: &SimEngine) -> Arc<IsolateController> {
    IsolateBuilder::new("test").build(sim).unwrap()
}

/// Callback queue that holds callbacks until the test runs them.
#[derive(Default)]
pub(crate) struct ManualQueue {
    callbacks: Mutex<Vec<NativeCallback>>,
}

impl ManualQueue {
    /// Run every queued callback on the calling thread and return how many
    /// ran.
    pub(crate) fn run_all(&self) -> usize {
        let callbacks = mem::take(&mut *self.callbacks.lock().unwrap());
        let count = callbacks.len();
        for callback in callbacks {
            callback();
        }
        count
    }
}

impl CallbackQueue for ManualQueue {
    fn queue(&self, callback: NativeCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub(crate) fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
