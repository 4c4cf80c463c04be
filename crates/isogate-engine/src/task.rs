//! Engine task and platform hooks.
//!
//! Engines post background and foreground work through the process-wide
//! [`Platform`]. The platform is installed once and never torn down.

use crate::engine::EngineHandle;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// A unit of engine work. Runs at most once.
pub trait Task: Send + 'static {
    fn run(self: Box<Self>);
}

impl<F> Task for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// Per-isolate foreground task runner.
pub trait TaskRunner: Send + Sync {
    fn post_task(&self, task: Box<dyn Task>);

    fn post_delayed_task(&self, task: Box<dyn Task>, delay: Duration);

    /// Idle tasks are not supported by default.
    fn idle_tasks_enabled(&self) -> bool {
        false
    }
}

/// Process-wide task submission hooks used by engines.
pub trait Platform: Send + Sync {
    fn number_of_worker_threads(&self) -> usize;

    fn foreground_task_runner(&self, engine: EngineHandle) -> Option<Arc<dyn TaskRunner>>;

    fn call_on_worker_thread(&self, task: Box<dyn Task>);

    fn call_delayed_on_worker_thread(&self, task: Box<dyn Task>, delay: Duration);

    fn call_on_foreground_thread(&self, engine: EngineHandle, task: Box<dyn Task>);

    fn call_delayed_on_foreground_thread(
        &self,
        engine: EngineHandle,
        task: Box<dyn Task>,
        delay: Duration,
    );

    /// Monotonic time in seconds.
    fn monotonically_increasing_time(&self) -> f64;

    /// Wall-clock time in milliseconds since the Unix epoch.
    fn current_clock_time_millis(&self) -> f64;
}

static PLATFORM: OnceLock<Arc<dyn Platform>> = OnceLock::new();

/// Install the process-wide platform.
///
/// Returns false if a platform was already installed; the first one wins.
pub fn initialize_platform(platform: Arc<dyn Platform>) -> bool {
    PLATFORM.set(platform).is_ok()
}

/// Get the installed platform, if any.
pub fn platform() -> Option<&'static Arc<dyn Platform>> {
    PLATFORM.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closures_are_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task_counter = Arc::clone(&counter);
        let task: Box<dyn Task> = Box::new(move || {
            task_counter.fetch_add(1, Ordering::SeqCst);
        });

        task.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
