//! Process-wide host platform.
//!
//! Installed once, on first isolate creation, and never torn down. Owns the
//! shared worker pool and maps engine handles back to their controllers so
//! that work posted by an engine reaches the isolate it belongs to.

use crate::controller::IsolateController;
use crate::error::IsolateError;
use crate::scope::current_engine;
use isogate_engine::{EngineHandle, Platform, Task, TaskRunner};
use isogate_platform::{clock, CallbackQueue, WorkerPool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

const WORKER_POOL_NAME: &str = "isogate-worker";

static HOST_PLATFORM: OnceLock<Arc<HostPlatform>> = OnceLock::new();

/// Serializes installation
static INSTALL: Mutex<()> = Mutex::new(());

/// Engine platform backed by a worker pool and an isolate registry.
pub struct HostPlatform {
    workers: Arc<WorkerPool>,
    registry: Mutex<HashMap<EngineHandle, Weak<IsolateController>>>,
}

impl HostPlatform {
    /// Install the platform if needed and return it.
    pub fn ensure_installed() -> Result<&'static Arc<HostPlatform>, IsolateError> {
        if let Some(platform) = HOST_PLATFORM.get() {
            return Ok(platform);
        }

        let _install = INSTALL.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(platform) = HOST_PLATFORM.get() {
            return Ok(platform);
        }

        let workers = WorkerPool::new(WORKER_POOL_NAME, clock::hardware_concurrency())?;
        let platform = HOST_PLATFORM.get_or_init(|| {
            Arc::new(HostPlatform {
                workers: Arc::new(workers),
                registry: Mutex::new(HashMap::new()),
            })
        });

        if !isogate_engine::initialize_platform(Arc::clone(platform) as Arc<dyn Platform>) {
            warn!("An engine platform was already installed; keeping it");
        }
        info!(
            "Host platform installed with {} worker threads",
            platform.workers.size()
        );
        Ok(platform)
    }

    /// The installed platform, if any.
    pub fn get() -> Option<&'static Arc<HostPlatform>> {
        HOST_PLATFORM.get()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<EngineHandle, Weak<IsolateController>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, controller: &Arc<IsolateController>) {
        self.registry()
            .insert(controller.handle(), Arc::downgrade(controller));
    }

    /// Remove the mapping for `handle` if it still points at `controller`.
    pub(crate) fn unregister(&self, handle: EngineHandle, controller: &Weak<IsolateController>) {
        let mut registry = self.registry();
        if registry
            .get(&handle)
            .is_some_and(|registered| Weak::ptr_eq(registered, controller))
        {
            registry.remove(&handle);
        }
    }

    /// The live controller that owns the engine behind `handle`.
    pub fn lookup(&self, handle: EngineHandle) -> Option<Arc<IsolateController>> {
        self.registry().get(&handle).and_then(Weak::upgrade)
    }

    /// Default queue for background worker tasks.
    pub fn callback_queue(&self) -> Arc<dyn CallbackQueue> {
        Arc::clone(&self.workers) as Arc<dyn CallbackQueue>
    }

    fn current_controller(&self) -> Option<Arc<IsolateController>> {
        current_engine().and_then(|handle| self.lookup(handle))
    }
}

impl Platform for HostPlatform {
    fn number_of_worker_threads(&self) -> usize {
        self.workers.size()
    }

    fn foreground_task_runner(&self, engine: EngineHandle) -> Option<Arc<dyn TaskRunner>> {
        self.lookup(engine)
            .map(|controller| controller.foreground_task_runner())
    }

    fn call_on_worker_thread(&self, task: Box<dyn Task>) {
        match self.current_controller() {
            Some(controller) => controller.run_task_async(task),
            None => task.run(),
        }
    }

    fn call_delayed_on_worker_thread(&self, task: Box<dyn Task>, delay: Duration) {
        match self.current_controller() {
            Some(controller) => controller.run_task_delayed(task, delay),
            None => debug!("Dropped delayed worker task posted outside any isolate"),
        }
    }

    fn call_on_foreground_thread(&self, engine: EngineHandle, task: Box<dyn Task>) {
        match self.lookup(engine) {
            Some(controller) => controller.run_task_with_lock_async(task),
            None => debug!("Dropped foreground task for unknown {}", engine),
        }
    }

    fn call_delayed_on_foreground_thread(
        &self,
        engine: EngineHandle,
        task: Box<dyn Task>,
        delay: Duration,
    ) {
        match self.lookup(engine) {
            Some(controller) => controller.run_task_with_lock_delayed(task, delay),
            None => debug!("Dropped delayed foreground task for unknown {}", engine),
        }
    }

    fn monotonically_increasing_time(&self) -> f64 {
        clock::relative_seconds()
    }

    fn current_clock_time_millis(&self) -> f64 {
        clock::current_time_millis()
    }
}
