//! Isolate Controller
//!
//! One controller owns one engine instance and serializes every access to
//! it. Two locks are involved:
//! - the execution lock, a recursive lock held by the thread that is
//!   currently running inside the isolate
//! - the data mutex, which guards the call queue, task bookkeeping,
//!   watchdog counters, sub-contexts and debug state
//!
//! The execution lock is always acquired before the data mutex. Engine and
//! inspector calls are never made while the data mutex is held.

use crate::config::IsolateOptions;
use crate::context::SubContext;
use crate::debug::{DebugAgentFactory, DebugState};
use crate::error::IsolateError;
use crate::platform::HostPlatform;
use crate::scheduler::LockedCall;
use crate::task_runner::{ForegroundTaskRunner, PendingTask};
use isogate_engine::{
    DocumentInfo, Engine, EngineFactory, EngineHandle, HeapStatistics, IsolateConstraints,
    PersistentHandle, ScriptHandle,
};
use isogate_platform::{clock, CallbackQueue, RecursiveLock, Timer};
use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Number of live controllers in the process
static INSTANCE_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Deadline given to each idle-time collection step
const IDLE_COLLECTION_BUDGET: f64 = 0.1;

/// Mutable controller state guarded by the data mutex.
#[derive(Default)]
pub(crate) struct ControllerState {
    /// Pending locked calls, oldest first
    pub(crate) call_queue: VecDeque<LockedCall>,
    pub(crate) in_message_loop: bool,
    pub(crate) quit_message_loop: bool,
    pub(crate) abort_message_loop: bool,
    pub(crate) awaiting_debugger: bool,

    /// Worker tasks queued on the callback queue and not yet run
    pub(crate) async_tasks: Vec<Arc<PendingTask>>,
    /// Timers holding delayed tasks
    pub(crate) task_timers: Vec<Arc<Timer>>,

    pub(crate) heap_watch_timer: Option<Timer>,
    pub(crate) heap_watch_level: usize,
    pub(crate) stack_watch_level: usize,
    /// Lowest stack address allowed while stack usage is monitored
    pub(crate) stack_limit: Option<usize>,
    /// One entry per active execution scope: has engine execution started?
    pub(crate) execution_scopes: Vec<bool>,

    pub(crate) max_heap_size: usize,
    pub(crate) max_stack_usage: usize,
    pub(crate) heap_size_sample_interval: Duration,
    pub(crate) out_of_memory: bool,
    pub(crate) execution_terminating: bool,
    pub(crate) released: bool,

    /// Front entry is the default compile and debugger target
    pub(crate) sub_contexts: VecDeque<SubContext>,
    pub(crate) debug: DebugState,
    pub(crate) foreground_runner: Option<Arc<ForegroundTaskRunner>>,

    /// Locked calls dropped because they panicked
    pub(crate) dropped_calls: usize,
}

/// Per-isolate concurrency and lifecycle controller.
pub struct IsolateController {
    name: String,
    handle: EngineHandle,
    pub(crate) weak_self: Weak<IsolateController>,
    pub(crate) lock: RecursiveLock,
    data: Mutex<ControllerState>,
    /// Signalled when the call queue or the message loop flags change
    pub(crate) queue_changed: Condvar,
    pub(crate) callback_queue: Arc<dyn CallbackQueue>,
    pub(crate) debug_agent_factory: Option<Arc<dyn DebugAgentFactory>>,
    host_object_key: PersistentHandle,
    pub(crate) engine: Box<dyn Engine>,
}

/// Builder for [`IsolateController`].
pub struct IsolateBuilder {
    name: String,
    constraints: Option<IsolateConstraints>,
    options: IsolateOptions,
    callback_queue: Option<Arc<dyn CallbackQueue>>,
    debug_agent_factory: Option<Arc<dyn DebugAgentFactory>>,
}

impl IsolateBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraints: None,
            options: IsolateOptions::default(),
            callback_queue: None,
            debug_agent_factory: None,
        }
    }

    /// Engine heap constraints.
    pub fn constraints(mut self, constraints: IsolateConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn options(mut self, options: IsolateOptions) -> Self {
        self.options = options;
        self
    }

    /// Queue that runs background worker tasks. Defaults to the process-wide
    /// worker pool.
    pub fn callback_queue(mut self, queue: Arc<dyn CallbackQueue>) -> Self {
        self.callback_queue = Some(queue);
        self
    }

    /// Transport used when debugging is enabled.
    pub fn debug_agent_factory(mut self, factory: Arc<dyn DebugAgentFactory>) -> Self {
        self.debug_agent_factory = Some(factory);
        self
    }

    /// Create the engine and a fully initialized controller around it.
    pub fn build(self, factory: &dyn EngineFactory) -> Result<Arc<IsolateController>, IsolateError> {
        self.options.validate()?;
        let platform = HostPlatform::ensure_installed()?;

        let engine = factory.create_engine(self.constraints.as_ref())?;
        let host_object_key = engine.create_private_key();
        let callback_queue = self
            .callback_queue
            .unwrap_or_else(|| platform.callback_queue());

        let options = self.options;
        let controller = Arc::new_cyclic(|weak_self| IsolateController {
            name: self.name,
            handle: engine.handle(),
            weak_self: weak_self.clone(),
            lock: RecursiveLock::new(),
            data: Mutex::new(ControllerState {
                max_heap_size: options.max_heap_size,
                max_stack_usage: options.max_stack_usage,
                heap_size_sample_interval: options.heap_size_sample_interval(),
                ..ControllerState::default()
            }),
            queue_changed: Condvar::new(),
            callback_queue,
            debug_agent_factory: self.debug_agent_factory,
            host_object_key,
            engine,
        });
        INSTANCE_COUNT.fetch_add(1, Ordering::SeqCst);

        let weak = Arc::downgrade(&controller);
        controller
            .engine
            .set_before_call_entered_hook(Some(Arc::new(move || {
                if let Some(controller) = weak.upgrade() {
                    controller.on_before_call_entered();
                }
            })));
        platform.register(&controller);

        if options.enable_debugging {
            controller.enable_debugging(options.debug_port, options.enable_remote_debugging)?;
        }

        info!(
            "Created isolate '{}' ({}, engine {})",
            controller.name,
            controller.handle,
            controller.engine.version()
        );
        Ok(controller)
    }
}

impl IsolateController {
    /// Create a controller with default builder settings.
    pub fn create(
        factory: &dyn EngineFactory,
        name: &str,
        constraints: Option<IsolateConstraints>,
        options: IsolateOptions,
    ) -> Result<Arc<Self>, IsolateError> {
        let mut builder = IsolateBuilder::new(name).options(options);
        if let Some(constraints) = constraints {
            builder = builder.constraints(constraints);
        }
        builder.build(factory)
    }

    /// Number of live controllers in the process.
    pub fn instance_count() -> usize {
        INSTANCE_COUNT.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle
    }

    /// The engine owned by this controller.
    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    /// Private key under which host objects are attached to engine objects.
    pub fn host_object_key(&self) -> PersistentHandle {
        self.host_object_key
    }

    pub fn max_heap_size(&self) -> usize {
        self.state().max_heap_size
    }

    /// Set the soft heap limit in bytes (0 = unlimited). Clears the
    /// out-of-memory flag.
    pub fn set_max_heap_size(&self, bytes: usize) {
        let mut state = self.state();
        state.max_heap_size = bytes;
        state.out_of_memory = false;
    }

    pub fn max_stack_usage(&self) -> usize {
        self.state().max_stack_usage
    }

    /// Set the soft stack usage limit in bytes (0 = unlimited).
    pub fn set_max_stack_usage(&self, bytes: usize) {
        self.state().max_stack_usage = bytes;
    }

    pub fn heap_size_sample_interval(&self) -> Duration {
        self.state().heap_size_sample_interval
    }

    pub fn set_heap_size_sample_interval(&self, interval: Duration) {
        self.state().heap_size_sample_interval = interval;
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.state().out_of_memory
    }

    pub fn is_execution_terminating(&self) -> bool {
        self.state().execution_terminating
    }

    /// Request termination of running script. Callable from any thread.
    pub fn terminate_execution(&self) {
        self.state().execution_terminating = true;
        self.engine.terminate_execution();
    }

    /// Number of queued calls dropped because they panicked.
    pub fn dropped_call_count(&self) -> usize {
        self.state().dropped_calls
    }

    /// Create a compiled script in the default sub-context, or in a
    /// temporary context when none exists.
    pub fn compile(
        &self,
        document: &DocumentInfo,
        code: &str,
    ) -> Result<ScriptHandle, IsolateError> {
        let _scope = self.enter();

        if let Some(context) = self.default_context() {
            return Ok(self.engine.compile(context, document, code)?);
        }

        let context = self.engine.create_context(&self.name)?;
        let result = self.engine.compile(context, document, code);
        self.engine.dispose_context(context);
        Ok(result?)
    }

    /// Current heap statistics.
    pub fn heap_info(&self) -> HeapStatistics {
        let _scope = self.enter();
        self.engine.heap_statistics()
    }

    /// Collect garbage. An exhaustive collection reclaims as much as
    /// possible at once; otherwise idle-time steps run until the engine
    /// reports there is nothing left to do.
    pub fn collect_garbage(&self, exhaustive: bool) {
        let _scope = self.enter();

        if exhaustive {
            self.engine.low_memory_notification();
        } else {
            while !self
                .engine
                .idle_notification_deadline(clock::relative_seconds() + IDLE_COLLECTION_BUDGET)
            {}
        }
    }

    pub fn start_cpu_profiler(&self, title: &str, record_samples: bool) -> bool {
        let _scope = self.enter();
        self.engine.start_cpu_profiling(title, record_samples)
    }

    /// Stop a CPU profile and render it as a `.cpuprofile` JSON document.
    ///
    /// Returns `None` if no profile with that title was running.
    pub fn stop_cpu_profiler(&self, title: &str) -> Result<Option<String>, IsolateError> {
        let _scope = self.enter();
        match self.engine.stop_cpu_profiling(title) {
            Some(profile) => Ok(Some(profile.to_json()?)),
            None => Ok(None),
        }
    }

    /// Create another strong handle to an engine object on behalf of the host.
    pub fn add_ref_object(&self, object: PersistentHandle) -> PersistentHandle {
        let _scope = self.enter();
        self.engine.clone_persistent(object)
    }

    /// Release a host-held engine object. Never blocks: the release is
    /// deferred when another thread is running inside the isolate.
    pub fn release_object(&self, object: PersistentHandle) {
        self.call_with_lock_no_wait(move |controller| {
            controller.engine.dispose_persistent(object);
        });
    }

    /// Number of worker tasks waiting on the callback queue.
    pub fn pending_async_tasks(&self) -> usize {
        self.state().async_tasks.len()
    }

    /// Number of delayed tasks whose timers have not fired yet.
    pub fn pending_task_timers(&self) -> usize {
        self.state().task_timers.len()
    }

    fn on_before_call_entered(&self) {
        if let Some(started) = self.state().execution_scopes.last_mut() {
            *started = true;
        }
    }
}

impl Drop for IsolateController {
    fn drop(&mut self) {
        self.state().released = true;

        // Entering drains any queued calls before teardown
        {
            let _scope = self.enter();
            self.disable_debugging();
        }

        let (async_tasks, task_timers, heap_watch_timer) = {
            let mut state = self.state();
            (
                mem::take(&mut state.async_tasks),
                mem::take(&mut state.task_timers),
                state.heap_watch_timer.take(),
            )
        };

        let task_count = async_tasks.len();
        for pending in async_tasks {
            if let Some(task) = pending.take() {
                task.run();
            }
        }
        debug!(
            "Isolate '{}' ran {} pending tasks and discarded {} delayed tasks",
            self.name,
            task_count,
            task_timers.len()
        );
        drop(task_timers);
        drop(heap_watch_timer);

        self.engine.dispose_persistent(self.host_object_key);
        self.engine.set_before_call_entered_hook(None);
        self.engine.dispose_profiler();

        if let Some(platform) = HostPlatform::get() {
            platform.unregister(self.handle, &self.weak_self);
        }

        self.engine.dispose();
        INSTANCE_COUNT.fetch_sub(1, Ordering::SeqCst);

        info!("Destroyed isolate '{}'", self.name);
    }
}
