//! Simulated engine.
//!
//! `SimEngine` implements the whole engine boundary in-process and
//! deterministically. It keeps a log of the calls the controller makes,
//! models a heap with live and collectable bytes, queues interrupt requests
//! until [`SimEngine::poll_interrupts`] runs them, and ships a small
//! inspector that understands a handful of protocol methods.
//!
//! A `SimEngine` is a cheap handle: clones share the same instance, and the
//! engine doubles as its own [`EngineFactory`].

use crate::config::IsolateConstraints;
use crate::engine::{
    BeforeCallHook, ContextHandle, DocumentInfo, Engine, EngineError, EngineFactory,
    EngineHandle, InterruptCallback, PersistentHandle, ScriptHandle,
};
use crate::heap::HeapStatistics;
use crate::inspector::{
    ContextInfo, Inspector, InspectorChannel, InspectorClient, InspectorSession,
};
use crate::profile::{CpuProfile, CpuProfileNode, CpuProfileSample};
use crate::task::{platform, Task};
use isogate_platform::clock;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Global engine ID counter
static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// Heap overhead present in every engine
const BASELINE_HEAP: usize = 512 * KB;

/// Heap limit when no constraints are given
const DEFAULT_HEAP_LIMIT: usize = 1536 * MB;

/// Garbage reclaimed by a single idle notification
const IDLE_COLLECTION_CHUNK: usize = 256 * KB;

/// Calls observed by the simulated engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    BeforeCallHookInstalled,
    BeforeCallHookRemoved,
    ContextCreated(ContextHandle),
    ContextDisposed(ContextHandle),
    Compiled(String),
    StackLimitSet(usize),
    TerminateRequested,
    TerminateCancelled,
    LowMemoryNotification,
    IdleNotification,
    ProfilerDisposed,
    PersistentDisposed(PersistentHandle),
    Disposed,
}

/// Simulated heap with live and collectable bytes.
#[derive(Debug, Default)]
struct SimHeap {
    live: usize,
    garbage: usize,
    gc_count: usize,
}

impl SimHeap {
    fn total(&self) -> usize {
        BASELINE_HEAP + self.live + self.garbage
    }

    fn collect(&mut self, max: usize) -> usize {
        let freed = self.garbage.min(max);
        self.garbage -= freed;
        self.gc_count += 1;
        freed
    }
}

struct ProfileRecording {
    record_samples: bool,
    start_time: i64,
    root: CpuProfileNode,
    next_node_id: u32,
    samples: Vec<CpuProfileSample>,
}

impl ProfileRecording {
    fn new(record_samples: bool) -> Self {
        Self {
            record_samples,
            start_time: now_micros(),
            root: CpuProfileNode {
                id: 1,
                function_name: "(root)".to_string(),
                url: String::new(),
                ..CpuProfileNode::default()
            },
            next_node_id: 2,
            samples: Vec::new(),
        }
    }

    fn record(&mut self, function: &str, url: &str, line: i32, column: i32) {
        let existing = self.root.children.iter_mut().find(|child| {
            child.function_name == function && child.url == url && child.line_number == line
        });

        let node_id = match existing {
            Some(child) => {
                child.hit_count += 1;
                child.id
            }
            None => {
                let id = self.next_node_id;
                self.next_node_id += 1;
                self.root.children.push(CpuProfileNode {
                    id,
                    function_name: function.to_string(),
                    script_id: id as i32,
                    url: url.to_string(),
                    line_number: line,
                    column_number: column,
                    hit_count: 1,
                    ..CpuProfileNode::default()
                });
                id
            }
        };

        if self.record_samples {
            self.samples.push(CpuProfileSample {
                node_id,
                timestamp: now_micros(),
            });
        }
    }

    fn finish(self, title: &str) -> CpuProfile {
        CpuProfile {
            title: title.to_string(),
            root: self.root,
            start_time: self.start_time,
            end_time: now_micros(),
            samples: self.samples,
        }
    }
}

#[derive(Default)]
struct SimState {
    events: Vec<SimEvent>,
    before_call_hook: Option<BeforeCallHook>,
    contexts: HashSet<ContextHandle>,
    persistents: HashSet<PersistentHandle>,
    next_handle: u64,
    heap: SimHeap,
    heap_size_limit: usize,
    stack_limit: Option<usize>,
    interrupts: Vec<InterruptCallback>,
    profiles: HashMap<String, ProfileRecording>,
    inspector: Weak<SimInspector>,
    disposed: bool,
}

impl SimState {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

struct SimInner {
    handle: EngineHandle,
    terminating: AtomicBool,
    state: Mutex<SimState>,
}

/// Deterministic in-process engine.
#[derive(Clone)]
pub struct SimEngine {
    inner: Arc<SimInner>,
}

impl SimEngine {
    /// Create a new simulated engine instance.
    pub fn new() -> Self {
        let handle = EngineHandle(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed));
        debug!("Creating simulated engine {}", handle);

        Self {
            inner: Arc::new(SimInner {
                handle,
                terminating: AtomicBool::new(false),
                state: Mutex::new(SimState {
                    heap_size_limit: DEFAULT_HEAP_LIMIT,
                    ..SimState::default()
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, event: SimEvent) {
        self.state().events.push(event);
    }

    /// All calls observed so far, oldest first.
    pub fn events(&self) -> Vec<SimEvent> {
        self.state().events.clone()
    }

    /// Number of times `event` was observed.
    pub fn count(&self, event: &SimEvent) -> usize {
        self.state().events.iter().filter(|e| *e == event).count()
    }

    /// Simulate script entry: runs the before-call-entered hook, if any.
    pub fn enter_call(&self) {
        let hook = self.state().before_call_hook.clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn has_before_call_hook(&self) -> bool {
        self.state().before_call_hook.is_some()
    }

    /// Run every queued interrupt on the calling thread, in request order.
    ///
    /// Returns the number of interrupts run.
    pub fn poll_interrupts(&self) -> usize {
        let mut ran = 0;
        loop {
            let interrupts = std::mem::take(&mut self.state().interrupts);
            if interrupts.is_empty() {
                return ran;
            }
            for interrupt in interrupts {
                interrupt();
                ran += 1;
            }
        }
    }

    pub fn pending_interrupts(&self) -> usize {
        self.state().interrupts.len()
    }

    /// Last stack limit set by the host.
    pub fn stack_limit(&self) -> Option<usize> {
        self.state().stack_limit
    }

    pub fn live_contexts(&self) -> usize {
        self.state().contexts.len()
    }

    pub fn live_persistents(&self) -> usize {
        self.state().persistents.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    /// Allocate bytes that stay reachable.
    pub fn allocate(&self, bytes: usize) {
        self.state().heap.live += bytes;
    }

    /// Allocate bytes that the next collection can reclaim.
    pub fn allocate_garbage(&self, bytes: usize) {
        self.state().heap.garbage += bytes;
    }

    /// Release reachable bytes.
    pub fn free(&self, bytes: usize) {
        let mut state = self.state();
        state.heap.live = state.heap.live.saturating_sub(bytes);
    }

    pub fn gc_count(&self) -> usize {
        self.state().heap.gc_count
    }

    /// Record a function call in every active CPU profile.
    pub fn record_call(&self, function: &str, url: &str, line: i32, column: i32) {
        for recording in self.state().profiles.values_mut() {
            recording.record(function, url, line, column);
        }
    }

    /// Post a task to this engine's foreground runner through the platform.
    ///
    /// Returns false when no platform or runner is available.
    pub fn post_foreground_task(&self, task: Box<dyn Task>) -> bool {
        match platform().and_then(|p| p.foreground_task_runner(self.inner.handle)) {
            Some(runner) => {
                runner.post_task(task);
                true
            }
            None => false,
        }
    }

    pub fn post_delayed_foreground_task(&self, task: Box<dyn Task>, delay: Duration) -> bool {
        match platform().and_then(|p| p.foreground_task_runner(self.inner.handle)) {
            Some(runner) => {
                runner.post_delayed_task(task, delay);
                true
            }
            None => false,
        }
    }

    /// Post a background task through the platform.
    pub fn post_worker_task(&self, task: Box<dyn Task>) -> bool {
        match platform() {
            Some(platform) => {
                platform.call_on_worker_thread(task);
                true
            }
            None => false,
        }
    }

    pub fn post_delayed_worker_task(&self, task: Box<dyn Task>, delay: Duration) -> bool {
        match platform() {
            Some(platform) => {
                platform.call_delayed_on_worker_thread(task, delay);
                true
            }
            None => false,
        }
    }

    /// The inspector created for this engine, while it is alive.
    pub fn inspector(&self) -> Option<Arc<SimInspector>> {
        self.state().inspector.upgrade()
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory for SimEngine {
    fn create_engine(
        &self,
        constraints: Option<&IsolateConstraints>,
    ) -> Result<Box<dyn Engine>, EngineError> {
        if let Some(constraints) = constraints {
            constraints.validate()?;
            self.state().heap_size_limit = constraints.heap_budget();
        }
        info!("Simulated engine {} ready", self.inner.handle);
        Ok(Box::new(self.clone()))
    }
}

impl Engine for SimEngine {
    fn handle(&self) -> EngineHandle {
        self.inner.handle
    }

    fn version(&self) -> String {
        format!("sim-{}", env!("CARGO_PKG_VERSION"))
    }

    fn set_before_call_entered_hook(&self, hook: Option<BeforeCallHook>) {
        let mut state = self.state();
        let event = if hook.is_some() {
            SimEvent::BeforeCallHookInstalled
        } else {
            SimEvent::BeforeCallHookRemoved
        };
        state.before_call_hook = hook;
        state.events.push(event);
    }

    fn create_context(&self, name: &str) -> Result<ContextHandle, EngineError> {
        let mut state = self.state();
        if state.disposed {
            return Err(EngineError::Disposed);
        }
        let context = ContextHandle(state.next_handle());
        state.contexts.insert(context);
        state.events.push(SimEvent::ContextCreated(context));
        debug!("Created context '{}' ({:?})", name, context);
        Ok(context)
    }

    fn dispose_context(&self, context: ContextHandle) {
        let mut state = self.state();
        if state.contexts.remove(&context) {
            state.events.push(SimEvent::ContextDisposed(context));
        }
    }

    fn compile(
        &self,
        context: ContextHandle,
        document: &DocumentInfo,
        code: &str,
    ) -> Result<ScriptHandle, EngineError> {
        let mut state = self.state();
        if !state.contexts.contains(&context) {
            return Err(EngineError::UnknownContext(context));
        }
        if !balanced(code) {
            return Err(EngineError::Compile(format!(
                "{}: unbalanced delimiters",
                document.name
            )));
        }

        let script = ScriptHandle(state.next_handle());
        state.events.push(SimEvent::Compiled(document.name.clone()));
        Ok(script)
    }

    fn create_private_key(&self) -> PersistentHandle {
        let mut state = self.state();
        let handle = PersistentHandle(state.next_handle());
        state.persistents.insert(handle);
        handle
    }

    fn clone_persistent(&self, _handle: PersistentHandle) -> PersistentHandle {
        let mut state = self.state();
        let clone = PersistentHandle(state.next_handle());
        state.persistents.insert(clone);
        clone
    }

    fn dispose_persistent(&self, handle: PersistentHandle) {
        let mut state = self.state();
        if state.persistents.remove(&handle) {
            state.events.push(SimEvent::PersistentDisposed(handle));
        }
    }

    fn heap_statistics(&self) -> HeapStatistics {
        let state = self.state();
        let total = state.heap.total();
        HeapStatistics {
            total_heap_size: total,
            total_heap_size_executable: BASELINE_HEAP / 4,
            total_physical_size: total,
            used_heap_size: total - state.heap.garbage,
            heap_size_limit: state.heap_size_limit,
        }
    }

    fn low_memory_notification(&self) {
        let mut state = self.state();
        let freed = state.heap.collect(usize::MAX);
        state.events.push(SimEvent::LowMemoryNotification);
        debug!("Low memory collection freed {} bytes", freed);
    }

    fn idle_notification_deadline(&self, _deadline_seconds: f64) -> bool {
        let mut state = self.state();
        state.heap.collect(IDLE_COLLECTION_CHUNK);
        state.events.push(SimEvent::IdleNotification);
        state.heap.garbage == 0
    }

    fn set_stack_limit(&self, address: usize) {
        let mut state = self.state();
        state.stack_limit = Some(address);
        state.events.push(SimEvent::StackLimitSet(address));
    }

    fn terminate_execution(&self) {
        self.inner.terminating.store(true, Ordering::SeqCst);
        self.log(SimEvent::TerminateRequested);
    }

    fn cancel_terminate_execution(&self) {
        self.inner.terminating.store(false, Ordering::SeqCst);
        self.log(SimEvent::TerminateCancelled);
    }

    fn is_execution_terminating(&self) -> bool {
        self.inner.terminating.load(Ordering::SeqCst)
    }

    fn request_interrupt(&self, callback: InterruptCallback) {
        self.state().interrupts.push(callback);
    }

    fn start_cpu_profiling(&self, title: &str, record_samples: bool) -> bool {
        let mut state = self.state();
        if state.profiles.contains_key(title) {
            return false;
        }
        state
            .profiles
            .insert(title.to_string(), ProfileRecording::new(record_samples));
        debug!("Profiling '{}' started", title);
        true
    }

    fn stop_cpu_profiling(&self, title: &str) -> Option<CpuProfile> {
        let recording = self.state().profiles.remove(title)?;
        Some(recording.finish(title))
    }

    fn dispose_profiler(&self) {
        let mut state = self.state();
        state.profiles.clear();
        state.events.push(SimEvent::ProfilerDisposed);
    }

    fn create_inspector(
        &self,
        client: Arc<dyn InspectorClient>,
    ) -> Result<Arc<dyn Inspector>, EngineError> {
        let inspector = Arc::new(SimInspector::new(client));
        self.state().inspector = Arc::downgrade(&inspector);
        Ok(inspector)
    }

    fn dispose(&self) {
        let mut state = self.state();
        state.disposed = true;
        state.contexts.clear();
        state.interrupts.clear();
        state.events.push(SimEvent::Disposed);
        info!("Simulated engine {} disposed", self.inner.handle);
    }
}

fn now_micros() -> i64 {
    clock::elapsed().as_micros() as i64
}

/// Check that brackets, braces and parentheses nest properly.
fn balanced(code: &str) -> bool {
    let mut open = Vec::new();
    for c in code.chars() {
        match c {
            '(' | '[' | '{' => open.push(c),
            ')' => {
                if open.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if open.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if open.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    open.is_empty()
}

#[derive(Default)]
struct InspectorState {
    contexts: Vec<ContextInfo>,
    messages: Vec<String>,
    pauses: Vec<(String, String)>,
}

/// State shared by an inspector and its sessions.
#[derive(Default)]
struct InspectorShared {
    sessions: AtomicUsize,
    state: Mutex<InspectorState>,
}

impl InspectorShared {
    fn state(&self) -> MutexGuard<'_, InspectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Inspector of a [`SimEngine`].
pub struct SimInspector {
    client: Arc<dyn InspectorClient>,
    shared: Arc<InspectorShared>,
}

impl SimInspector {
    fn new(client: Arc<dyn InspectorClient>) -> Self {
        Self {
            client,
            shared: Arc::new(InspectorShared::default()),
        }
    }

    /// Contexts currently announced to the inspector.
    pub fn contexts(&self) -> Vec<ContextInfo> {
        self.shared.state().contexts.clone()
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.load(Ordering::SeqCst)
    }

    /// Protocol messages dispatched by any session, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.shared.state().messages.clone()
    }

    /// Scheduled pauses as (reason, detail).
    pub fn pauses(&self) -> Vec<(String, String)> {
        self.shared.state().pauses.clone()
    }
}

impl Inspector for SimInspector {
    fn context_created(&self, info: ContextInfo) {
        self.shared.state().contexts.push(info);
    }

    fn context_destroyed(&self, context: ContextHandle) {
        self.shared
            .state()
            .contexts
            .retain(|info| info.context != context);
    }

    fn connect(
        &self,
        group_id: i32,
        channel: Arc<dyn InspectorChannel>,
    ) -> Arc<dyn InspectorSession> {
        self.shared.sessions.fetch_add(1, Ordering::SeqCst);
        debug!("Inspector session connected to group {}", group_id);

        Arc::new(SimSession {
            group_id,
            client: Arc::clone(&self.client),
            channel,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Protocol session of a [`SimInspector`].
///
/// Understands `Runtime.runIfWaitingForDebugger`, `Debugger.pause` and
/// `Debugger.resume`; every other method gets an empty result.
struct SimSession {
    group_id: i32,
    client: Arc<dyn InspectorClient>,
    channel: Arc<dyn InspectorChannel>,
    shared: Arc<InspectorShared>,
}

impl SimSession {
    fn respond(&self, id: i64) {
        self.channel
            .send_response(id, json!({ "id": id, "result": {} }).to_string());
    }
}

impl InspectorSession for SimSession {
    fn dispatch_protocol_message(&self, message: &str) {
        self.shared.state().messages.push(message.to_string());

        let request: Value = match serde_json::from_str(message) {
            Ok(request) => request,
            Err(err) => {
                self.channel.send_response(
                    0,
                    json!({ "error": { "code": -32700, "message": err.to_string() } })
                        .to_string(),
                );
                return;
            }
        };

        let id = request["id"].as_i64().unwrap_or(0);
        match request["method"].as_str().unwrap_or_default() {
            "Runtime.runIfWaitingForDebugger" => {
                self.client.run_if_waiting_for_debugger(self.group_id);
                self.respond(id);
            }
            "Debugger.pause" => {
                self.respond(id);
                self.channel.send_notification(
                    json!({ "method": "Debugger.paused", "params": { "reason": "other" } })
                        .to_string(),
                );
                self.client.run_message_loop_on_pause(self.group_id);
            }
            "Debugger.resume" => {
                self.respond(id);
                self.client.quit_message_loop_on_pause();
            }
            _ => self.respond(id),
        }
        self.channel.flush_protocol_notifications();
    }

    fn schedule_pause_on_next_statement(&self, reason: &str, detail: &str) {
        self.shared
            .state()
            .pauses
            .push((reason.to_string(), detail.to_string()));
    }
}

impl Drop for SimSession {
    fn drop(&mut self) {
        self.shared.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingClient {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl InspectorClient for RecordingClient {
        fn run_message_loop_on_pause(&self, group_id: i32) {
            self.calls.lock().unwrap().push(format!("pause:{}", group_id));
        }

        fn quit_message_loop_on_pause(&self) {
            self.calls.lock().unwrap().push("quit".to_string());
        }

        fn run_if_waiting_for_debugger(&self, group_id: i32) {
            self.calls.lock().unwrap().push(format!("run:{}", group_id));
        }

        fn ensure_default_context_in_group(&self, _group_id: i32) -> Option<ContextHandle> {
            None
        }

        fn current_time_ms(&self) -> f64 {
            0.0
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        responses: Mutex<Vec<(i64, String)>>,
        notifications: Mutex<Vec<String>>,
    }

    impl InspectorChannel for RecordingChannel {
        fn send_response(&self, call_id: i64, message: String) {
            self.responses.lock().unwrap().push((call_id, message));
        }

        fn send_notification(&self, message: String) {
            self.notifications.lock().unwrap().push(message);
        }
    }

    #[test]
    fn test_factory_applies_constraints() {
        let sim = SimEngine::new();
        let engine = sim
            .create_engine(Some(&IsolateConstraints::ultra_low()))
            .unwrap();

        assert_eq!(engine.handle(), sim.handle());
        assert_eq!(
            engine.heap_statistics().heap_size_limit,
            IsolateConstraints::ultra_low().heap_budget()
        );

        let invalid = IsolateConstraints {
            max_new_space_size: 8,
            max_old_space_size: 0,
        };
        assert!(matches!(
            sim.create_engine(Some(&invalid)),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_engines_have_distinct_handles() {
        assert_ne!(SimEngine::new().handle(), SimEngine::new().handle());
    }

    #[test]
    fn test_compile_checks_context_and_code() {
        let sim = SimEngine::new();
        let context = sim.create_context("main").unwrap();
        let doc = DocumentInfo::script("test.js");

        assert!(sim.compile(context, &doc, "function f() { return [1, 2]; }").is_ok());
        assert!(matches!(
            sim.compile(context, &doc, "function f() {"),
            Err(EngineError::Compile(_))
        ));

        sim.dispose_context(context);
        assert!(matches!(
            sim.compile(context, &doc, "1"),
            Err(EngineError::UnknownContext(_))
        ));
        assert_eq!(sim.count(&SimEvent::Compiled("test.js".to_string())), 1);
    }

    #[test]
    fn test_low_memory_collects_garbage_only() {
        let sim = SimEngine::new();
        sim.allocate(MB);
        sim.allocate_garbage(2 * MB);
        let before = sim.heap_statistics().total_heap_size;

        sim.low_memory_notification();
        let after = sim.heap_statistics().total_heap_size;

        assert_eq!(before - after, 2 * MB);
        assert_eq!(after, BASELINE_HEAP + MB);
        assert_eq!(sim.gc_count(), 1);
    }

    #[test]
    fn test_idle_notification_reports_completion() {
        let sim = SimEngine::new();
        sim.allocate_garbage(IDLE_COLLECTION_CHUNK + 1);

        assert!(!sim.idle_notification_deadline(0.0));
        assert!(sim.idle_notification_deadline(0.0));
        assert_eq!(sim.count(&SimEvent::IdleNotification), 2);
    }

    #[test]
    fn test_interrupts_run_in_order_when_polled() {
        let sim = SimEngine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            sim.request_interrupt(Box::new(move || seen.lock().unwrap().push(i)));
        }
        assert_eq!(sim.pending_interrupts(), 3);
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(sim.poll_interrupts(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_before_call_hook() {
        let sim = SimEngine::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let hook_calls = Arc::clone(&calls);
        sim.set_before_call_entered_hook(Some(Arc::new(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        })));
        sim.enter_call();
        sim.set_before_call_entered_hook(None);
        sim.enter_call();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!sim.has_before_call_hook());
    }

    #[test]
    fn test_termination_flag() {
        let sim = SimEngine::new();
        sim.terminate_execution();
        assert!(sim.is_execution_terminating());

        sim.cancel_terminate_execution();
        assert!(!sim.is_execution_terminating());
    }

    #[test]
    fn test_profiling_records_calls() {
        let sim = SimEngine::new();
        assert!(sim.start_cpu_profiling("run", true));
        assert!(!sim.start_cpu_profiling("run", true));

        sim.record_call("work", "app.js", 3, 1);
        sim.record_call("work", "app.js", 3, 1);
        sim.record_call("idle", "app.js", 9, 5);

        let profile = sim.stop_cpu_profiling("run").unwrap();
        assert_eq!(profile.title, "run");
        assert_eq!(profile.node_count(), 3);
        assert_eq!(profile.root.children[0].hit_count, 2);
        assert_eq!(profile.samples.len(), 3);
        assert!(sim.stop_cpu_profiling("run").is_none());
    }

    #[test]
    fn test_session_dispatch() {
        let sim = SimEngine::new();
        let client = Arc::new(RecordingClient::default());
        let channel = Arc::new(RecordingChannel::default());

        let inspector = sim.create_inspector(client.clone()).unwrap();
        let session = inspector.connect(1, channel.clone());
        assert_eq!(sim.inspector().unwrap().session_count(), 1);

        session.dispatch_protocol_message(r#"{"id":1,"method":"Runtime.runIfWaitingForDebugger"}"#);
        session.dispatch_protocol_message(r#"{"id":2,"method":"Debugger.pause"}"#);
        session.dispatch_protocol_message(r#"{"id":3,"method":"Debugger.resume"}"#);

        assert_eq!(client.calls(), vec!["run:1", "pause:1", "quit"]);
        let ids: Vec<i64> = channel
            .responses
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(channel.notifications.lock().unwrap().len(), 1);

        drop(session);
        assert_eq!(sim.inspector().unwrap().session_count(), 0);
    }

    #[test]
    fn test_inspector_tracks_contexts() {
        let sim = SimEngine::new();
        let inspector = sim
            .create_inspector(Arc::new(RecordingClient::default()))
            .unwrap();
        let context = sim.create_context("main").unwrap();

        inspector.context_created(ContextInfo {
            context,
            group_id: 1,
            name: "main".to_string(),
        });
        assert_eq!(sim.inspector().unwrap().contexts().len(), 1);

        inspector.context_destroyed(context);
        assert!(sim.inspector().unwrap().contexts().is_empty());

        drop(inspector);
        assert!(sim.inspector().is_none());
    }

    #[test]
    fn test_dispose_is_logged_last() {
        let sim = SimEngine::new();
        let key = sim.create_private_key();
        sim.dispose_persistent(key);
        sim.dispose();

        assert!(sim.is_disposed());
        assert_eq!(sim.live_persistents(), 0);
        assert_eq!(sim.events().last(), Some(&SimEvent::Disposed));
        assert!(matches!(
            sim.create_context("late"),
            Err(EngineError::Disposed)
        ));
    }
}
