//! The engine boundary.
//!
//! An [`Engine`] is effectively single-threaded: apart from
//! `request_interrupt`, `terminate_execution`, `cancel_terminate_execution`,
//! `is_execution_terminating` and `heap_statistics`, callers must hold the
//! owning isolate's execution lock.

use crate::config::{ConfigError, IsolateConstraints};
use crate::heap::HeapStatistics;
use crate::inspector::{Inspector, InspectorClient};
use crate::profile::CpuProfile;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque identity of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub u64);

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Engine({})", self.0)
    }
}

/// Opaque handle to an execution context inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// Opaque handle to a compiled script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptHandle(pub u64);

/// Opaque handle to an engine object pinned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PersistentHandle(pub u64);

/// Describes the document a script was loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Resource name reported to debuggers and profilers
    pub name: String,
    /// Optional source map location
    pub source_map_url: Option<String>,
    /// Compile as a module rather than a classic script
    pub is_module: bool,
}

impl DocumentInfo {
    /// Document info for a classic script.
    pub fn script(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Callback run by the engine at its next safe point on the thread that is
/// executing inside the context.
pub type InterruptCallback = Box<dyn FnOnce() + Send + 'static>;

/// Hook invoked just before a call enters the engine.
pub type BeforeCallHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine creation failed: {0}")]
    Creation(String),

    #[error("Invalid constraints: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown context {0:?}")]
    UnknownContext(ContextHandle),

    #[error("Compilation failed: {0}")]
    Compile(String),

    #[error("Inspector unavailable: {0}")]
    InspectorUnavailable(String),

    #[error("Engine has been disposed")]
    Disposed,
}

/// A single-threaded scripting engine instance.
pub trait Engine: Send + Sync {
    /// Opaque identity used for platform lookups.
    fn handle(&self) -> EngineHandle;

    /// Engine version string.
    fn version(&self) -> String;

    /// Install (`Some`) or remove (`None`) the before-call-entered hook.
    fn set_before_call_entered_hook(&self, hook: Option<BeforeCallHook>);

    fn create_context(&self, name: &str) -> Result<ContextHandle, EngineError>;

    fn dispose_context(&self, context: ContextHandle);

    fn compile(
        &self,
        context: ContextHandle,
        document: &DocumentInfo,
        code: &str,
    ) -> Result<ScriptHandle, EngineError>;

    /// Create a fresh private key pinned to the engine's lifetime.
    fn create_private_key(&self) -> PersistentHandle;

    /// Create another strong handle to the object behind `handle`.
    fn clone_persistent(&self, handle: PersistentHandle) -> PersistentHandle;

    fn dispose_persistent(&self, handle: PersistentHandle);

    fn heap_statistics(&self) -> HeapStatistics;

    /// Exhaustive collection for low-memory situations.
    fn low_memory_notification(&self);

    /// Perform idle-time GC work until `deadline_seconds` (relative clock).
    /// Returns true when there is no more work to do.
    fn idle_notification_deadline(&self, deadline_seconds: f64) -> bool;

    /// Set the lowest stack address the engine may use.
    fn set_stack_limit(&self, address: usize);

    fn terminate_execution(&self);

    fn cancel_terminate_execution(&self);

    fn is_execution_terminating(&self) -> bool;

    /// Thread-safe request to run `callback` at the next safe point.
    fn request_interrupt(&self, callback: InterruptCallback);

    fn start_cpu_profiling(&self, title: &str, record_samples: bool) -> bool;

    fn stop_cpu_profiling(&self, title: &str) -> Option<CpuProfile>;

    fn dispose_profiler(&self);

    fn create_inspector(
        &self,
        client: Arc<dyn InspectorClient>,
    ) -> Result<Arc<dyn Inspector>, EngineError>;

    /// Release the engine. No other method may be called afterwards.
    fn dispose(&self);
}

/// Creates engines with optional memory constraints.
pub trait EngineFactory {
    fn create_engine(
        &self,
        constraints: Option<&IsolateConstraints>,
    ) -> Result<Box<dyn Engine>, EngineError>;
}
