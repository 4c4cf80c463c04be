//! isogate Engine Boundary
//!
//! The scripting engine is an external collaborator. This crate defines the
//! surface the isolate controller consumes from it:
//!
//! 1. **Engine**: one single-threaded execution context per isolate, with
//!    heap statistics, GC requests, stack limits, termination, interrupts
//!    and CPU profiling.
//!
//! 2. **Platform**: the process-wide task submission hooks the engine calls
//!    back into (worker, foreground and delayed tasks).
//!
//! 3. **Inspector**: the engine side of a debugging session.
//!
//! `SimEngine` is a deterministic in-process engine implementing the whole
//! boundary, used to drive the controller without real engine bindings.

mod config;
mod engine;
mod heap;
mod inspector;
mod profile;
pub mod sim;
mod task;

pub use config::{ConfigError, IsolateConstraints};
pub use engine::{
    BeforeCallHook, ContextHandle, DocumentInfo, Engine, EngineError, EngineFactory, EngineHandle,
    InterruptCallback, PersistentHandle, ScriptHandle,
};
pub use heap::HeapStatistics;
pub use inspector::{ContextInfo, Inspector, InspectorChannel, InspectorClient, InspectorSession};
pub use profile::{CpuProfile, CpuProfileNode, CpuProfileSample, LineTick};
pub use sim::SimEngine;
pub use task::{initialize_platform, platform, Platform, Task, TaskRunner};
