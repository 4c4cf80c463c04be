//! isogate Platform Primitives
//!
//! Leaf building blocks shared by the engine boundary and the isolate
//! controller:
//! - Monotonic and wall clocks
//! - A recursive execution lock with try-lock support
//! - One-shot and periodic timers running on their own threads
//! - A worker pool with panic isolation for queued native callbacks

pub mod clock;
pub mod lock;
pub mod logging;
pub mod timer;
pub mod worker;

pub use lock::{RecursiveLock, RecursiveLockGuard};
pub use timer::{Timer, TimerError, TimerId};
pub use worker::{panic_message, CallbackQueue, NativeCallback, WorkerError, WorkerPool};
