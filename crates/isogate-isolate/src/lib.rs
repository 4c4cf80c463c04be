//! isogate Isolate Controller
//!
//! Owns one engine instance and makes it safe to use from many threads:
//!
//! 1. **Scopes and the call queue**: one thread at a time runs inside the
//!    isolate; other threads hand it closures that run with the lock held.
//!
//! 2. **Message loop**: blocks a thread inside the isolate while the
//!    debugger has execution paused, serving queued calls until resumed.
//!
//! 3. **Task runner**: routes the engine's background, foreground and
//!    delayed tasks, and keeps teardown safe while tasks are in flight.
//!
//! 4. **Watchdogs**: soft heap and stack limits enforced around script
//!    execution.
//!
//! 5. **Debugging**: bridges a host debug transport to the engine
//!    inspector.

mod config;
mod context;
mod controller;
mod debug;
mod error;
mod message_loop;
mod platform;
mod scheduler;
mod scope;
mod task_runner;
mod watchdog;

#[cfg(test)]
mod testing;

pub use config::{ContextOptions, IsolateOptions, OptionsError};
pub use context::SubContext;
pub use controller::{IsolateBuilder, IsolateController};
pub use debug::{
    ChannelTransport, DebugAgent, DebugAgentFactory, DebugDirective, DirectiveHandler,
    CONTEXT_GROUP_ID, DEFAULT_DEBUG_PORT,
};
pub use error::{ErrorKind, IsolateError};
pub use platform::HostPlatform;
pub use scheduler::LockedCall;
pub use scope::{current_engine, IsolateScope};
pub use task_runner::ForegroundTaskRunner;
