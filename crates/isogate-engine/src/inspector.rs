//! Engine side of a debugging session.
//!
//! The engine creates an [`Inspector`] bound to an [`InspectorClient`]
//! supplied by the host; sessions deliver protocol output through an
//! [`InspectorChannel`]. Message contents are opaque strings here.

use crate::engine::ContextHandle;
use std::sync::Arc;

/// Describes a context announced to the inspector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    pub context: ContextHandle,
    pub group_id: i32,
    pub name: String,
}

/// Host callbacks invoked by the inspector, always on the thread holding
/// the execution lock.
pub trait InspectorClient: Send + Sync {
    /// Block in a nested message loop while execution is paused.
    fn run_message_loop_on_pause(&self, group_id: i32);

    fn quit_message_loop_on_pause(&self);

    fn run_if_waiting_for_debugger(&self, group_id: i32);

    /// Context used when the debugger needs one and none was specified.
    fn ensure_default_context_in_group(&self, group_id: i32) -> Option<ContextHandle>;

    fn current_time_ms(&self) -> f64;
}

/// Outbound protocol messages.
pub trait InspectorChannel: Send + Sync {
    fn send_response(&self, call_id: i64, message: String);

    fn send_notification(&self, message: String);

    fn flush_protocol_notifications(&self) {}
}

/// Engine-side inspector.
pub trait Inspector: Send + Sync {
    fn context_created(&self, info: ContextInfo);

    fn context_destroyed(&self, context: ContextHandle);

    fn connect(&self, group_id: i32, channel: Arc<dyn InspectorChannel>)
    -> Arc<dyn InspectorSession>;
}

/// A live protocol session.
pub trait InspectorSession: Send + Sync {
    fn dispatch_protocol_message(&self, message: &str);

    fn schedule_pause_on_next_statement(&self, reason: &str, detail: &str);
}
