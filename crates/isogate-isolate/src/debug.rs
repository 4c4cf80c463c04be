//! Debug session bridge.
//!
//! Connects a host-supplied debug transport to the engine inspector. The
//! transport delivers directives from any thread; each one re-enters the
//! isolate through [`IsolateController::call_with_lock_no_wait`], so it runs
//! right away when the isolate is idle and otherwise waits for the thread
//! inside (typically one paused in the message loop) to pick it up.

use crate::controller::IsolateController;
use crate::error::IsolateError;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use isogate_engine::{ContextHandle, Inspector, InspectorChannel, InspectorClient, InspectorSession};
use isogate_platform::clock;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Context group shared by every sub-context of an isolate
pub const CONTEXT_GROUP_ID: i32 = 1;

/// Port used when debugging is enabled with port 0
pub const DEFAULT_DEBUG_PORT: u16 = 9222;

const BREAK_ON_CONNECTION: &str = "Break on debugger connection";

/// Instruction from a debug transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugDirective {
    ConnectClient,
    SendCommand(String),
    DisconnectClient,
}

/// Callback a transport invokes for each directive. Callable from any thread.
pub type DirectiveHandler = Arc<dyn Fn(DebugDirective) + Send + Sync + 'static>;

/// Outbound half of a debug transport.
pub trait DebugAgent: Send + Sync {
    /// Deliver a protocol message to the connected client.
    fn send_message(&self, message: &str);
}

/// Creates debug agents. Supplied by the host.
pub trait DebugAgentFactory: Send + Sync {
    fn create_agent(
        &self,
        name: &str,
        version: &str,
        port: u16,
        remote: bool,
        handler: DirectiveHandler,
    ) -> io::Result<Box<dyn DebugAgent>>;
}

/// Debugger state guarded by the data mutex.
#[derive(Default)]
pub(crate) struct DebugState {
    enabled: bool,
    port: u16,
    agent: Option<Arc<dyn DebugAgent>>,
    pub(crate) inspector: Option<Arc<dyn Inspector>>,
    session: Option<Arc<dyn InspectorSession>>,
}

impl IsolateController {
    /// Start a debug agent and an inspector for this isolate.
    ///
    /// Does nothing if debugging is already enabled. Port 0 selects
    /// [`DEFAULT_DEBUG_PORT`].
    pub fn enable_debugging(&self, port: u16, remote: bool) -> Result<(), IsolateError> {
        let _scope = self.enter();

        if self.state().debug.enabled {
            return Ok(());
        }

        let factory = self
            .debug_agent_factory
            .as_ref()
            .ok_or(IsolateError::DebuggerUnavailable)?;
        let port = if port == 0 { DEFAULT_DEBUG_PORT } else { port };

        let controller = self.weak_self.clone();
        let handler: DirectiveHandler = Arc::new(move |directive| {
            if let Some(controller) = controller.upgrade() {
                controller.call_with_lock_no_wait(move |controller| {
                    controller.handle_debug_directive(directive);
                });
            }
        });

        let agent: Arc<dyn DebugAgent> = Arc::from(factory.create_agent(
            self.name(),
            &self.engine.version(),
            port,
            remote,
            handler,
        )?);
        let inspector = self.engine.create_inspector(Arc::new(InspectorBridge {
            controller: self.weak_self.clone(),
        }))?;

        {
            let mut state = self.state();
            state.debug.enabled = true;
            state.debug.port = port;
            state.debug.agent = Some(agent);
            state.debug.inspector = Some(inspector);
        }

        info!(
            "Isolate '{}' debugging enabled on port {}{}",
            self.name(),
            port,
            if remote { " (remote)" } else { "" }
        );
        Ok(())
    }

    /// Tear down the session, the inspector and the agent, in that order.
    pub fn disable_debugging(&self) {
        let _scope = self.enter();

        let debug = {
            let mut state = self.state();
            if !state.debug.enabled {
                return;
            }
            mem::take(&mut state.debug)
        };

        let DebugState {
            port,
            agent,
            inspector,
            session,
            ..
        } = debug;
        drop(session);
        drop(inspector);
        drop(agent);

        info!("Isolate '{}' debugging disabled (port {})", self.name(), port);
    }

    pub fn is_debugging_enabled(&self) -> bool {
        self.state().debug.enabled
    }

    /// Port of the debug agent, while debugging is enabled.
    pub fn debug_port(&self) -> Option<u16> {
        let state = self.state();
        state.debug.enabled.then_some(state.debug.port)
    }

    pub fn has_debug_session(&self) -> bool {
        self.state().debug.session.is_some()
    }

    /// Block until a debugger connects and resumes, then break on the next
    /// statement.
    ///
    /// Returns an `Interrupt` error if the wait is cancelled with
    /// [`IsolateController::cancel_await_debugger`]. Does nothing when
    /// debugging is disabled.
    pub fn await_debugger_and_pause(&self) -> Result<(), IsolateError> {
        let _scope = self.enter();

        let (enabled, connected) = {
            let state = self.state();
            (state.debug.enabled, state.debug.session.is_some())
        };
        if !enabled {
            return Ok(());
        }

        if !connected {
            info!("Isolate '{}' waiting for a debugger", self.name());
            if !self.run_message_loop(true) {
                return Err(IsolateError::Interrupted {
                    name: self.name().to_string(),
                });
            }
        }

        let session = self.state().debug.session.clone();
        if let Some(session) = session {
            session.schedule_pause_on_next_statement(BREAK_ON_CONNECTION, BREAK_ON_CONNECTION);
        }
        Ok(())
    }

    fn handle_debug_directive(&self, directive: DebugDirective) {
        match directive {
            DebugDirective::ConnectClient => self.connect_debug_client(),
            DebugDirective::SendCommand(command) => self.send_debug_command(&command),
            DebugDirective::DisconnectClient => self.disconnect_debug_client(),
        }
    }

    fn connect_debug_client(&self) {
        let inspector = {
            let state = self.state();
            if state.debug.session.is_some() {
                return;
            }
            state.debug.inspector.clone()
        };

        if let Some(inspector) = inspector {
            let channel = Arc::new(InspectorBridge {
                controller: self.weak_self.clone(),
            });
            let session = inspector.connect(CONTEXT_GROUP_ID, channel);
            self.state().debug.session = Some(session);
            debug!("Isolate '{}' debugger connected", self.name());
        }
    }

    fn send_debug_command(&self, command: &str) {
        let session = self.state().debug.session.clone();
        if let Some(session) = session {
            session.dispatch_protocol_message(command);
        }
    }

    fn disconnect_debug_client(&self) {
        let session = self.state().debug.session.take();
        if session.is_some() {
            debug!("Isolate '{}' debugger disconnected", self.name());
        }
        drop(session);
    }

    fn send_debug_message(&self, message: &str) {
        let agent = self.state().debug.agent.clone();
        if let Some(agent) = agent {
            agent.send_message(message);
        }
    }
}

/// Inspector client and channel of an isolate.
struct InspectorBridge {
    controller: Weak<IsolateController>,
}

impl InspectorClient for InspectorBridge {
    fn run_message_loop_on_pause(&self, _group_id: i32) {
        if let Some(controller) = self.controller.upgrade() {
            controller.run_message_loop(false);
        }
    }

    fn quit_message_loop_on_pause(&self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.quit_message_loop();
        }
    }

    fn run_if_waiting_for_debugger(&self, _group_id: i32) {
        self.quit_message_loop_on_pause();
    }

    fn ensure_default_context_in_group(&self, _group_id: i32) -> Option<ContextHandle> {
        self.controller
            .upgrade()
            .and_then(|controller| controller.default_context())
    }

    fn current_time_ms(&self) -> f64 {
        clock::relative_millis()
    }
}

impl InspectorChannel for InspectorBridge {
    fn send_response(&self, _call_id: i64, message: String) {
        if let Some(controller) = self.controller.upgrade() {
            controller.send_debug_message(&message);
        }
    }

    fn send_notification(&self, message: String) {
        self.send_response(0, message);
    }
}

struct TransportShared {
    handler: Mutex<Option<DirectiveHandler>>,
    endpoint: Mutex<Option<(u16, bool)>>,
    outbound_tx: Sender<String>,
    outbound_rx: Receiver<String>,
    agents_created: AtomicUsize,
    agents_dropped: AtomicUsize,
}

impl TransportShared {
    fn handler(&self) -> MutexGuard<'_, Option<DirectiveHandler>> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process debug transport backed by channels.
///
/// The client side drives the isolate with [`ChannelTransport::connect`],
/// [`ChannelTransport::send`] and [`ChannelTransport::disconnect`], and reads
/// protocol output with [`ChannelTransport::recv_timeout`]. Clones share the
/// same transport.
#[derive(Clone)]
pub struct ChannelTransport {
    shared: Arc<TransportShared>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = unbounded();
        Self {
            shared: Arc::new(TransportShared {
                handler: Mutex::new(None),
                endpoint: Mutex::new(None),
                outbound_tx,
                outbound_rx,
                agents_created: AtomicUsize::new(0),
                agents_dropped: AtomicUsize::new(0),
            }),
        }
    }

    /// Deliver a directive to the isolate. Returns false when no agent is
    /// attached.
    pub fn deliver(&self, directive: DebugDirective) -> bool {
        let handler = self.shared.handler().clone();
        match handler {
            Some(handler) => {
                handler(directive);
                true
            }
            None => false,
        }
    }

    pub fn connect(&self) -> bool {
        self.deliver(DebugDirective::ConnectClient)
    }

    pub fn send(&self, command: impl Into<String>) -> bool {
        self.deliver(DebugDirective::SendCommand(command.into()))
    }

    pub fn disconnect(&self) -> bool {
        self.deliver(DebugDirective::DisconnectClient)
    }

    /// Next protocol message sent to the client.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.shared.outbound_rx.recv_timeout(timeout)
    }

    /// Port and remote flag of the most recently created agent.
    pub fn endpoint(&self) -> Option<(u16, bool)> {
        *self
            .shared
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn agents_created(&self) -> usize {
        self.shared.agents_created.load(Ordering::SeqCst)
    }

    pub fn agents_dropped(&self) -> usize {
        self.shared.agents_dropped.load(Ordering::SeqCst)
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugAgentFactory for ChannelTransport {
    fn create_agent(
        &self,
        name: &str,
        version: &str,
        port: u16,
        remote: bool,
        handler: DirectiveHandler,
    ) -> io::Result<Box<dyn DebugAgent>> {
        *self.shared.handler() = Some(handler);
        *self
            .shared
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((port, remote));
        self.shared.agents_created.fetch_add(1, Ordering::SeqCst);

        debug!("Debug agent for '{}' ({}) listening on port {}", name, version, port);
        Ok(Box::new(ChannelAgent {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct ChannelAgent {
    shared: Arc<TransportShared>,
}

impl DebugAgent for ChannelAgent {
    fn send_message(&self, message: &str) {
        let _ = self.shared.outbound_tx.send(message.to_string());
    }
}

impl Drop for ChannelAgent {
    fn drop(&mut self) {
        self.shared.handler().take();
        self.shared.agents_dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolateOptions;
    use crate::controller::IsolateBuilder;
    use crate::error::ErrorKind;
    use crate::testing::{build, wait_until};
    use isogate_engine::SimEngine;
    use serde_json::{json, Value};
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn debuggable(sim: &SimEngine, transport: &ChannelTransport) -> Arc<IsolateController> {
        IsolateBuilder::new("debuggee")
            .options(IsolateOptions::debuggable(0))
            .debug_agent_factory(Arc::new(transport.clone()))
            .build(sim)
            .unwrap()
    }

    fn next_message(transport: &ChannelTransport) -> Value {
        let message = transport.recv_timeout(TIMEOUT).unwrap();
        serde_json::from_str(&message).unwrap()
    }

    #[test]
    fn test_enable_and_disable_are_idempotent() -> anyhow::Result<()> {
        let sim = SimEngine::new();
        let transport = ChannelTransport::new();
        let controller = debuggable(&sim, &transport);

        controller.enable_debugging(4000, true)?;
        assert_eq!(transport.agents_created(), 1);
        assert_eq!(transport.endpoint(), Some((DEFAULT_DEBUG_PORT, false)));
        assert_eq!(controller.debug_port(), Some(DEFAULT_DEBUG_PORT));

        controller.disable_debugging();
        controller.disable_debugging();
        assert_eq!(transport.agents_dropped(), 1);
        assert!(!controller.is_debugging_enabled());
        assert_eq!(controller.debug_port(), None);
        assert!(!transport.connect());

        controller.enable_debugging(4000, true)?;
        assert_eq!(transport.endpoint(), Some((4000, true)));
        assert_eq!(transport.agents_created(), 2);
        Ok(())
    }

    #[test]
    fn test_enable_without_factory_fails() {
        let sim = SimEngine::new();
        let controller = build(&sim);

        let err = controller.enable_debugging(0, false).unwrap_err();
        assert!(matches!(err, IsolateError::DebuggerUnavailable));
        assert!(!controller.is_debugging_enabled());
    }

    #[test]
    fn test_commands_round_trip() {
        let sim = SimEngine::new();
        let transport = ChannelTransport::new();
        let controller = debuggable(&sim, &transport);
        let inspector = sim.inspector().unwrap();

        // Commands before a client connects go nowhere
        assert!(transport.send(json!({ "id": 1, "method": "Runtime.enable" }).to_string()));
        assert!(inspector.messages().is_empty());

        assert!(transport.connect());
        assert!(transport.connect());
        assert!(controller.has_debug_session());
        assert_eq!(inspector.session_count(), 1);

        transport.send(json!({ "id": 2, "method": "Runtime.enable" }).to_string());
        assert_eq!(next_message(&transport), json!({ "id": 2, "result": {} }));

        transport.disconnect();
        assert!(!controller.has_debug_session());
        assert_eq!(inspector.session_count(), 0);
    }

    #[test]
    fn test_await_debugger_until_client_runs() {
        let sim = SimEngine::new();
        let transport = ChannelTransport::new();
        let controller = debuggable(&sim, &transport);

        let waiter = Arc::clone(&controller);
        let handle = thread::spawn(move || waiter.await_debugger_and_pause());
        assert!(wait_until(|| controller.is_awaiting_debugger()));

        transport.connect();
        transport.send(json!({ "id": 1, "method": "Runtime.runIfWaitingForDebugger" }).to_string());

        assert!(handle.join().unwrap().is_ok());
        assert!(!controller.is_awaiting_debugger());
        assert_eq!(
            sim.inspector().unwrap().pauses(),
            vec![(BREAK_ON_CONNECTION.to_string(), BREAK_ON_CONNECTION.to_string())]
        );
    }

    #[test]
    fn test_await_debugger_cancelled() {
        let sim = SimEngine::new();
        let transport = ChannelTransport::new();
        let controller = debuggable(&sim, &transport);

        let waiter = Arc::clone(&controller);
        let handle = thread::spawn(move || waiter.await_debugger_and_pause());
        assert!(wait_until(|| controller.is_awaiting_debugger()));

        controller.cancel_await_debugger();
        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interrupt);
        assert!(sim.inspector().unwrap().pauses().is_empty());
    }

    #[test]
    fn test_await_debugger_without_debugging_returns() -> anyhow::Result<()> {
        let sim = SimEngine::new();
        let controller = build(&sim);

        controller.await_debugger_and_pause()?;
        assert!(!controller.is_in_message_loop());
        Ok(())
    }

    #[test]
    fn test_pause_is_resumed_from_another_thread() {
        let sim = SimEngine::new();
        let transport = ChannelTransport::new();
        let controller = debuggable(&sim, &transport);
        transport.connect();

        // The pausing thread stays inside the isolate until resumed
        let client = transport.clone();
        let paused = thread::spawn(move || {
            client.send(json!({ "id": 1, "method": "Debugger.pause" }).to_string())
        });
        assert!(wait_until(|| controller.is_in_message_loop()));

        transport.send(json!({ "id": 2, "method": "Debugger.resume" }).to_string());
        assert!(paused.join().unwrap());
        assert!(!controller.is_in_message_loop());

        assert_eq!(next_message(&transport)["id"], 1);
        assert_eq!(next_message(&transport)["method"], "Debugger.paused");
        assert_eq!(next_message(&transport)["id"], 2);
    }

    #[test]
    fn test_inspector_bridge_reports_default_context() -> anyhow::Result<()> {
        let sim = SimEngine::new();
        let transport = ChannelTransport::new();
        let controller = debuggable(&sim, &transport);
        let bridge = InspectorBridge {
            controller: Arc::downgrade(&controller),
        };
        assert_eq!(bridge.ensure_default_context_in_group(CONTEXT_GROUP_ID), None);

        let context = controller.create_sub_context("main", &Default::default())?;
        assert_eq!(
            bridge.ensure_default_context_in_group(CONTEXT_GROUP_ID),
            Some(context)
        );
        assert!(bridge.current_time_ms() >= 0.0);
        Ok(())
    }
}
