//! Sub-contexts.
//!
//! Contexts registered with the controller are announced to the inspector
//! in context group [`CONTEXT_GROUP_ID`]. The front entry is the default
//! compile target and the context a debugger lands in; a context added with
//! debugging enabled goes to the front and turns debugging on.

use crate::config::ContextOptions;
use crate::controller::IsolateController;
use crate::debug::CONTEXT_GROUP_ID;
use crate::error::IsolateError;
use isogate_engine::{ContextHandle, ContextInfo};
use tracing::debug;

/// A context registered with an isolate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubContext {
    pub handle: ContextHandle,
    pub name: String,
}

impl IsolateController {
    /// Register an engine context created by the host.
    pub fn add_sub_context(
        &self,
        context: ContextHandle,
        name: &str,
        options: &ContextOptions,
    ) -> Result<(), IsolateError> {
        let _scope = self.enter();

        let entry = SubContext {
            handle: context,
            name: name.to_string(),
        };
        if options.enable_debugging {
            self.state().sub_contexts.push_front(entry);
            if let Err(err) =
                self.enable_debugging(options.debug_port, options.enable_remote_debugging)
            {
                self.state()
                    .sub_contexts
                    .retain(|entry| entry.handle != context);
                return Err(err);
            }
        } else {
            self.state().sub_contexts.push_back(entry);
        }

        let inspector = self.state().debug.inspector.clone();
        if let Some(inspector) = inspector {
            inspector.context_created(ContextInfo {
                context,
                group_id: CONTEXT_GROUP_ID,
                name: name.to_string(),
            });
        }

        debug!("Isolate '{}' added context '{}'", self.name(), name);
        Ok(())
    }

    /// Unregister a context. The engine context itself stays alive. Does
    /// nothing for a context that is not registered.
    pub fn remove_sub_context(&self, context: ContextHandle) {
        let _scope = self.enter();

        let inspector = {
            let mut state = self.state();
            let Some(index) = state
                .sub_contexts
                .iter()
                .position(|entry| entry.handle == context)
            else {
                return;
            };
            state.sub_contexts.remove(index);
            state.debug.inspector.clone()
        };

        if let Some(inspector) = inspector {
            inspector.context_destroyed(context);
        }
    }

    /// Create an engine context and register it.
    pub fn create_sub_context(
        &self,
        name: &str,
        options: &ContextOptions,
    ) -> Result<ContextHandle, IsolateError> {
        let _scope = self.enter();

        let context = self.engine.create_context(name)?;
        if let Err(err) = self.add_sub_context(context, name, options) {
            self.engine.dispose_context(context);
            return Err(err);
        }
        Ok(context)
    }

    /// Unregister a context and dispose it in the engine.
    pub fn dispose_sub_context(&self, context: ContextHandle) {
        let _scope = self.enter();
        self.remove_sub_context(context);
        self.engine.dispose_context(context);
    }

    /// Registered contexts, default first.
    pub fn sub_contexts(&self) -> Vec<SubContext> {
        self.state().sub_contexts.iter().cloned().collect()
    }

    /// The default compile and debugger target.
    pub fn default_context(&self) -> Option<ContextHandle> {
        self.state().sub_contexts.front().map(|entry| entry.handle)
    }
}
