//! Isolate and sub-context options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options applied when an isolate is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolateOptions {
    /// Enable debugging during construction
    pub enable_debugging: bool,

    /// Debugger port (0 selects the default port)
    pub debug_port: u16,

    /// Accept debugger connections from other machines
    pub enable_remote_debugging: bool,

    /// Soft heap limit in bytes (0 = unlimited)
    pub max_heap_size: usize,

    /// Soft stack usage limit in bytes (0 = unlimited)
    pub max_stack_usage: usize,

    /// Heap sampling interval while a heap limit is enforced (ms)
    pub heap_size_sample_interval_ms: u64,
}

impl IsolateOptions {
    /// Options for untrusted scripts: tight heap and stack limits
    pub fn sandboxed() -> Self {
        Self {
            max_heap_size: 64 * 1024 * 1024, // 64 MB
            max_stack_usage: 256 * 1024,     // 256 KB
            heap_size_sample_interval_ms: 500,
            ..Self::default()
        }
    }

    /// Options with a local debugger listening on `port`
    pub fn debuggable(port: u16) -> Self {
        Self {
            enable_debugging: true,
            debug_port: port,
            ..Self::default()
        }
    }

    /// Heap sampling interval as a duration.
    pub fn heap_size_sample_interval(&self) -> Duration {
        Duration::from_millis(self.heap_size_sample_interval_ms)
    }

    /// Validate options
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.enable_remote_debugging && !self.enable_debugging {
            return Err(OptionsError::RemoteWithoutDebugging);
        }
        Ok(())
    }
}

/// Options applied when a sub-context is added
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Enable debugging and make this the default debugger target
    pub enable_debugging: bool,

    /// Debugger port (0 selects the default port)
    pub debug_port: u16,

    /// Accept debugger connections from other machines
    pub enable_remote_debugging: bool,
}

impl ContextOptions {
    /// Options for a debuggable context
    pub fn debuggable(port: u16) -> Self {
        Self {
            enable_debugging: true,
            debug_port: port,
            enable_remote_debugging: false,
        }
    }
}

/// Option validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum OptionsError {
    #[error("Remote debugging requires debugging to be enabled")]
    RemoteWithoutDebugging,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let sandboxed = IsolateOptions::sandboxed();
        assert!(sandboxed.validate().is_ok());
        assert_eq!(
            sandboxed.heap_size_sample_interval(),
            Duration::from_millis(500)
        );

        let debuggable = IsolateOptions::debuggable(9229);
        assert!(debuggable.enable_debugging);
        assert!(debuggable.validate().is_ok());
    }

    #[test]
    fn test_remote_requires_debugging() {
        let options = IsolateOptions {
            enable_remote_debugging: true,
            ..IsolateOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(OptionsError::RemoteWithoutDebugging)
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: IsolateOptions =
            serde_json::from_str(r#"{"max_heap_size":1048576,"enable_debugging":true}"#).unwrap();

        assert_eq!(options.max_heap_size, 1024 * 1024);
        assert!(options.enable_debugging);
        assert_eq!(options.debug_port, 0);
        assert_eq!(options.max_stack_usage, 0);

        let context: ContextOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(context, ContextOptions::default());
    }
}
