//! Isolate Memory Constraints
//!
//! Heap space limits applied when an engine instance is created.

use serde::{Deserialize, Serialize};

const MB: usize = 1024 * 1024;

/// Memory constraints for a new engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolateConstraints {
    /// Maximum young-generation size (MB)
    pub max_new_space_size: usize,

    /// Maximum old-generation size (MB)
    pub max_old_space_size: usize,
}

impl Default for IsolateConstraints {
    fn default() -> Self {
        Self::balanced()
    }
}

impl IsolateConstraints {
    /// Constraints for ultra-low memory usage
    pub fn ultra_low() -> Self {
        Self {
            max_new_space_size: 1,  // 1 MB nursery
            max_old_space_size: 16, // 16 MB old space
        }
    }

    /// Constraints balancing throughput and footprint
    pub fn balanced() -> Self {
        Self {
            max_new_space_size: 4,
            max_old_space_size: 64,
        }
    }

    /// Constraints for maximum performance
    pub fn performance() -> Self {
        Self {
            max_new_space_size: 16,
            max_old_space_size: 512,
        }
    }

    /// Semi-space size in KB as engines usually expect it.
    pub fn max_semi_space_size_kb(&self) -> usize {
        self.max_new_space_size * 1024
    }

    /// Total heap budget implied by the constraints, in bytes.
    pub fn heap_budget(&self) -> usize {
        (self.max_new_space_size + self.max_old_space_size) * MB
    }

    /// Validate constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_old_space_size == 0 {
            return Err(ConfigError::EmptyOldSpace);
        }
        if self.max_new_space_size > self.max_old_space_size {
            return Err(ConfigError::NewSpaceTooLarge);
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Old space size must be at least 1MB")]
    EmptyOldSpace,

    #[error("New space size cannot exceed old space size")]
    NewSpaceTooLarge,
}
