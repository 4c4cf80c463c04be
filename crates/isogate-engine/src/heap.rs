//! Heap statistics reported by an engine.

/// Snapshot of an engine's heap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStatistics {
    /// Bytes reserved for the heap
    pub total_heap_size: usize,
    /// Bytes reserved for executable code
    pub total_heap_size_executable: usize,
    /// Committed physical memory
    pub total_physical_size: usize,
    /// Bytes occupied by live objects
    pub used_heap_size: usize,
    /// Hard limit enforced by the engine itself
    pub heap_size_limit: usize,
}

impl HeapStatistics {
    /// Check whether the total heap size exceeds `limit` bytes.
    pub fn exceeds(&self, limit: usize) -> bool {
        self.total_heap_size > limit
    }

    /// Used heap as a percentage of the engine's own limit
    pub fn utilization(&self) -> f32 {
        if self.heap_size_limit == 0 {
            return 0.0;
        }
        (self.used_heap_size as f32 / self.heap_size_limit as f32) * 100.0
    }

    /// Format as human-readable string
    pub fn format(&self) -> String {
        format!(
            "Heap: {:.2}MB total, {:.2}MB used, {:.2}MB limit",
            self.total_heap_size as f64 / (1024.0 * 1024.0),
            self.used_heap_size as f64 / (1024.0 * 1024.0),
            self.heap_size_limit as f64 / (1024.0 * 1024.0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exceeds_is_strict() {
        let stats = HeapStatistics {
            total_heap_size: 1024,
            ..HeapStatistics::default()
        };

        assert!(stats.exceeds(1023));
        assert!(!stats.exceeds(1024));
    }

    #[test]
    fn test_utilization() {
        let stats = HeapStatistics {
            used_heap_size: 256,
            heap_size_limit: 1024,
            ..HeapStatistics::default()
        };

        assert_eq!(stats.utilization(), 25.0);
        assert_eq!(HeapStatistics::default().utilization(), 0.0);
        assert!(stats.format().starts_with("Heap: "));
    }
}
