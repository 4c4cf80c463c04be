//! Monotonic and wall clocks.
//!
//! Relative time is measured from a process-wide origin captured on first
//! use. The origin is never reset.

use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

static ORIGIN: OnceLock<Instant> = OnceLock::new();

fn origin() -> Instant {
    *ORIGIN.get_or_init(Instant::now)
}

/// Time elapsed since the process-wide origin.
pub fn elapsed() -> Duration {
    origin().elapsed()
}

/// Monotonic time in seconds since the process-wide origin.
pub fn relative_seconds() -> f64 {
    elapsed().as_secs_f64()
}

/// Monotonic time in milliseconds since the process-wide origin.
pub fn relative_millis() -> f64 {
    relative_seconds() * 1000.0
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn current_time_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Number of hardware threads available to the process (at least 1).
pub fn hardware_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_relative_time_is_monotonic() {
        let first = relative_seconds();
        thread::sleep(Duration::from_millis(5));
        let second = relative_seconds();

        assert!(second > first);
        assert!(relative_millis() >= second * 1000.0);
    }

    #[test]
    fn test_wall_clock_is_after_epoch() {
        assert!(current_time_millis() > 0.0);
        assert!(hardware_concurrency() >= 1);
    }
}
