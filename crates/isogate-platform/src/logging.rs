//! Logging bootstrap for embedders and tests.

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a compact global subscriber.
///
/// `RUST_LOG` overrides `level` when set. Returns false if a global
/// subscriber was already installed, which makes repeated calls harmless.
pub fn init(level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(Level::DEBUG);
        assert!(!init(Level::INFO));
    }
}
