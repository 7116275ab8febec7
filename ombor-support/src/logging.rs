//! Tracing subscriber setup for binaries and demos.
//!
//! Library crates in this workspace only emit `tracing` events; installing
//! a subscriber is left to the process entry point.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber filtered by `RUST_LOG`.
///
/// Falls back to `default_directives` (for example `"ombor=debug"`) when
/// `RUST_LOG` is unset or invalid. Returns an error if a global subscriber
/// is already installed.
pub fn init_tracing(
    default_directives: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_error() {
        // One global subscriber per process.
        let _ = init_tracing("ombor=debug");
        assert!(init_tracing("ombor=debug").is_err());
    }
}
