//! Container and closer settings.
//!
//! Both structs deserialize with `serde` and fill missing fields from
//! their defaults, so they can be embedded in an application's own
//! configuration file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Window during which repeated change signals count as one edit.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Settings for a [`Container`](crate::container::Container).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Minimum interval between accepted change signals.
    pub debounce: Duration,
    /// Arm SIGINT/SIGTERM handling on every generation's closer.
    pub handle_signals: bool,
    /// Teardown settings applied to every generation's closer.
    pub closer: CloserConfig,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            handle_signals: true,
            closer: CloserConfig::default(),
        }
    }
}

/// Settings for a [`Closer`](crate::closer::Closer).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloserConfig {
    /// Upper bound on the whole teardown fan-out.
    ///
    /// `None` waits for every callback however long it takes. With a bound,
    /// callbacks still running when it expires are abandoned and reported.
    pub teardown_timeout: Option<Duration>,
}

impl CloserConfig {
    /// Bounds the teardown fan-out.
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert!(config.handle_signals);
        assert_eq!(config.closer.teardown_timeout, None);
    }

    #[test]
    fn partial_input_keeps_defaults() {
        let config: ContainerConfig =
            serde_json::from_str(r#"{ "handle_signals": false }"#).unwrap();
        assert!(!config.handle_signals);
        assert_eq!(config.debounce, DEFAULT_DEBOUNCE);
        assert_eq!(config.closer, CloserConfig::default());

        let config: ContainerConfig = serde_json::from_str(
            r#"{ "closer": { "teardown_timeout": { "secs": 5, "nanos": 0 } } }"#,
        )
        .unwrap();
        assert!(config.handle_signals);
        assert_eq!(config.closer.teardown_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn closer_timeout_setter() {
        let config = CloserConfig::default().with_teardown_timeout(Duration::from_secs(5));
        assert_eq!(config.teardown_timeout, Some(Duration::from_secs(5)));
    }
}
