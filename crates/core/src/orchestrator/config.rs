//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the pipeline orchestrator's background loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Enable/disable the background loops.
    /// When disabled, timeouts and redispatch only happen on demand.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often to look for items past their stage deadline (milliseconds).
    #[serde(default = "default_sweep_interval")]
    pub timeout_sweep_interval_ms: u64,

    /// How often to republish tickets that never made it to a broker
    /// (milliseconds). Also the minimum age of an undispatched ticket
    /// before it is retried.
    #[serde(default = "default_redispatch_interval")]
    pub redispatch_interval_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    5000 // 5 seconds
}

fn default_redispatch_interval() -> u64 {
    10_000 // 10 seconds
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            timeout_sweep_interval_ms: default_sweep_interval(),
            redispatch_interval_ms: default_redispatch_interval(),
        }
    }
}

impl OrchestratorConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_sweep_interval_ms)
    }

    pub fn redispatch_interval(&self) -> Duration {
        Duration::from_millis(self.redispatch_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert!(config.enabled);
        assert_eq!(config.timeout_sweep_interval_ms, 5000);
        assert_eq!(config.redispatch_interval_ms, 10_000);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            enabled = false
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.timeout_sweep_interval_ms, 5000);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            enabled = true
            timeout_sweep_interval_ms = 1000
            redispatch_interval_ms = 2500
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.redispatch_interval(), Duration::from_millis(2500));
    }
}
