//! Broker registry: logical broker alias to connection parameters.

use std::collections::BTreeMap;

use serde::Serialize;

use super::TopologyError;
use crate::config::{BrokerConfig, ConfigError};

/// URL schemes accepted for broker endpoints.
const SUPPORTED_SCHEMES: &[&str] = &["amqp://", "amqps://", "memory://"];

/// Physical connection parameters for one broker alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerEndpoint {
    pub alias: String,
    #[serde(skip)]
    pub url: String,
    pub connection_name: String,
}

impl BrokerEndpoint {
    /// URL with any user-info (credentials) stripped, safe for logs.
    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }

    /// Whether this endpoint points at the in-process broker.
    pub fn is_in_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

/// Strip `user:password@` from a URL.
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***@{}", &url[..scheme_end + 3], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

/// Immutable alias -> endpoint lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerRegistry {
    endpoints: BTreeMap<String, BrokerEndpoint>,
}

impl BrokerRegistry {
    /// Build the registry from the `[brokers]` config section.
    pub fn from_config(brokers: &BTreeMap<String, BrokerConfig>) -> Result<Self, ConfigError> {
        let mut endpoints = BTreeMap::new();
        for (alias, cfg) in brokers {
            if alias.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "broker alias cannot be empty".to_string(),
                ));
            }
            if !SUPPORTED_SCHEMES.iter().any(|s| cfg.url.starts_with(s)) {
                return Err(ConfigError::ValidationError(format!(
                    "broker {} has unsupported url {}",
                    alias,
                    redact_url(&cfg.url)
                )));
            }
            endpoints.insert(
                alias.clone(),
                BrokerEndpoint {
                    alias: alias.clone(),
                    url: cfg.url.clone(),
                    connection_name: cfg
                        .connection_name
                        .clone()
                        .unwrap_or_else(|| format!("pulse-{}", alias.to_lowercase())),
                },
            );
        }
        Ok(Self { endpoints })
    }

    pub fn resolve(&self, alias: &str) -> Result<&BrokerEndpoint, TopologyError> {
        self.endpoints
            .get(alias)
            .ok_or_else(|| TopologyError::UnknownBroker(alias.to_string()))
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.endpoints.contains_key(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &BrokerEndpoint> {
        self.endpoints.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
