use thiserror::Error;

use crate::topology::TopologyError;

/// Dispatch failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Transient: the broker could not be reached after retries, or is
    /// currently marked down.
    #[error("broker {broker} unreachable: {reason}")]
    BrokerUnreachable { broker: String, reason: String },

    /// Permanent misconfiguration. Retrying will not help.
    #[error("routing error: {0}")]
    Routing(String),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::BrokerUnreachable { .. })
    }
}

impl From<TopologyError> for DispatchError {
    fn from(e: TopologyError) -> Self {
        DispatchError::Routing(e.to_string())
    }
}
