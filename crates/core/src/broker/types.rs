//! Broker transport abstraction.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::topology::BrokerEndpoint;

/// Transport-level failures. All of them are considered transient.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection to {alias} failed: {reason}")]
    Connection { alias: String, reason: String },

    #[error("broker {0} is offline")]
    Offline(String),

    #[error("declare of queue {queue} failed: {reason}")]
    Declare { queue: String, reason: String },

    #[error("publish to {queue} failed: {reason}")]
    Publish { queue: String, reason: String },

    #[error("publish to {0} was not acknowledged")]
    Nacked(String),

    #[error("{alias} did not answer within {after_ms}ms")]
    Timeout { alias: String, after_ms: u64 },
}

/// A live connection to one broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a durable queue if it does not already exist.
    async fn ensure_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Publish one persistent message to `queue` via the default exchange
    /// and wait for the broker to confirm it.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Whether the underlying connection is still usable.
    fn is_connected(&self) -> bool;
}

/// Opens connections for broker endpoints.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Broker>, BrokerError>;
}
