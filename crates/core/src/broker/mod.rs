//! Broker connections: the AMQP transport, an in-process stand-in, and the
//! per-alias connection pool.

mod amqp;
mod memory;
mod pool;
mod types;

pub use amqp::{AmqpBroker, AmqpConnector};
pub use memory::{InMemoryBroker, InMemoryConnector};
pub use pool::BrokerPool;
pub use types::{Broker, BrokerConnector, BrokerError};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::topology::BrokerEndpoint;

/// Picks the transport from the endpoint URL scheme: `memory://` goes to
/// the shared in-process connector, everything else to AMQP.
pub struct SchemeConnector {
    amqp: AmqpConnector,
    memory: Arc<InMemoryConnector>,
}

impl SchemeConnector {
    pub fn new() -> Self {
        Self::with_memory(Arc::new(InMemoryConnector::new()))
    }

    pub fn with_memory(memory: Arc<InMemoryConnector>) -> Self {
        Self {
            amqp: AmqpConnector::default(),
            memory,
        }
    }

    /// Bound the AMQP connection handshake.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.amqp = AmqpConnector::new(timeout);
        self
    }

    pub fn memory(&self) -> &Arc<InMemoryConnector> {
        &self.memory
    }
}

impl Default for SchemeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerConnector for SchemeConnector {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Broker>, BrokerError> {
        if endpoint.is_in_memory() {
            self.memory.connect(endpoint).await
        } else {
            self.amqp.connect(endpoint).await
        }
    }
}
