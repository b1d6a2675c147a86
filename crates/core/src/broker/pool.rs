//! Long-lived connections, one per broker alias.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Broker, BrokerConnector, BrokerError};
use crate::topology::BrokerEndpoint;

#[derive(Default)]
struct Slot {
    broker: Option<Arc<dyn Broker>>,
    declared: HashSet<String>,
}

/// Lazily-connected broker connections keyed by alias.
///
/// A connection that fails a publish, runs past the publish timeout or
/// reports itself disconnected is dropped; the next publish on that alias
/// reconnects.
pub struct BrokerPool {
    connector: Arc<dyn BrokerConnector>,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
    publish_timeout: Duration,
}

impl BrokerPool {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            slots: DashMap::new(),
            publish_timeout: Duration::from_secs(5),
        }
    }

    /// Upper bound on connect, declare and confirmed publish together.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Publish `body` to `queue` on the broker behind `endpoint`.
    pub async fn publish(
        &self,
        endpoint: &BrokerEndpoint,
        queue: &str,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        let attempt = async {
            let broker = self.checkout(endpoint, queue).await?;
            broker.publish(queue, body).await
        };
        let result = tokio::time::timeout(self.publish_timeout, attempt)
            .await
            .unwrap_or_else(|_| {
                Err(BrokerError::Timeout {
                    alias: endpoint.alias.clone(),
                    after_ms: self.publish_timeout.as_millis() as u64,
                })
            });

        if let Err(e) = result {
            warn!(alias = %endpoint.alias, queue = %queue, error = %e, "Publish failed, dropping connection");
            self.invalidate(&endpoint.alias).await;
            return Err(e);
        }
        Ok(())
    }

    /// Drop the connection for `alias`, if any.
    pub async fn invalidate(&self, alias: &str) {
        let slot = self.slot(alias);
        let mut slot = slot.lock().await;
        slot.broker = None;
        slot.declared.clear();
    }

    /// Aliases with a live connection.
    pub async fn connected_aliases(&self) -> Vec<String> {
        let slots: Vec<(String, Arc<Mutex<Slot>>)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        let mut aliases = Vec::new();
        for (alias, slot) in slots {
            let slot = slot.lock().await;
            if slot.broker.as_ref().is_some_and(|b| b.is_connected()) {
                aliases.push(alias);
            }
        }
        aliases.sort();
        aliases
    }

    fn slot(&self, alias: &str) -> Arc<Mutex<Slot>> {
        let entry = self.slots.entry(alias.to_string()).or_default();
        Arc::clone(entry.value())
    }

    /// A connected broker with `queue` declared on it.
    async fn checkout(
        &self,
        endpoint: &BrokerEndpoint,
        queue: &str,
    ) -> Result<Arc<dyn Broker>, BrokerError> {
        let slot = self.slot(&endpoint.alias);
        let mut guard = slot.lock().await;
        let slot = &mut *guard;

        let broker = match slot.broker {
            Some(ref broker) if broker.is_connected() => Arc::clone(broker),
            _ => {
                slot.declared.clear();
                let broker = self.connector.connect(endpoint).await?;
                info!(alias = %endpoint.alias, "Broker connection established");
                slot.broker = Some(Arc::clone(&broker));
                broker
            }
        };

        if !slot.declared.contains(queue) {
            if let Err(e) = broker.ensure_queue(queue).await {
                slot.broker = None;
                return Err(e);
            }
            slot.declared.insert(queue.to_string());
        }

        Ok(broker)
    }
}
