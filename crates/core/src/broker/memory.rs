//! In-process broker for tests and `memory://` endpoints.
//!
//! Messages are kept per queue in publish order. A broker can be switched
//! offline to simulate an outage: connects and publishes then fail until it
//! is switched back. A stalled broker accepts publishes but never confirms
//! them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Broker, BrokerConnector, BrokerError};
use crate::topology::BrokerEndpoint;

/// One in-memory broker, shared by every connection to its alias.
pub struct InMemoryBroker {
    alias: String,
    online: AtomicBool,
    stalled: AtomicBool,
    publish_calls: AtomicUsize,
    queues: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl InMemoryBroker {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            online: AtomicBool::new(true),
            stalled: AtomicBool::new(false),
            publish_calls: AtomicUsize::new(0),
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Publishes started against this broker, confirmed or not.
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    /// Raw message bodies in `queue`, oldest first.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock_queues()
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Messages in `queue` decoded as JSON. Undecodable bodies are skipped.
    pub fn json_messages(&self, queue: &str) -> Vec<serde_json::Value> {
        self.messages(queue)
            .iter()
            .filter_map(|body| serde_json::from_slice(body).ok())
            .collect()
    }

    pub fn message_count(&self, queue: &str) -> usize {
        self.lock_queues().get(queue).map_or(0, Vec::len)
    }

    pub fn total_messages(&self) -> usize {
        self.lock_queues().values().map(Vec::len).sum()
    }

    /// Queues that have been declared or published to.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_queues().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Vec<u8>>>> {
        // A panic while holding this lock cannot leave the map inconsistent.
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self) -> Result<(), BrokerError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(BrokerError::Offline(self.alias.clone()))
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ensure_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.check_online()?;
        self.lock_queues().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        self.check_online()?;
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.lock_queues()
            .entry(queue.to_string())
            .or_default()
            .push(body.to_vec());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_online()
    }
}

/// Hands out one shared [`InMemoryBroker`] per alias.
#[derive(Default)]
pub struct InMemoryConnector {
    brokers: DashMap<String, Arc<InMemoryBroker>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The broker for `alias`, created on first use.
    pub fn broker(&self, alias: &str) -> Arc<InMemoryBroker> {
        let entry = self
            .brokers
            .entry(alias.to_string())
            .or_insert_with(|| Arc::new(InMemoryBroker::new(alias)));
        Arc::clone(entry.value())
    }

    pub fn set_online(&self, alias: &str, online: bool) {
        self.broker(alias).set_online(online);
    }

    pub fn set_stalled(&self, alias: &str, stalled: bool) {
        self.broker(alias).set_stalled(stalled);
    }
}

#[async_trait]
impl BrokerConnector for InMemoryConnector {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Broker>, BrokerError> {
        let broker = self.broker(&endpoint.alias);
        broker.check_online()?;
        Ok(broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(alias: &str) -> BrokerEndpoint {
        BrokerEndpoint {
            alias: alias.to_string(),
            url: format!("memory://{}", alias.to_lowercase()),
            connection_name: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_keeps_order_per_queue() {
        let connector = InMemoryConnector::new();
        let broker = connector.connect(&endpoint("AMQP-FC")).await.unwrap();

        broker.ensure_queue("fc-sips").await.unwrap();
        broker.publish("fc-sips", b"{\"n\":1}").await.unwrap();
        broker.publish("fc-sips", b"{\"n\":2}").await.unwrap();
        broker.publish("fc-err", b"{\"n\":3}").await.unwrap();

        let inner = connector.broker("AMQP-FC");
        let messages = inner.json_messages("fc-sips");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["n"], 1);
        assert_eq!(messages[1]["n"], 2);
        assert_eq!(inner.total_messages(), 3);
        assert_eq!(inner.queue_names(), vec!["fc-err", "fc-sips"]);
    }

    #[tokio::test]
    async fn test_offline_broker_rejects_connect_and_publish() {
        let connector = InMemoryConnector::new();
        let broker = connector.connect(&endpoint("AMQP-DC")).await.unwrap();

        connector.set_online("AMQP-DC", false);
        assert!(!broker.is_connected());
        assert!(matches!(
            broker.publish("dc0", b"{}").await,
            Err(BrokerError::Offline(_))
        ));
        assert!(connector.connect(&endpoint("AMQP-DC")).await.is_err());

        connector.set_online("AMQP-DC", true);
        broker.publish("dc0", b"{}").await.unwrap();
        assert_eq!(connector.broker("AMQP-DC").message_count("dc0"), 1);
    }

    #[tokio::test]
    async fn test_stalled_broker_never_confirms() {
        let connector = InMemoryConnector::new();
        let broker = connector.connect(&endpoint("AMQP-FC")).await.unwrap();
        connector.set_stalled("AMQP-FC", true);

        let publish = broker.publish("fc-sips", b"{}");
        let result = tokio::time::timeout(std::time::Duration::from_millis(50), publish).await;
        assert!(result.is_err());

        let inner = connector.broker("AMQP-FC");
        assert_eq!(inner.publish_calls(), 1);
        assert_eq!(inner.total_messages(), 0);
    }

    #[tokio::test]
    async fn test_aliases_are_isolated() {
        let connector = InMemoryConnector::new();
        let fc = connector.connect(&endpoint("AMQP-FC")).await.unwrap();
        fc.publish("shared-name", b"{}").await.unwrap();

        assert_eq!(connector.broker("AMQP-FC").message_count("shared-name"), 1);
        assert_eq!(connector.broker("AMQP-PC").message_count("shared-name"), 0);
    }
}
