//! Queue catalog: logical queue key to broker-scoped physical queue.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::document::{QueueEntry, UniqueMap};
use super::{BrokerRegistry, TopologyError};
use crate::config::ConfigError;

/// One queue as declared in the topology document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueDescriptor {
    /// Globally unique logical key (`FC-SIPS`, `PULSE03`, ...).
    pub key: String,
    /// Owning broker alias.
    pub broker: String,
    /// Queue name on the broker; unique per broker.
    pub physical_name: String,
    pub short_label: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueueCatalog {
    queues: Vec<QueueDescriptor>,
    index: HashMap<String, usize>,
}

impl QueueCatalog {
    /// Build from the document's `queues` mapping, checking every broker
    /// alias against the registry.
    pub fn build(
        entries: &UniqueMap<QueueEntry>,
        brokers: &BrokerRegistry,
    ) -> Result<Self, ConfigError> {
        let mut queues = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());
        let mut physical: HashSet<(&str, &str)> = HashSet::new();

        for (key, entry) in entries.iter() {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "queue {} has an empty physical name",
                    key
                )));
            }
            if !brokers.contains(&entry.server) {
                return Err(ConfigError::ValidationError(format!(
                    "queue {} references unknown broker {}",
                    key, entry.server
                )));
            }
            if !physical.insert((entry.server.as_str(), entry.name.as_str())) {
                return Err(ConfigError::ValidationError(format!(
                    "queue {} reuses physical name {} on broker {}",
                    key, entry.name, entry.server
                )));
            }

            index.insert(key.to_string(), queues.len());
            queues.push(QueueDescriptor {
                key: key.to_string(),
                broker: entry.server.clone(),
                physical_name: entry.name.clone(),
                short_label: entry.short.clone(),
            });
        }

        Ok(Self { queues, index })
    }

    pub fn resolve_queue(&self, key: &str) -> Result<&QueueDescriptor, TopologyError> {
        self.index
            .get(key)
            .map(|&i| &self.queues[i])
            .ok_or_else(|| TopologyError::UnknownQueueKey(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// All queues in document order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueDescriptor> {
        self.queues.iter()
    }

    /// Queues owned by one broker alias.
    pub fn queues_on_broker<'a>(
        &'a self,
        broker: &'a str,
    ) -> impl Iterator<Item = &'a QueueDescriptor> + 'a {
        self.queues.iter().filter(move |q| q.broker == broker)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
