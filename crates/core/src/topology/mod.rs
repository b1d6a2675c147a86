//! Static routing topology: brokers, queues, jobs and service endpoints.
//!
//! A [`Topology`] is built once from the service config (brokers) and the
//! topology document (queues, jobs, endpoints) and never mutated after that.
//! Readers take an `Arc` snapshot from a [`TopologyHandle`]; a reload builds
//! a complete new topology and swaps the pointer.

mod broker;
mod catalog;
mod document;
mod endpoints;
mod handle;
mod jobs;

pub use broker::{redact_url, BrokerEndpoint, BrokerRegistry};
pub use catalog::{QueueCatalog, QueueDescriptor};
pub use document::{
    load_topology_document, parse_topology_document, EndpointEntry, JobEntry, QueueEntry,
    TopologyDocument, UniqueMap,
};
pub use endpoints::{EndpointKind, ServiceEndpoint, ServiceEndpoints};
pub use handle::TopologyHandle;
pub use jobs::{JobDescriptor, JobTopology};

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{BrokerConfig, ConfigError};

/// Lookup failures against a loaded topology.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("unknown queue key: {0}")]
    UnknownQueueKey(String),

    #[error("unknown job key: {0}")]
    UnknownJobKey(String),

    #[error("unknown broker alias: {0}")]
    UnknownBroker(String),

    #[error("unknown endpoint key: {0}")]
    UnknownEndpoint(String),
}

/// Everything the router needs to turn a stage id into a broker queue.
#[derive(Debug, Clone)]
pub struct Topology {
    pub brokers: BrokerRegistry,
    pub queues: QueueCatalog,
    pub jobs: JobTopology,
    pub endpoints: ServiceEndpoints,
    pub loaded_at: DateTime<Utc>,
}

impl Topology {
    /// Build from already-parsed inputs. Fails on any cross-reference error.
    pub fn build(
        brokers: &BTreeMap<String, BrokerConfig>,
        document: &TopologyDocument,
    ) -> Result<Self, ConfigError> {
        let brokers = BrokerRegistry::from_config(brokers)?;
        let queues = QueueCatalog::build(&document.queues, &brokers)?;
        let jobs = JobTopology::build(&document.jobs)?;
        let endpoints = ServiceEndpoints::build(&document.http, &document.hdfs);

        Ok(Self {
            brokers,
            queues,
            jobs,
            endpoints,
            loaded_at: Utc::now(),
        })
    }

    /// Read the topology document at `path` and build against `brokers`.
    pub fn load(
        brokers: &BTreeMap<String, BrokerConfig>,
        path: &Path,
    ) -> Result<Self, ConfigError> {
        let document = load_topology_document(path)?;
        Self::build(brokers, &document)
    }

    pub fn resolve_queue(&self, key: &str) -> Result<&QueueDescriptor, TopologyError> {
        self.queues.resolve_queue(key)
    }

    pub fn resolve_job(&self, key: &str) -> Result<&JobDescriptor, TopologyError> {
        self.jobs.resolve_job(key)
    }

    pub fn jobs_for_canonical_name(&self, name: &str) -> Vec<&JobDescriptor> {
        self.jobs.jobs_for_canonical_name(name)
    }

    /// Reachability is tracked for broker aliases and service endpoint keys
    /// only.
    pub fn check_reachability_key(&self, key: &str) -> Result<(), TopologyError> {
        if self.brokers.contains(key) {
            return Ok(());
        }
        self.endpoints.resolve(key).map(|_| ())
    }
}
