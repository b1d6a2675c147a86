//! Testing utilities: sample topology, configs and an in-process broker
//! setup for unit and integration tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use pulse_core::testing::{sample_topology, sample_config};
//!
//! let topology = sample_topology();
//! let config = sample_config(2);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::broker::InMemoryConnector;
use crate::config::{load_config_from_str, BrokerConfig, Config};
use crate::item::{ItemStore, SqliteItemStore};
use crate::orchestrator::PipelineOrchestrator;
use crate::topology::{parse_topology_document, Topology};

/// Topology document with the FC, PULSE, index and DC0-DC3 queues on
/// three in-memory brokers.
pub const SAMPLE_TOPOLOGY_JSON: &str = include_str!("sample_topology.json");

/// Broker aliases used by [`SAMPLE_TOPOLOGY_JSON`], all in-process.
pub fn sample_brokers() -> BTreeMap<String, BrokerConfig> {
    ["AMQP-FC", "AMQP-PC", "AMQP-DC"]
        .into_iter()
        .map(|alias| {
            (
                alias.to_string(),
                BrokerConfig {
                    url: format!("memory://{}", alias.to_lowercase()),
                    connection_name: None,
                },
            )
        })
        .collect()
}

/// The sample topology, built.
///
/// # Panics
///
/// Panics if the bundled sample document is invalid.
pub fn sample_topology() -> Topology {
    let document =
        parse_topology_document(SAMPLE_TOPOLOGY_JSON).expect("sample topology parses");
    Topology::build(&sample_brokers(), &document).expect("sample topology builds")
}

/// Service config TOML matching [`sample_brokers`], with the given retry cap
/// and a short dispatcher backoff so tests do not sleep for long.
pub fn sample_config_toml(max_attempts: u32) -> String {
    format!(
        r#"
[server]
host = "127.0.0.1"
port = 8080

[database]
path = ":memory:"

[brokers.AMQP-FC]
url = "memory://amqp-fc"

[brokers.AMQP-PC]
url = "memory://amqp-pc"

[brokers.AMQP-DC]
url = "memory://amqp-dc"

[pipeline]
max_attempts = {max_attempts}
default_stage_timeout_secs = 600

[pipeline.stage_timeouts]
PULSE03 = 3600

[dispatcher]
max_attempts = 2
initial_delay_ms = 1
max_delay_ms = 5
backoff_multiplier = 2.0
unreachable_recheck_secs = 30
publish_timeout_ms = 200
connect_timeout_secs = 5

[orchestrator]
enabled = false
"#
    )
}

/// Parsed [`sample_config_toml`].
///
/// # Panics
///
/// Panics if the generated TOML does not parse.
pub fn sample_config(max_attempts: u32) -> Config {
    load_config_from_str(&sample_config_toml(max_attempts)).expect("sample config parses")
}

/// A complete pipeline over the sample topology, in-memory brokers and an
/// in-memory item store.
pub struct TestPipeline {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub connector: Arc<InMemoryConnector>,
    pub store: Arc<dyn ItemStore>,
}

impl TestPipeline {
    /// # Panics
    ///
    /// Panics if the sample fixtures fail to assemble.
    pub fn new(max_attempts: u32) -> Self {
        let store: Arc<dyn ItemStore> =
            Arc::new(SqliteItemStore::in_memory().expect("in-memory item store opens"));
        Self::with_store(max_attempts, store)
    }

    /// Same as [`TestPipeline::new`] over an existing store, to simulate a
    /// restart.
    pub fn with_store(max_attempts: u32, store: Arc<dyn ItemStore>) -> Self {
        let connector = Arc::new(InMemoryConnector::new());
        let orchestrator = PipelineOrchestrator::from_config(
            &sample_config(max_attempts),
            sample_topology(),
            connector.clone(),
            Arc::clone(&store),
            None,
        )
        .expect("sample pipeline assembles");
        Self {
            orchestrator: Arc::new(orchestrator),
            connector,
            store,
        }
    }

    /// Work tickets published to the queue behind `stage`, decoded as JSON.
    pub fn tickets(&self, stage: &str) -> Vec<serde_json::Value> {
        let topology = self.orchestrator.topology();
        match topology.resolve_queue(stage) {
            Ok(queue) => self
                .connector
                .broker(&queue.broker)
                .json_messages(&queue.physical_name),
            Err(_) => Vec::new(),
        }
    }

    /// Take a broker alias offline or bring it back. Bringing it back also
    /// clears its down mark so the next publish goes through.
    pub fn set_broker_online(&self, alias: &str, online: bool) {
        self.connector.set_online(alias, online);
        if online {
            self.orchestrator
                .dispatcher()
                .reachability()
                .mark_reachable(alias);
        }
    }
}
