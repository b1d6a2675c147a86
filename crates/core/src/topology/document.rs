//! Raw topology document as read from JSON.
//!
//! The document has four top-level mappings (`queues`, `jobs`, `http`,
//! `hdfs`). Each mapping keeps its document order and rejects duplicate keys
//! at parse time, which a plain `HashMap` would silently collapse.

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// An ordered string-keyed mapping that refuses duplicate keys.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueMap<T>(Vec<(String, T)>);

impl<T> UniqueMap<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert an entry, returning an error message if the key is taken.
    pub fn insert(&mut self, key: impl Into<String>, value: T) -> Result<(), String> {
        let key = key.into();
        if self.0.iter().any(|(k, _)| *k == key) {
            return Err(format!("duplicate key `{}`", key));
        }
        self.0.push((key, value));
        Ok(())
    }
}

impl<T> Default for UniqueMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'de, T> Deserialize<'de> for UniqueMap<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct UniqueMapVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for UniqueMapVisitor<T>
        where
            T: Deserialize<'de>,
        {
            type Value = UniqueMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping with unique string keys")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut map = UniqueMap::new();
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    map.insert(key, value).map_err(de::Error::custom)?;
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(UniqueMapVisitor(PhantomData))
    }
}

impl<T: Serialize> Serialize for UniqueMap<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// `queues` entry: which broker owns the queue and what it is called there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Broker alias, e.g. `AMQP-FC`.
    pub server: String,
    /// Physical queue name on that broker.
    pub name: String,
    /// Human-readable label.
    pub short: String,
}

/// `jobs` entry: a recurring crawl job and the job server that runs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntry {
    /// Canonical cadence name (`daily`, `weekly`, ...).
    pub name: String,
    /// Job server, e.g. `H3-FC2`.
    pub server: String,
}

/// `http` / `hdfs` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// The whole topology document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyDocument {
    pub queues: UniqueMap<QueueEntry>,
    pub jobs: UniqueMap<JobEntry>,
    #[serde(default)]
    pub http: UniqueMap<EndpointEntry>,
    #[serde(default)]
    pub hdfs: UniqueMap<EndpointEntry>,
}

/// Read and parse a topology document from disk.
pub fn load_topology_document(path: &Path) -> Result<TopologyDocument, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
    parse_topology_document(&raw)
}

/// Parse a topology document from a JSON string.
pub fn parse_topology_document(json: &str) -> Result<TopologyDocument, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
}
