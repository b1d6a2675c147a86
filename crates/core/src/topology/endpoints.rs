//! HTTP and HDFS service endpoints watched by the external health checker.

use serde::Serialize;

use super::document::{EndpointEntry, UniqueMap};
use super::TopologyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Http,
    Hdfs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub key: String,
    pub kind: EndpointKind,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

fn endpoint(kind: EndpointKind, key: &str, entry: &EndpointEntry) -> ServiceEndpoint {
    ServiceEndpoint {
        key: key.to_string(),
        kind,
        name: entry.name.clone(),
        url: entry.url.clone(),
        host: entry.host.clone(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceEndpoints {
    endpoints: Vec<ServiceEndpoint>,
}

impl ServiceEndpoints {
    pub fn build(http: &UniqueMap<EndpointEntry>, hdfs: &UniqueMap<EndpointEntry>) -> Self {
        let endpoints = http
            .iter()
            .map(|(key, e)| endpoint(EndpointKind::Http, key, e))
            .chain(hdfs.iter().map(|(key, e)| endpoint(EndpointKind::Hdfs, key, e)))
            .collect();
        Self { endpoints }
    }

    pub fn resolve(&self, key: &str) -> Result<&ServiceEndpoint, TopologyError> {
        self.endpoints
            .iter()
            .find(|e| e.key == key)
            .ok_or_else(|| TopologyError::UnknownEndpoint(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceEndpoint> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
