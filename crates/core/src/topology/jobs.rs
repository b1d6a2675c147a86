//! Job topology: which server runs which recurring crawl job.

use std::collections::HashMap;

use serde::Serialize;

use super::document::{JobEntry, UniqueMap};
use super::TopologyError;
use crate::config::ConfigError;

/// One job key. Several keys may share a canonical name (`daily`,
/// `daily-2`) when the same cadence runs on more than one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDescriptor {
    pub key: String,
    pub canonical_name: String,
    pub server: String,
}

#[derive(Debug, Clone, Default)]
pub struct JobTopology {
    jobs: Vec<JobDescriptor>,
    index: HashMap<String, usize>,
}

impl JobTopology {
    pub fn build(entries: &UniqueMap<JobEntry>) -> Result<Self, ConfigError> {
        let mut jobs = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());

        for (key, entry) in entries.iter() {
            if entry.name.trim().is_empty() || entry.server.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "job {} must have a name and a server",
                    key
                )));
            }
            index.insert(key.to_string(), jobs.len());
            jobs.push(JobDescriptor {
                key: key.to_string(),
                canonical_name: entry.name.clone(),
                server: entry.server.clone(),
            });
        }

        Ok(Self { jobs, index })
    }

    pub fn resolve_job(&self, key: &str) -> Result<&JobDescriptor, TopologyError> {
        self.index
            .get(key)
            .map(|&i| &self.jobs[i])
            .ok_or_else(|| TopologyError::UnknownJobKey(key.to_string()))
    }

    /// Every job running the given cadence, in document order.
    pub fn jobs_for_canonical_name(&self, name: &str) -> Vec<&JobDescriptor> {
        self.jobs
            .iter()
            .filter(|j| j.canonical_name == name)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
