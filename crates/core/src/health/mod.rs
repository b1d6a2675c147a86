//! Reachability cache for brokers and service endpoints.
//!
//! Keys are broker aliases and `http`/`hdfs` endpoint keys. A key is
//! reachable unless it carries an unexpired down mark. The dispatcher marks
//! broker aliases; an external health checker reports on endpoint keys
//! through the orchestrator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct DownMark {
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    reason: Option<String>,
}

/// One row of [`ReachabilityCache::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReachabilityEntry {
    pub key: String,
    pub reachable: bool,
    pub down_since: DateTime<Utc>,
    pub recheck_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
pub struct ReachabilityCache {
    down: DashMap<String, DownMark>,
}

impl ReachabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_reachable(&self, key: &str) -> bool {
        self.is_reachable_at(key, Utc::now())
    }

    /// Reachability as of `now`. Expired marks count as reachable so the
    /// next caller gets to try again.
    pub fn is_reachable_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        match self.down.get(key) {
            Some(mark) => mark.until <= now,
            None => true,
        }
    }

    pub fn mark_reachable(&self, key: &str) {
        if self.down.remove(key).is_some() {
            info!(key = %key, "Marked reachable");
        }
    }

    /// Mark `key` down for `recheck_after`. A key already down keeps its
    /// original `down_since`.
    pub fn mark_unreachable(&self, key: &str, recheck_after: Duration, reason: Option<String>) {
        let now = Utc::now();
        let until = now
            + chrono::Duration::from_std(recheck_after).unwrap_or_else(|_| chrono::Duration::zero());
        let mut entry = self.down.entry(key.to_string()).or_insert_with(|| DownMark {
            since: now,
            until,
            reason: None,
        });
        entry.until = until;
        entry.reason = reason;
        warn!(key = %key, recheck_at = %until, "Marked unreachable");
    }

    /// Every key that currently carries a down mark, expired or not.
    pub fn snapshot(&self) -> Vec<ReachabilityEntry> {
        let now = Utc::now();
        let mut entries: Vec<ReachabilityEntry> = self
            .down
            .iter()
            .map(|e| ReachabilityEntry {
                key: e.key().clone(),
                reachable: e.value().until <= now,
                down_since: e.value().since,
                recheck_at: e.value().until,
                reason: e.value().reason.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}
