//! The work ticket published to stage queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DispatchError;
use crate::item::ItemKind;
use crate::pipeline::DispatchOrder;
use crate::topology::Topology;

/// Job a ticket belongs to, resolved from the job topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub key: String,
    pub name: String,
    pub server: String,
}

/// Message envelope consumed by workers.
///
/// Carries only what a worker needs for one stage; the item's state stays
/// with the pipeline. Workers echo `item_id`, `stage` and `ticket_seq` back
/// in their report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkTicket {
    pub item_id: String,
    pub item_kind: ItemKind,
    pub stage: String,
    /// Physical queue name on the stage's broker.
    pub queue: String,
    pub attempt: u32,
    pub ticket_seq: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobRef>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub issued_at: DateTime<Utc>,
}

impl WorkTicket {
    /// Build the ticket for `order` against a topology snapshot.
    pub fn from_order(order: &DispatchOrder, topology: &Topology) -> Result<Self, DispatchError> {
        let queue = topology.resolve_queue(&order.stage)?;
        let job = match order.job {
            Some(ref key) => {
                let job = topology.resolve_job(key)?;
                Some(JobRef {
                    key: job.key.clone(),
                    name: job.canonical_name.clone(),
                    server: job.server.clone(),
                })
            }
            None => None,
        };

        Ok(Self {
            item_id: order.item_id.clone(),
            item_kind: order.kind,
            stage: order.stage.clone(),
            queue: queue.physical_name.clone(),
            attempt: order.attempt,
            ticket_seq: order.ticket_seq,
            job,
            payload: order.payload.clone(),
            issued_at: Utc::now(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DispatchError> {
        serde_json::to_vec(self).map_err(|e| DispatchError::Routing(format!("encode ticket: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_topology;

    fn order(stage: &str, job: Option<&str>) -> DispatchOrder {
        DispatchOrder {
            item_id: "item-1".to_string(),
            kind: ItemKind::CrawlUri,
            lineage: "pulse".to_string(),
            stage: stage.to_string(),
            attempt: 1,
            ticket_seq: 3,
            job: job.map(str::to_string),
            payload: serde_json::json!({"uri": "https://example.org/"}),
        }
    }

    #[test]
    fn test_ticket_resolves_queue_and_job() {
        let topology = sample_topology();
        let ticket = WorkTicket::from_order(&order("PULSE03", Some("weekly-2")), &topology).unwrap();

        assert_eq!(ticket.queue, topology.resolve_queue("PULSE03").unwrap().physical_name);
        assert_eq!(
            ticket.job,
            Some(JobRef {
                key: "weekly-2".to_string(),
                name: "weekly".to_string(),
                server: "H3-PC1".to_string(),
            })
        );
        assert_eq!(ticket.ticket_seq, 3);
    }

    #[test]
    fn test_unknown_job_is_routing_error() {
        let topology = sample_topology();
        let err = WorkTicket::from_order(&order("PULSE03", Some("yearly")), &topology).unwrap_err();
        assert!(matches!(err, DispatchError::Routing(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_wire_shape() {
        let topology = sample_topology();
        let ticket = WorkTicket::from_order(&order("PULSE01", None), &topology).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&ticket.to_bytes().unwrap()).unwrap();

        assert_eq!(json["item_id"], "item-1");
        assert_eq!(json["item_kind"], "crawl_uri");
        assert_eq!(json["stage"], "PULSE01");
        assert_eq!(json["attempt"], 1);
        assert_eq!(json["payload"]["uri"], "https://example.org/");
        assert!(json.get("job").is_none());
    }
}
