//! Publishes work tickets to the queue behind each stage.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use super::{DispatchError, DispatcherConfig, WorkTicket};
use crate::broker::BrokerPool;
use crate::health::ReachabilityCache;
use crate::metrics;
use crate::pipeline::DispatchOrder;
use crate::topology::TopologyHandle;

/// Routes tickets through the current topology snapshot to a pooled broker
/// connection, retrying transient failures with backoff.
pub struct Dispatcher {
    topology: TopologyHandle,
    pool: Arc<BrokerPool>,
    reachability: Arc<ReachabilityCache>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        topology: TopologyHandle,
        pool: Arc<BrokerPool>,
        reachability: Arc<ReachabilityCache>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            topology,
            pool,
            reachability,
            config,
        }
    }

    pub fn topology(&self) -> &TopologyHandle {
        &self.topology
    }

    pub fn reachability(&self) -> &Arc<ReachabilityCache> {
        &self.reachability
    }

    pub fn pool(&self) -> &Arc<BrokerPool> {
        &self.pool
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Build the ticket for `order` and publish it.
    pub async fn dispatch(&self, order: &DispatchOrder) -> Result<WorkTicket, DispatchError> {
        let ticket = {
            let topology = self.topology.snapshot();
            WorkTicket::from_order(order, &topology).inspect_err(|e| {
                error!(item_id = %order.item_id, stage = %order.stage, error = %e, "Cannot route work ticket");
            })?
        };
        self.publish(&ticket).await?;
        Ok(ticket)
    }

    /// Publish one ticket to the queue for `ticket.stage`.
    ///
    /// Exactly one message is enqueued on success. A broker already marked
    /// down fails fast; exhausting retries marks it down.
    pub async fn publish(&self, ticket: &WorkTicket) -> Result<(), DispatchError> {
        let (queue, endpoint) = {
            let topology = self.topology.snapshot();
            let resolved = topology.resolve_queue(&ticket.stage).and_then(|queue| {
                let endpoint = topology.brokers.resolve(&queue.broker)?;
                Ok((queue.physical_name.clone(), endpoint.clone()))
            });
            match resolved {
                Ok(resolved) => resolved,
                Err(e) => {
                    metrics::PUBLISHES_TOTAL
                        .with_label_values(&["none", "routing_error"])
                        .inc();
                    error!(item_id = %ticket.item_id, stage = %ticket.stage, error = %e, "Cannot route work ticket");
                    return Err(e.into());
                }
            }
        };
        let alias = endpoint.alias.as_str();

        if !self.reachability.is_reachable(alias) {
            metrics::PUBLISHES_TOTAL
                .with_label_values(&[alias, "unreachable"])
                .inc();
            debug!(broker = %alias, item_id = %ticket.item_id, "Broker marked down, failing fast");
            return Err(DispatchError::BrokerUnreachable {
                broker: alias.to_string(),
                reason: "marked unreachable".to_string(),
            });
        }

        let body = ticket.to_bytes()?;
        let retry = &self.config.retry;
        let started = Instant::now();
        let mut last_error = String::new();

        for attempt in 0..retry.max_attempts {
            match self.pool.publish(&endpoint, &queue, &body).await {
                Ok(()) => {
                    self.reachability.mark_reachable(alias);
                    metrics::PUBLISHES_TOTAL.with_label_values(&[alias, "ok"]).inc();
                    metrics::PUBLISH_DURATION
                        .with_label_values(&[alias])
                        .observe(started.elapsed().as_secs_f64());
                    debug!(
                        item_id = %ticket.item_id,
                        stage = %ticket.stage,
                        queue = %queue,
                        broker = %alias,
                        ticket_seq = ticket.ticket_seq,
                        "Work ticket published"
                    );
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < retry.max_attempts {
                        let delay = retry.delay_for(attempt);
                        metrics::PUBLISH_RETRIES.with_label_values(&[alias]).inc();
                        warn!(
                            broker = %alias,
                            attempt = attempt + 1,
                            max_attempts = retry.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Publish failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.reachability.mark_unreachable(
            alias,
            self.config.unreachable_recheck(),
            Some(last_error.clone()),
        );
        metrics::PUBLISHES_TOTAL
            .with_label_values(&[alias, "unreachable"])
            .inc();
        metrics::PUBLISH_DURATION
            .with_label_values(&[alias])
            .observe(started.elapsed().as_secs_f64());
        error!(broker = %alias, item_id = %ticket.item_id, error = %last_error, "Broker unreachable after retries");

        Err(DispatchError::BrokerUnreachable {
            broker: alias.to_string(),
            reason: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryConnector;
    use crate::dispatch::RetryConfig;
    use crate::item::ItemKind;
    use crate::testing::sample_topology;

    fn dispatcher() -> (Dispatcher, Arc<InMemoryConnector>) {
        let connector = Arc::new(InMemoryConnector::new());
        let config = DispatcherConfig {
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                max_delay_ms: 2,
                backoff_multiplier: 2.0,
            },
            unreachable_recheck_secs: 30,
            publish_timeout_ms: 50,
            connect_timeout_secs: 1,
        };
        let dispatcher = Dispatcher::new(
            TopologyHandle::new(sample_topology()),
            Arc::new(
                BrokerPool::new(connector.clone()).with_publish_timeout(config.publish_timeout()),
            ),
            Arc::new(ReachabilityCache::new()),
            config,
        );
        (dispatcher, connector)
    }

    fn order(stage: &str) -> DispatchOrder {
        DispatchOrder {
            item_id: "item-1".to_string(),
            kind: ItemKind::Sip,
            lineage: "fc".to_string(),
            stage: stage.to_string(),
            attempt: 0,
            ticket_seq: 0,
            job: None,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_dispatch_enqueues_exactly_one_message() {
        let (dispatcher, connector) = dispatcher();
        let ticket = dispatcher.dispatch(&order("FC-SIPS")).await.unwrap();

        let broker = connector.broker("AMQP-FC");
        assert_eq!(broker.total_messages(), 1);
        assert_eq!(broker.message_count(&ticket.queue), 1);
        assert_eq!(connector.broker("AMQP-PC").total_messages(), 0);
    }

    #[tokio::test]
    async fn test_unknown_stage_is_routing_error() {
        let (dispatcher, _) = dispatcher();
        let err = dispatcher.dispatch(&order("FC-NOPE")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Routing(_)));
    }

    #[tokio::test]
    async fn test_outage_marks_broker_down_then_fails_fast() {
        let (dispatcher, connector) = dispatcher();
        connector.set_online("AMQP-DC", false);

        let err = dispatcher.dispatch(&order("DC1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!dispatcher.reachability().is_reachable("AMQP-DC"));

        // Other brokers are unaffected.
        dispatcher.dispatch(&order("FC-SIPS")).await.unwrap();

        // Back online, but still inside the recheck window.
        connector.set_online("AMQP-DC", true);
        let err = dispatcher.dispatch(&order("DC1")).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::BrokerUnreachable {
                broker: "AMQP-DC".to_string(),
                reason: "marked unreachable".to_string(),
            }
        );

        dispatcher.reachability().mark_reachable("AMQP-DC");
        dispatcher.dispatch(&order("DC1")).await.unwrap();
        assert_eq!(connector.broker("AMQP-DC").total_messages(), 1);
    }

    #[tokio::test]
    async fn test_unconfirmed_publish_is_bounded_and_retryable() {
        let (dispatcher, connector) = dispatcher();
        connector.set_stalled("AMQP-FC", true);

        let started = Instant::now();
        let err = dispatcher.dispatch(&order("FC-SIPS")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));

        // One call per retry attempt, none of them confirmed.
        let broker = connector.broker("AMQP-FC");
        assert_eq!(broker.publish_calls(), 3);
        assert_eq!(broker.total_messages(), 0);
        assert!(!dispatcher.reachability().is_reachable("AMQP-FC"));
    }
}
