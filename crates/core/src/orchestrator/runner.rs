//! Pipeline orchestrator implementation.
//!
//! Ties the state machine to the dispatcher and audit log:
//! - Operations: submit, report, resubmit, cancel - each records the
//!   transition, then publishes the resulting work ticket
//! - Timeout sweeper: turns missed stage deadlines into Timeout reports
//! - Redispatch loop: republishes tickets that never reached a broker

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::broker::{BrokerConnector, BrokerPool};
use crate::config::{BrokerConfig, Config, ConfigError};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::health::ReachabilityCache;
use crate::item::{HistoryEntry, Item, ItemFilter, ItemStore, Outcome};
use crate::metrics;
use crate::pipeline::{
    DispatchOrder, PipelineDefinition, PipelineMachine, ReportResult, StageReport, SubmitRequest,
    Transition,
};
use crate::topology::{Topology, TopologyHandle};

use super::config::OrchestratorConfig;
use super::types::{OrchestratorError, OrchestratorStatus, ReachabilityReport};

/// State shared between the orchestrator and its background loops.
struct Shared {
    machine: Arc<PipelineMachine>,
    dispatcher: Arc<Dispatcher>,
    audit: Option<AuditHandle>,
}

impl Shared {
    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }

    /// Publish `order` unless the item has moved on since it was issued or
    /// another publish of it is still running.
    async fn dispatch(&self, order: &DispatchOrder) -> Result<bool, OrchestratorError> {
        let Some(_claim) = self.machine.claim_publish(order) else {
            debug!(item_id = %order.item_id, stage = %order.stage, "Publish already in progress");
            return Ok(false);
        };
        if !self.machine.is_current(order).await {
            debug!(item_id = %order.item_id, stage = %order.stage, "Order is stale, not publishing");
            return Ok(false);
        }

        match self.dispatcher.dispatch(order).await {
            Ok(_) => {
                self.machine
                    .mark_dispatched(&order.item_id, order.ticket_seq)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                warn!(item_id = %order.item_id, stage = %order.stage, error = %e, "Dispatch failed");
                self.emit(AuditEvent::DispatchFailed {
                    item_id: order.item_id.clone(),
                    lineage: order.lineage.clone(),
                    stage: order.stage.clone(),
                    ticket_seq: order.ticket_seq,
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                })
                .await;
                Err(OrchestratorError::Dispatch {
                    item_id: order.item_id.clone(),
                    source: e,
                })
            }
        }
    }

    async fn after_transition(&self, transition: &Transition) -> Result<(), OrchestratorError> {
        self.emit(transition_event(&transition.item, &transition.entry))
            .await;
        if transition.item.is_terminal() {
            self.emit(AuditEvent::ItemTerminated {
                item_id: transition.item.id.clone(),
                lineage: transition.item.lineage.clone(),
                ticket_seq: transition.entry.seq,
                status: transition.item.position.status(),
                attempts: transition.item.attempts,
            })
            .await;
        }
        if let Some(ref order) = transition.order {
            self.dispatch(order).await?;
        }
        Ok(())
    }

    async fn report(&self, report: StageReport) -> Result<ReportResult, OrchestratorError> {
        let stage = report.stage.clone();
        let ticket_seq = report.ticket_seq;
        let actor = report.actor.clone();

        let result = self.machine.report(report).await?;
        match result {
            ReportResult::Applied(ref transition) => self.after_transition(transition).await?,
            ReportResult::Duplicate {
                ref item_id,
                ref reason,
            } => {
                let lineage = self
                    .machine
                    .definition()
                    .lineage_of(&stage)
                    .map(|l| l.name.clone());
                self.emit(AuditEvent::DuplicateReport {
                    item_id: item_id.clone(),
                    lineage,
                    stage,
                    ticket_seq,
                    reason: reason.label().to_string(),
                    actor,
                })
                .await;
            }
        }
        Ok(result)
    }

    /// Feed a Timeout report for every item past its stage deadline.
    async fn sweep_timeouts(&self) -> usize {
        let mut applied = 0;
        for report in self.machine.overdue(Utc::now()).await {
            let stage = report.stage.clone();
            let item_id = report.item_id.clone();
            match self.report(report).await {
                Ok(ReportResult::Applied(_)) => {
                    metrics::STAGE_TIMEOUTS.with_label_values(&[&stage]).inc();
                    info!(item_id = %item_id, stage = %stage, "Stage timed out");
                    applied += 1;
                }
                Ok(ReportResult::Duplicate { .. }) => {}
                Err(OrchestratorError::Dispatch { .. }) => {
                    // Recorded; the redispatch loop owns the ticket now.
                    metrics::STAGE_TIMEOUTS.with_label_values(&[&stage]).inc();
                    applied += 1;
                }
                Err(e) => warn!(item_id = %item_id, stage = %stage, error = %e, "Timeout sweep failed"),
            }
        }
        applied
    }

    /// Republish tickets that entered their stage at least `min_age` ago
    /// and were never confirmed published.
    async fn redispatch(&self, min_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(min_age).unwrap_or_else(|_| chrono::Duration::zero());
        let mut published = 0;
        for order in self.machine.pending_dispatch(cutoff).await {
            match self.dispatch(&order).await {
                Ok(true) => {
                    metrics::REDISPATCHES.inc();
                    info!(item_id = %order.item_id, stage = %order.stage, "Work ticket redispatched");
                    published += 1;
                }
                Ok(false) => {}
                Err(OrchestratorError::Dispatch { source, .. }) if source.is_retryable() => {}
                Err(e) => error!(item_id = %order.item_id, error = %e, "Redispatch failed"),
            }
        }
        published
    }
}

fn transition_event(item: &Item, entry: &HistoryEntry) -> AuditEvent {
    match entry.outcome {
        Outcome::Resubmit => AuditEvent::ItemResubmitted {
            item_id: item.id.clone(),
            lineage: item.lineage.clone(),
            ticket_seq: entry.seq,
            from: entry.from.to_string(),
            to: entry.to.to_string(),
            attempts: item.attempts,
            actor: entry.actor.clone(),
        },
        Outcome::Cancel => AuditEvent::ItemCancelled {
            item_id: item.id.clone(),
            lineage: item.lineage.clone(),
            ticket_seq: entry.seq,
            from: entry.from.to_string(),
            actor: entry.actor.clone(),
            reason: entry.note.clone(),
        },
        outcome => AuditEvent::StageTransition {
            item_id: item.id.clone(),
            lineage: item.lineage.clone(),
            ticket_seq: entry.seq,
            from: entry.from.to_string(),
            to: entry.to.to_string(),
            outcome: outcome.to_string(),
            attempts: item.attempts,
            actor: entry.actor.clone(),
        },
    }
}

/// The pipeline orchestrator - the single entry point for operators and
/// workers.
pub struct PipelineOrchestrator {
    config: OrchestratorConfig,
    shared: Arc<Shared>,
    /// Broker registry source, kept for topology reloads.
    brokers: BTreeMap<String, BrokerConfig>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PipelineOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        machine: Arc<PipelineMachine>,
        dispatcher: Arc<Dispatcher>,
        brokers: BTreeMap<String, BrokerConfig>,
        audit: Option<AuditHandle>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            shared: Arc::new(Shared {
                machine,
                dispatcher,
                audit,
            }),
            brokers,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Wire the standard pipeline definition, a dispatcher and a machine
    /// from loaded config. Fails if any stage has no queue in `topology`.
    pub fn from_config(
        config: &Config,
        topology: Topology,
        connector: Arc<dyn BrokerConnector>,
        store: Arc<dyn ItemStore>,
        audit: Option<AuditHandle>,
    ) -> Result<Self, ConfigError> {
        let definition = PipelineDefinition::standard();
        definition
            .validate_against(&topology.queues)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        let mut pipeline = config.pipeline.clone();
        pipeline.stage_timeouts = definition
            .resolve_stage_timeouts(&pipeline.stage_timeouts)
            .map_err(|e| {
                ConfigError::ValidationError(format!("pipeline.stage_timeouts: {}", e))
            })?;

        let pool =
            BrokerPool::new(connector).with_publish_timeout(config.dispatcher.publish_timeout());
        let dispatcher = Dispatcher::new(
            TopologyHandle::new(topology),
            Arc::new(pool),
            Arc::new(ReachabilityCache::new()),
            config.dispatcher.clone(),
        );
        let machine = PipelineMachine::new(Arc::new(definition), pipeline, store);

        Ok(Self::new(
            config.orchestrator.clone(),
            Arc::new(machine),
            Arc::new(dispatcher),
            config.brokers.clone(),
            audit,
        ))
    }

    pub fn machine(&self) -> &Arc<PipelineMachine> {
        &self.shared.machine
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    /// Current topology snapshot.
    pub fn topology(&self) -> Arc<Topology> {
        self.shared.dispatcher.topology().snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Reload in-flight items from the store and publish any ticket that
    /// was recorded but never confirmed published. Returns the number of
    /// items recovered.
    pub async fn recover(&self) -> Result<usize, OrchestratorError> {
        let recovered = self.shared.machine.recover()?;
        let republished = self.shared.redispatch(Duration::ZERO).await;
        if recovered > 0 {
            info!(recovered, republished, "Recovered in-flight items");
        }
        Ok(recovered)
    }

    /// Put a new item into the pipeline at an entry stage.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        actor: &str,
    ) -> Result<Item, OrchestratorError> {
        if let Some(ref job) = request.job {
            self.topology().resolve_job(job)?;
        }

        let (item, order) = self.shared.machine.submit(request).await?;
        self.shared
            .emit(AuditEvent::ItemSubmitted {
                item_id: item.id.clone(),
                kind: item.kind.to_string(),
                lineage: item.lineage.clone(),
                stage: order.stage.clone(),
                ticket_seq: order.ticket_seq,
                job: item.job.clone(),
                actor: actor.to_string(),
            })
            .await;

        self.shared.dispatch(&order).await?;
        Ok(item)
    }

    /// Apply a worker's stage report.
    pub async fn report(&self, report: StageReport) -> Result<ReportResult, OrchestratorError> {
        self.shared.report(report).await
    }

    /// Send an item back from its lineage's error stage.
    pub async fn resubmit(
        &self,
        item_id: &str,
        actor: &str,
        note: Option<String>,
    ) -> Result<Transition, OrchestratorError> {
        let transition = self.shared.machine.resubmit(item_id, actor, note).await?;
        self.shared.after_transition(&transition).await?;
        Ok(transition)
    }

    /// Withdraw an item. A worker already holding its ticket finishes, but
    /// its report is ignored and nothing further is published.
    pub async fn cancel(
        &self,
        item_id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Transition, OrchestratorError> {
        let transition = self.shared.machine.cancel(item_id, actor, reason).await?;
        self.shared.after_transition(&transition).await?;
        Ok(transition)
    }

    pub async fn get(&self, item_id: &str) -> Result<Item, OrchestratorError> {
        Ok(self.shared.machine.get(item_id).await?)
    }

    pub async fn history(&self, item_id: &str) -> Result<Vec<HistoryEntry>, OrchestratorError> {
        Ok(self.shared.machine.history(item_id).await?)
    }

    /// Items matching `filter` and the total count ignoring pagination.
    pub fn list(&self, filter: &ItemFilter) -> Result<(Vec<Item>, i64), OrchestratorError> {
        let store = self.shared.machine.store();
        Ok((store.list(filter)?, store.count(filter)?))
    }

    /// Run one timeout sweep now. Returns the number of items timed out.
    pub async fn sweep_timeouts(&self) -> usize {
        self.shared.sweep_timeouts().await
    }

    /// Republish every undispatched ticket now. Returns how many were
    /// published.
    pub async fn redispatch_pending(&self) -> usize {
        self.shared.redispatch(Duration::ZERO).await
    }

    /// Load the topology document at `path`, check it against the pipeline
    /// definition, and swap it in. On any error the current topology stays.
    pub async fn reload_topology(
        &self,
        path: &Path,
        actor: &str,
    ) -> Result<Arc<Topology>, OrchestratorError> {
        let topology = Topology::load(&self.brokers, path)?;
        self.shared
            .machine
            .definition()
            .validate_against(&topology.queues)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        let (queues, jobs, endpoints) = (
            topology.queues.len(),
            topology.jobs.len(),
            topology.endpoints.len(),
        );
        self.shared.dispatcher.topology().swap(topology);
        info!(queues, jobs, endpoints, path = %path.display(), "Topology reloaded");

        self.shared
            .emit(AuditEvent::TopologyReloaded {
                queues,
                jobs,
                endpoints,
                actor: actor.to_string(),
            })
            .await;
        Ok(self.topology())
    }

    /// Current reachability of a broker alias or service endpoint key.
    pub fn reachability(&self, key: &str) -> Result<bool, OrchestratorError> {
        self.topology().check_reachability_key(key)?;
        Ok(self.shared.dispatcher.reachability().is_reachable(key))
    }

    /// Apply a health check result for `key`. Returns whether the key's
    /// state changed; changes are audited.
    pub async fn record_reachability(
        &self,
        key: &str,
        report: ReachabilityReport,
        actor: &str,
    ) -> Result<bool, OrchestratorError> {
        self.topology().check_reachability_key(key)?;
        let cache = self.shared.dispatcher.reachability();
        let was_reachable = cache.is_reachable(key);

        if report.reachable {
            cache.mark_reachable(key);
        } else {
            let recheck = report
                .recheck_after
                .unwrap_or_else(|| self.shared.dispatcher.config().unreachable_recheck());
            cache.mark_unreachable(key, recheck, report.reason.clone());
        }

        let changed = was_reachable != report.reachable;
        if changed {
            self.shared
                .emit(AuditEvent::ReachabilityChanged {
                    key: key.to_string(),
                    reachable: report.reachable,
                    reason: report.reason,
                    actor: actor.to_string(),
                })
                .await;
        }
        Ok(changed)
    }

    /// Get current orchestrator status.
    pub async fn status(&self) -> OrchestratorStatus {
        let items = self.shared.machine.in_flight_items().await;
        let mut by_stage = BTreeMap::new();
        for item in &items {
            if let Some(stage) = item.current_stage() {
                *by_stage.entry(stage.to_string()).or_insert(0) += 1;
            }
        }
        let topology = self.topology();
        let reachability = self.shared.dispatcher.reachability();

        OrchestratorStatus {
            running: self.is_running(),
            in_flight: items.len(),
            undispatched: items.iter().filter(|i| !i.dispatched).count(),
            held: items.iter().filter(|i| i.held).count(),
            by_stage,
            brokers_down: topology
                .brokers
                .aliases()
                .filter(|alias| !reachability.is_reachable(alias))
                .map(str::to_string)
                .collect(),
            topology_loaded_at: Some(topology.loaded_at),
        }
    }

    /// Start the orchestrator (recovers state, spawns background tasks).
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return Ok(());
        }

        info!("Starting pipeline orchestrator");

        if let Err(e) = self.recover().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        self.spawn_timeout_sweeper();
        self.spawn_redispatch_loop();

        info!("Pipeline orchestrator started");
        Ok(())
    }

    /// Stop the orchestrator gracefully.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping pipeline orchestrator");

        // Signal shutdown to all loops
        let _ = self.shutdown_tx.send(());

        info!("Pipeline orchestrator stopped");
    }

    fn spawn_timeout_sweeper(&self) {
        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        let interval = self.config.sweep_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Timeout sweeper started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Timeout sweeper received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        let timed_out = shared.sweep_timeouts().await;
                        if timed_out > 0 {
                            debug!(timed_out, "Timeout sweep complete");
                        }
                    }
                }
            }
            info!("Timeout sweeper stopped");
        });
    }

    fn spawn_redispatch_loop(&self) {
        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        let interval = self.config.redispatch_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Redispatch loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Redispatch loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        shared.redispatch(interval).await;
                    }
                }
            }
            info!("Redispatch loop stopped");
        });
    }
}

/// Is this error the caller's to retry later?
pub fn is_dispatch_pending(err: &OrchestratorError) -> bool {
    matches!(
        err,
        OrchestratorError::Dispatch {
            source: DispatchError::BrokerUnreachable { .. },
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{create_audit_system, AuditFilter, AuditStore, SqliteAuditStore};
    use crate::broker::InMemoryConnector;
    use crate::item::{ItemKind, Position, SqliteItemStore};
    use crate::testing::{sample_config, sample_topology};
    use crate::topology::TopologyError;

    struct Fixture {
        orchestrator: PipelineOrchestrator,
        connector: Arc<InMemoryConnector>,
    }

    fn fixture_with(store: Arc<dyn ItemStore>, audit: Option<AuditHandle>) -> Fixture {
        let connector = Arc::new(InMemoryConnector::new());
        let orchestrator = PipelineOrchestrator::from_config(
            &sample_config(2),
            sample_topology(),
            connector.clone(),
            store,
            audit,
        )
        .unwrap();
        Fixture {
            orchestrator,
            connector,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(SqliteItemStore::in_memory().unwrap()), None)
    }

    fn request(stage: &str) -> SubmitRequest {
        SubmitRequest {
            id: None,
            kind: ItemKind::Sip,
            stage: stage.to_string(),
            job: None,
            payload: serde_json::json!({"sip": "x"}),
        }
    }

    fn success(item: &Item) -> StageReport {
        StageReport {
            item_id: item.id.clone(),
            stage: item.current_stage().unwrap().to_string(),
            ticket_seq: item.ticket_seq(),
            outcome: Outcome::Success,
            actor: "worker".to_string(),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_submit_publishes_ticket() {
        let f = fixture();
        let item = f.orchestrator.submit(request("FC-SIPS"), "operator").await.unwrap();

        let queue = f.orchestrator.topology().resolve_queue("FC-SIPS").unwrap().physical_name.clone();
        let messages = f.connector.broker("AMQP-FC").json_messages(&queue);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["item_id"], item.id.as_str());
        assert_eq!(messages[0]["ticket_seq"], 0);
        assert!(f.orchestrator.get(&item.id).await.unwrap().dispatched);
    }

    #[tokio::test]
    async fn test_submit_with_unknown_job_is_rejected() {
        let f = fixture();
        let mut req = request("PULSE01");
        req.job = Some("yearly".to_string());
        let err = f.orchestrator.submit(req, "operator").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Topology(_)));
        assert_eq!(f.connector.broker("AMQP-PC").total_messages(), 0);
    }

    #[tokio::test]
    async fn test_report_publishes_next_stage() {
        let f = fixture();
        let item = f.orchestrator.submit(request("PULSE01"), "operator").await.unwrap();
        f.orchestrator.report(success(&item)).await.unwrap();

        let queue = f.orchestrator.topology().resolve_queue("PULSE02").unwrap().physical_name.clone();
        let messages = f.connector.broker("AMQP-PC").json_messages(&queue);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["ticket_seq"], 1);
    }

    #[tokio::test]
    async fn test_broker_outage_leaves_item_for_redispatch() {
        let f = fixture();
        f.connector.set_online("AMQP-DC", false);

        let err = f.orchestrator.submit(request("DC0"), "operator").await.unwrap_err();
        assert!(is_dispatch_pending(&err));

        let items = f.orchestrator.machine().in_flight_items().await;
        assert_eq!(items.len(), 1);
        assert!(!items[0].dispatched);
        assert_eq!(f.orchestrator.status().await.brokers_down, vec!["AMQP-DC"]);

        f.connector.set_online("AMQP-DC", true);
        f.orchestrator.dispatcher().reachability().mark_reachable("AMQP-DC");
        assert_eq!(f.orchestrator.redispatch_pending().await, 1);
        assert_eq!(f.connector.broker("AMQP-DC").total_messages(), 1);
        assert_eq!(f.orchestrator.redispatch_pending().await, 0);
    }

    #[tokio::test]
    async fn test_unconfirmed_publish_is_bounded_and_not_duplicated() {
        let f = fixture();
        f.connector.set_stalled("AMQP-FC", true);

        let concurrent = async {
            let submitted = f.orchestrator.submit(request("FC-SIPS"), "operator");
            let redispatched = async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                f.orchestrator.redispatch_pending().await
            };
            tokio::join!(submitted, redispatched)
        };
        let (submitted, redispatched) = tokio::time::timeout(Duration::from_secs(5), concurrent)
            .await
            .expect("submit must not hang on an unconfirmed publish");

        assert!(is_dispatch_pending(&submitted.unwrap_err()));
        assert_eq!(redispatched, 0);
        // Only the submit's own attempts reached the broker.
        let broker = f.connector.broker("AMQP-FC");
        assert_eq!(broker.publish_calls(), 2);
        assert_eq!(broker.total_messages(), 0);

        f.connector.set_stalled("AMQP-FC", false);
        f.orchestrator.dispatcher().reachability().mark_reachable("AMQP-FC");
        assert_eq!(f.orchestrator.redispatch_pending().await, 1);
        assert_eq!(broker.total_messages(), 1);
    }

    #[test]
    fn test_from_config_rejects_unknown_stage_timeout() {
        let mut config = sample_config(2);
        config.pipeline.stage_timeouts.insert("PULSE3".to_string(), 5);
        let result = PipelineOrchestrator::from_config(
            &config,
            sample_topology(),
            Arc::new(InMemoryConnector::new()),
            Arc::new(SqliteItemStore::in_memory().unwrap()),
            None,
        );
        match result {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("PULSE3")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("misspelled stage accepted"),
        }
    }

    #[test]
    fn test_from_config_applies_lowercased_stage_timeout() {
        let mut config = sample_config(2);
        config.pipeline.stage_timeouts.insert("pulse03".to_string(), 5);
        let orchestrator = PipelineOrchestrator::from_config(
            &config,
            sample_topology(),
            Arc::new(InMemoryConnector::new()),
            Arc::new(SqliteItemStore::in_memory().unwrap()),
            None,
        )
        .unwrap();
        let pipeline = orchestrator.machine().config();
        assert_eq!(pipeline.stage_timeout_secs("PULSE03"), 5);
        assert!(!pipeline.stage_timeouts.contains_key("pulse03"));
    }

    #[tokio::test]
    async fn test_cancelled_item_is_not_redispatched() {
        let f = fixture();
        f.connector.set_online("AMQP-DC", false);
        let err = f.orchestrator.submit(request("DC1"), "operator").await.unwrap_err();
        let item_id = match err {
            OrchestratorError::Dispatch { item_id, .. } => item_id,
            other => panic!("unexpected error: {}", other),
        };

        f.orchestrator.cancel(&item_id, "operator", None).await.unwrap();
        f.connector.set_online("AMQP-DC", true);
        f.orchestrator.dispatcher().reachability().mark_reachable("AMQP-DC");

        assert_eq!(f.orchestrator.redispatch_pending().await, 0);
        assert_eq!(f.connector.broker("AMQP-DC").total_messages(), 0);
    }

    #[tokio::test]
    async fn test_recover_republishes_undispatched() {
        let store: Arc<dyn ItemStore> = Arc::new(SqliteItemStore::in_memory().unwrap());
        let first = fixture_with(store.clone(), None);
        first.connector.set_online("AMQP-FC", false);
        assert!(first.orchestrator.submit(request("FC-SIPS"), "operator").await.is_err());

        let second = fixture_with(store, None);
        assert_eq!(second.orchestrator.recover().await.unwrap(), 1);
        assert_eq!(second.connector.broker("AMQP-FC").total_messages(), 1);
    }

    #[tokio::test]
    async fn test_reload_topology_swaps_snapshot() {
        let f = fixture();
        let before = f.orchestrator.topology();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, crate::testing::SAMPLE_TOPOLOGY_JSON).unwrap();

        let after = f.orchestrator.reload_topology(&path, "operator").await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.queues.len(), before.queues.len());
    }

    #[tokio::test]
    async fn test_reload_rejects_topology_missing_a_stage() {
        let f = fixture();
        let before = f.orchestrator.topology();

        let mut doc: serde_json::Value =
            serde_json::from_str(crate::testing::SAMPLE_TOPOLOGY_JSON).unwrap();
        doc["queues"].as_object_mut().unwrap().remove("PULSE09");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, doc.to_string()).unwrap();

        let err = f.orchestrator.reload_topology(&path, "operator").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
        assert!(Arc::ptr_eq(&before, &f.orchestrator.topology()));
    }

    #[tokio::test]
    async fn test_audit_records_lifecycle() {
        let audit_store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, writer) = create_audit_system(audit_store.clone(), 100);
        let writer_task = tokio::spawn(writer.run());

        let f = fixture_with(Arc::new(SqliteItemStore::in_memory().unwrap()), Some(handle));
        let item = f.orchestrator.submit(request("DC3"), "operator").await.unwrap();
        let report = success(&item);
        f.orchestrator.report(report.clone()).await.unwrap();
        f.orchestrator.report(report).await.unwrap();

        drop(f);
        writer_task.await.unwrap();

        let records = audit_store
            .query(&AuditFilter::new().with_item_id(item.id.as_str()))
            .unwrap();
        let mut types: Vec<&str> = records.iter().map(|r| r.event_type.as_str()).collect();
        types.reverse();
        assert_eq!(
            types,
            vec!["item_submitted", "stage_transition", "item_terminated", "duplicate_report"]
        );

        let trail = audit_store.item_trail(&item.id).unwrap();
        assert!(trail.iter().all(|r| r.ticket_seq == Some(0)));
        assert!(trail.iter().all(|r| r.lineage.is_some()));
        assert_eq!(trail.last().unwrap().event_type, "duplicate_report");
    }

    #[tokio::test]
    async fn test_reachability_rejects_untracked_keys() {
        let f = fixture();
        let err = f.orchestrator.reachability("FC-SIPS").unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Topology(TopologyError::UnknownEndpoint(_))
        ));
        let err = f
            .orchestrator
            .record_reachability("nowhere", ReachabilityReport::default(), "checker")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Topology(_)));
    }

    #[tokio::test]
    async fn test_endpoint_reachability_is_recorded_and_audited() {
        let audit_store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, writer) = create_audit_system(audit_store.clone(), 100);
        let writer_task = tokio::spawn(writer.run());
        let f = fixture_with(Arc::new(SqliteItemStore::in_memory().unwrap()), Some(handle));

        assert!(f.orchestrator.reachability("solr").unwrap());
        let down = ReachabilityReport {
            reachable: false,
            reason: Some("connection refused".to_string()),
            recheck_after: None,
        };
        assert!(f
            .orchestrator
            .record_reachability("solr", down.clone(), "checker")
            .await
            .unwrap());
        // Still down: refreshes the mark without a second audit record.
        assert!(!f
            .orchestrator
            .record_reachability("solr", down, "checker")
            .await
            .unwrap());
        assert!(!f.orchestrator.reachability("solr").unwrap());

        let up = ReachabilityReport {
            reachable: true,
            ..Default::default()
        };
        assert!(f
            .orchestrator
            .record_reachability("solr", up, "checker")
            .await
            .unwrap());
        assert!(f.orchestrator.reachability("solr").unwrap());

        drop(f);
        writer_task.await.unwrap();
        let changes = audit_store
            .query(&AuditFilter::new().with_event_type("reachability_changed"))
            .unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].severity, crate::audit::Severity::Warning);
        assert_eq!(changes[1].actor.as_deref(), Some("checker"));
    }

    #[tokio::test]
    async fn test_reported_broker_outage_fails_dispatch_fast() {
        let f = fixture();
        f.orchestrator
            .record_reachability(
                "AMQP-FC",
                ReachabilityReport {
                    reachable: false,
                    reason: None,
                    recheck_after: Some(Duration::from_secs(60)),
                },
                "checker",
            )
            .await
            .unwrap();

        let err = f
            .orchestrator
            .submit(request("FC-SIPS"), "operator")
            .await
            .unwrap_err();
        assert!(is_dispatch_pending(&err));
        assert_eq!(f.connector.broker("AMQP-FC").publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_status_counts_stages() {
        let f = fixture();
        f.orchestrator.submit(request("FC-SIPS"), "operator").await.unwrap();
        f.orchestrator.submit(request("FC-SIPS"), "operator").await.unwrap();
        f.orchestrator.submit(request("PULSE10"), "operator").await.unwrap();

        let status = f.orchestrator.status().await;
        assert_eq!(status.in_flight, 3);
        assert_eq!(status.undispatched, 0);
        assert_eq!(status.by_stage.get("FC-SIPS"), Some(&2));
        assert_eq!(status.by_stage.get("PULSE10"), Some(&1));
        assert!(status.brokers_down.is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let f = fixture();
        f.orchestrator.start().await.unwrap();
        assert!(f.orchestrator.is_running());
        f.orchestrator.stop().await;
        assert!(!f.orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_terminal_position_after_timeouts() {
        let f = fixture();
        let item = f.orchestrator.submit(request("DC2"), "operator").await.unwrap();
        assert_eq!(f.orchestrator.sweep_timeouts().await, 0);

        let report = StageReport {
            outcome: Outcome::Timeout,
            ..success(&item)
        };
        f.orchestrator.report(report).await.unwrap();
        let item = f.orchestrator.get(&item.id).await.unwrap();
        assert_eq!(item.position, Position::TerminalFailed);
    }
}
