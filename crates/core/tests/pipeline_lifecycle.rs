//! Pipeline lifecycle integration tests.
//!
//! These tests drive items through the full orchestrator with in-memory
//! brokers:
//! - Stage progression and history recording
//! - Retry cap and resubmission
//! - Lineage isolation
//! - Concurrent reports and cancellation races
//! - Restart recovery from a file-backed store

use std::sync::Arc;

use tempfile::TempDir;

use pulse_core::{
    testing::{sample_topology, TestPipeline},
    DuplicateReason, Item, ItemStore, ItemKind, Outcome, PipelineDefinition, Position,
    ReportResult, SqliteItemStore, StageReport, SubmitRequest,
};

fn request(stage: &str) -> SubmitRequest {
    SubmitRequest {
        id: None,
        kind: ItemKind::Sip,
        stage: stage.to_string(),
        job: None,
        payload: serde_json::json!({"path": "/sips/example"}),
    }
}

fn report(item: &Item, outcome: Outcome, actor: &str) -> StageReport {
    StageReport {
        item_id: item.id.clone(),
        stage: item.current_stage().expect("item in flight").to_string(),
        ticket_seq: item.ticket_seq(),
        outcome,
        actor: actor.to_string(),
        note: None,
    }
}

/// Report Success on the item's current stage and return the new state.
async fn advance(pipeline: &TestPipeline, item_id: &str) -> Item {
    let item = pipeline.orchestrator.get(item_id).await.unwrap();
    pipeline
        .orchestrator
        .report(report(&item, Outcome::Success, "worker"))
        .await
        .unwrap();
    pipeline.orchestrator.get(item_id).await.unwrap()
}

#[tokio::test]
async fn test_success_at_fc_sips_moves_to_fc_sub() {
    let pipeline = TestPipeline::new(2);
    let item = pipeline.orchestrator.submit(request("FC-SIPS"), "operator").await.unwrap();
    assert!(item.history.is_empty());
    assert_eq!(item.attempts, 0);

    let item = advance(&pipeline, &item.id).await;

    assert_eq!(item.position, Position::stage("FC-SUB"));
    assert_eq!(item.history.len(), 1);
    assert_eq!(pipeline.tickets("FC-SUB").len(), 1);
}

#[tokio::test]
async fn test_third_failure_with_cap_two_is_terminal() {
    let pipeline = TestPipeline::new(2);
    let orchestrator = &pipeline.orchestrator;
    let mut item = orchestrator.submit(request("FC-SIPS"), "operator").await.unwrap();

    for expected in 1..=2u32 {
        orchestrator
            .report(report(&item, Outcome::Failure, "sip-builder"))
            .await
            .unwrap();
        item = orchestrator.get(&item.id).await.unwrap();
        assert_eq!(item.position, Position::stage("FC-ERR"));
        assert_eq!(item.attempts, expected);

        let transition = orchestrator.resubmit(&item.id, "operator", None).await.unwrap();
        item = transition.item;
        assert_eq!(item.position, Position::stage("FC-SIPS"));
    }

    orchestrator
        .report(report(&item, Outcome::Failure, "sip-builder"))
        .await
        .unwrap();
    let item = orchestrator.get(&item.id).await.unwrap();

    assert_eq!(item.position, Position::TerminalFailed);
    assert_eq!(item.attempts, 3);
    // submit + two resubmits, never a fourth FC-SIPS ticket
    assert_eq!(pipeline.tickets("FC-SIPS").len(), 3);
    assert_eq!(pipeline.tickets("FC-ERR").len(), 2);
    assert!(orchestrator.resubmit(&item.id, "operator", None).await.is_err());
}

#[tokio::test]
async fn test_pulse_chain_reaches_terminal_success() {
    let pipeline = TestPipeline::new(0);
    let item = pipeline.orchestrator.submit(request("PULSE01"), "operator").await.unwrap();

    let mut current = item;
    for stage in ["PULSE02", "PULSE03", "PULSE04", "PULSE05"] {
        current = advance(&pipeline, &current.id).await;
        assert_eq!(current.position, Position::stage(stage));
        assert_eq!(pipeline.tickets(stage).len(), 1);
    }
    let done = advance(&pipeline, &current.id).await;

    assert_eq!(done.position, Position::TerminalSuccess);
    assert_eq!(done.attempts, 0);
    assert_eq!(done.history.len(), 5);
    let seqs: Vec<u32> = done.history.iter().map(|h| h.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_weekly_jobs_resolve_to_distinct_servers() {
    let topology = sample_topology();

    let weekly_2 = topology.resolve_job("weekly-2").unwrap();
    assert_eq!(weekly_2.canonical_name, "weekly");
    assert_eq!(weekly_2.server, "H3-PC1");

    let weekly = topology.resolve_job("weekly").unwrap();
    assert_eq!(weekly.canonical_name, "weekly");
    assert_eq!(weekly.server, "H3-FC2");

    let servers: Vec<&str> = topology
        .jobs_for_canonical_name("weekly")
        .iter()
        .map(|j| j.server.as_str())
        .collect();
    assert_eq!(servers, vec!["H3-FC2", "H3-PC1"]);
}

#[tokio::test]
async fn test_job_reference_travels_in_ticket() {
    let pipeline = TestPipeline::new(2);
    let mut req = request("PULSE01");
    req.kind = ItemKind::CrawlUri;
    req.job = Some("daily-2".to_string());
    pipeline.orchestrator.submit(req, "scheduler").await.unwrap();

    let tickets = pipeline.tickets("PULSE01");
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0]["job"]["name"], "daily");
    assert_eq!(tickets[0]["job"]["server"], "H3-PC1");
    assert_eq!(tickets[0]["item_kind"], "crawl_uri");
}

#[tokio::test]
async fn test_every_catalog_key_round_trips() {
    let topology = sample_topology();
    assert!(!topology.queues.is_empty());
    for queue in topology.queues.iter() {
        assert_eq!(topology.resolve_queue(&queue.key).unwrap().key, queue.key);
    }
}

#[tokio::test]
async fn test_lineages_never_cross() {
    let definition = PipelineDefinition::standard();
    for lineage in definition.lineages() {
        for edge in &lineage.edges {
            assert!(lineage.contains(&edge.from));
            if let pulse_core::pipeline::Target::Stage(ref to) = edge.to {
                assert!(
                    lineage.contains(to),
                    "{} edge {} -> {} leaves the lineage",
                    lineage.name,
                    edge.from,
                    to
                );
            }
        }
        for stage in &lineage.stages {
            assert_eq!(definition.lineage_of(stage).unwrap().name, lineage.name);
        }
    }
}

#[tokio::test]
async fn test_dc_items_only_touch_their_own_queue() {
    let pipeline = TestPipeline::new(3);
    for dc in ["DC0", "DC1", "DC2", "DC3"] {
        let item = pipeline.orchestrator.submit(request(dc), "operator").await.unwrap();
        pipeline
            .orchestrator
            .report(report(&item, Outcome::Failure, "dc-worker"))
            .await
            .unwrap();
        let item = pipeline.orchestrator.get(&item.id).await.unwrap();
        assert_eq!(item.position, Position::TerminalFailed);
        assert_eq!(pipeline.tickets(dc).len(), 1);
    }

    let dc = pipeline.connector.broker("AMQP-DC");
    assert_eq!(dc.total_messages(), 4);
    assert_eq!(pipeline.connector.broker("AMQP-FC").total_messages(), 0);
    assert_eq!(pipeline.connector.broker("AMQP-PC").total_messages(), 0);
}

#[tokio::test]
async fn test_index_resubmits_to_failed_stage() {
    let pipeline = TestPipeline::new(2);
    let item = pipeline.orchestrator.submit(request("PULSE11"), "crawler").await.unwrap();

    pipeline
        .orchestrator
        .report(report(&item, Outcome::Failure, "indexer"))
        .await
        .unwrap();
    let item = pipeline.orchestrator.get(&item.id).await.unwrap();
    assert_eq!(item.position, Position::stage("PULSE09"));

    let transition = pipeline.orchestrator.resubmit(&item.id, "operator", None).await.unwrap();
    assert_eq!(transition.item.position, Position::stage("PULSE11"));
    assert_eq!(pipeline.tickets("PULSE11").len(), 2);
    assert!(pipeline.tickets("PULSE10").is_empty());
}

#[tokio::test]
async fn test_qa_hold_and_release() {
    let pipeline = TestPipeline::new(2);
    let item = pipeline.orchestrator.submit(request("FC-SIPS"), "operator").await.unwrap();
    let item = advance(&pipeline, &item.id).await;

    pipeline
        .orchestrator
        .report(report(&item, Outcome::Failure, "qa"))
        .await
        .unwrap();
    let held = pipeline.orchestrator.get(&item.id).await.unwrap();
    assert!(held.held);
    assert_eq!(held.position, Position::stage("FC-SUB"));
    assert!(pipeline.tickets("FC-ERR").is_empty());

    let released = advance(&pipeline, &item.id).await;
    assert!(!released.held);
    assert_eq!(released.position, Position::stage("FC-ALL"));
    assert_eq!(pipeline.tickets("FC-ALL").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_reports_advance_once() {
    let pipeline = TestPipeline::new(2);
    let item = pipeline.orchestrator.submit(request("PULSE01"), "operator").await.unwrap();

    let mut handles = Vec::new();
    for n in 0..16 {
        let orchestrator = Arc::clone(&pipeline.orchestrator);
        let report = report(&item, Outcome::Success, &format!("worker-{}", n));
        handles.push(tokio::spawn(async move { orchestrator.report(report).await }));
    }

    let mut applied = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ReportResult::Applied(_) => applied += 1,
            ReportResult::Duplicate { .. } => duplicates += 1,
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(duplicates, 15);
    let item = pipeline.orchestrator.get(&item.id).await.unwrap();
    assert_eq!(item.history.len(), 1);
    assert_eq!(item.position, Position::stage("PULSE02"));
    assert_eq!(pipeline.tickets("PULSE02").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_races_success_at_pulse04() {
    for _ in 0..10 {
        let pipeline = TestPipeline::new(2);
        let item = pipeline.orchestrator.submit(request("PULSE01"), "operator").await.unwrap();
        let mut item = item;
        for _ in 0..3 {
            item = advance(&pipeline, &item.id).await;
        }
        assert_eq!(item.position, Position::stage("PULSE04"));

        let reporter = Arc::clone(&pipeline.orchestrator);
        let canceller = Arc::clone(&pipeline.orchestrator);
        let success = report(&item, Outcome::Success, "sip-submitter");
        let item_id = item.id.clone();

        let (reported, cancelled) = tokio::join!(
            tokio::spawn(async move { reporter.report(success).await }),
            tokio::spawn(async move { canceller.cancel(&item_id, "operator", None).await }),
        );
        let reported = reported.unwrap().unwrap();
        cancelled.unwrap().unwrap();

        let item = pipeline.orchestrator.get(&item.id).await.unwrap();
        assert_eq!(item.position, Position::TerminalFailed);

        let from_pulse04: Vec<_> = item
            .history
            .iter()
            .filter(|h| h.from == Position::stage("PULSE04"))
            .collect();
        assert_eq!(from_pulse04.len(), 1);

        match reported {
            ReportResult::Applied(_) => {
                assert_eq!(from_pulse04[0].outcome, Outcome::Success);
                assert_eq!(from_pulse04[0].to, Position::stage("PULSE05"));
                assert_eq!(item.history.last().unwrap().outcome, Outcome::Cancel);
            }
            ReportResult::Duplicate { reason, .. } => {
                assert_eq!(reason, DuplicateReason::Terminal);
                assert_eq!(from_pulse04[0].outcome, Outcome::Cancel);
                assert!(pipeline.tickets("PULSE05").is_empty());
            }
        }
    }
}

#[tokio::test]
async fn test_restart_recovers_from_history() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = dir.path().join("pulse.db");

    let item_id = {
        let store: Arc<dyn ItemStore> = Arc::new(SqliteItemStore::new(&db_path).unwrap());
        let pipeline = TestPipeline::with_store(2, store);
        let item = pipeline.orchestrator.submit(request("PULSE01"), "operator").await.unwrap();
        let item = advance(&pipeline, &item.id).await;
        advance(&pipeline, &item.id).await;
        item.id
    };

    let store: Arc<dyn ItemStore> = Arc::new(SqliteItemStore::new(&db_path).unwrap());
    let pipeline = TestPipeline::with_store(2, store);
    assert_eq!(pipeline.orchestrator.recover().await.unwrap(), 1);

    let item = pipeline.orchestrator.get(&item_id).await.unwrap();
    assert_eq!(item.position, Position::stage("PULSE03"));
    assert_eq!(item.history.last().unwrap().to, Position::stage("PULSE03"));
    // Dispatched before the restart, so nothing is republished.
    assert!(pipeline.tickets("PULSE03").is_empty());

    let item = advance(&pipeline, &item_id).await;
    assert_eq!(item.position, Position::stage("PULSE04"));
    assert_eq!(item.history.len(), 3);
}
