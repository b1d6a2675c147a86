pub mod audit;
pub mod broker;
pub mod config;
pub mod dispatch;
pub mod health;
pub mod item;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod testing;
pub mod topology;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, AuditWriter, Severity, SqliteAuditStore,
};
pub use broker::{
    AmqpConnector, Broker, BrokerConnector, BrokerError, BrokerPool, InMemoryConnector,
    SchemeConnector,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use dispatch::{DispatchError, Dispatcher, DispatcherConfig, RetryConfig, WorkTicket};
pub use health::{ReachabilityCache, ReachabilityEntry};
pub use item::{
    HistoryEntry, Item, ItemFilter, ItemKind, ItemStatus, ItemStore, ItemStoreError, Outcome,
    Position, SqliteItemStore,
};
pub use orchestrator::{
    is_dispatch_pending, OrchestratorConfig, OrchestratorError, OrchestratorStatus,
    PipelineOrchestrator, ReachabilityReport,
};
pub use pipeline::{
    DispatchOrder, DuplicateReason, PipelineDefinition, PipelineError, PipelineMachine,
    ReportResult, StageReport, SubmitRequest, Transition,
};
pub use topology::{
    load_topology_document, parse_topology_document, EndpointKind, JobDescriptor,
    QueueDescriptor, Topology, TopologyError, TopologyHandle,
};
