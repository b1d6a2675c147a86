use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse_core::{
    create_audit_system, load_config, validate_config, AuditEvent, AuditStore, BrokerConnector,
    ItemStore, PipelineOrchestrator, SchemeConnector, SqliteAuditStore, SqliteItemStore, Topology,
};

use pulse_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("PULSE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Brokers: {}", config.brokers.len());

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Load topology document against the broker registry
    let topology = Topology::load(&config.brokers, &config.topology.path).with_context(|| {
        format!(
            "Failed to load topology from {:?}",
            config.topology.path
        )
    })?;
    info!(
        queues = topology.queues.len(),
        jobs = topology.jobs.len(),
        endpoints = topology.endpoints.len(),
        "Topology loaded"
    );

    // Create SQLite audit store
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    // Create SQLite item store
    let item_store: Arc<dyn ItemStore> = Arc::new(
        SqliteItemStore::new(&config.database.path).context("Failed to create item store")?,
    );
    info!("Item store initialized");

    // Create audit system
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);

    // Spawn audit writer task
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    let connector: Arc<dyn BrokerConnector> = Arc::new(
        SchemeConnector::new().with_connect_timeout(config.dispatcher.connect_timeout()),
    );
    let orchestrator = Arc::new(
        PipelineOrchestrator::from_config(
            &config,
            topology,
            connector,
            item_store,
            Some(audit_handle.clone()),
        )
        .context("Failed to assemble pipeline")?,
    );

    if config.orchestrator.enabled {
        orchestrator
            .start()
            .await
            .context("Failed to start orchestrator")?;
        info!("Pipeline orchestrator started");
    } else {
        // Still reload in-flight items so reports and operator actions work.
        let recovered = orchestrator
            .recover()
            .await
            .context("Failed to recover in-flight items")?;
        warn!(recovered, "Orchestrator loops disabled in config; timeouts will not be swept");
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&orchestrator),
        audit_store,
    ));

    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if orchestrator.is_running() {
        info!("Stopping orchestrator...");
        orchestrator.stop().await;
        info!("Orchestrator stopped");
    }

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The orchestrator holds an AuditHandle clone; every handle must be
    // dropped before the writer's channel closes.
    drop(orchestrator);
    drop(audit_handle);

    // Wait for writer to finish processing remaining events
    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
