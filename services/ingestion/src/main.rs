//! admit ingestion service
//!
//! This service:
//! - Syncs event types and ingestion policies from the definition source
//! - Reloads broker settings and the API key while running
//! - Accepts events on `POST /ingest` and publishes admitted ones to the broker

use std::sync::Arc;

use admit_ingestion::{
    api,
    config::{BrokerMode, Config},
    policy::{PolicyDecisionEngine, SchemaRuleEvaluator},
    publisher::{
        BrokerConnector, HttpBrokerConnector, InMemoryBroker, PublisherClientCache,
        PublisherOptions,
    },
    schema::{JsonSchemaCompiler, SchemaRegistry},
    settings::{run_settings_reload_loop, SettingsCell, SettingsSource},
    sync::{DefinitionSourceClient, DefinitionSync},
    AppState, IngestionPipeline,
};
use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to ADMIT_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting admit ingestion");
    info!(
        listen_addr = %config.listen_addr,
        definitions_url = %config.definitions_url,
        broker_mode = ?config.broker_mode,
        "Configuration loaded"
    );

    // Live settings: initial load must succeed, later reloads keep the last good value
    let source = SettingsSource::new(config.settings_file.clone());
    let initial = source.load().context("Failed to load live settings")?;
    if initial.auth.token.is_none() {
        warn!("No ingest API key configured; POST /ingest will refuse every request");
    }
    let settings = Arc::new(SettingsCell::new(initial));

    let connector: Arc<dyn BrokerConnector> = match config.broker_mode {
        BrokerMode::Http => Arc::new(HttpBrokerConnector::new()?),
        BrokerMode::Memory => {
            warn!("Using the in-memory broker; events are not durable");
            Arc::new(InMemoryBroker::new())
        }
    };

    let publisher = Arc::new(PublisherClientCache::new(
        connector,
        settings.snapshot().broker.clone(),
        PublisherOptions {
            connect_timeout: config.broker_connect_timeout,
            send_timeout: config.broker_send_timeout,
            stream_defaults: config.stream_defaults,
        },
    ));

    // Engines stay pending until the first full definition sync
    let registry = Arc::new(SchemaRegistry::pending(Arc::new(JsonSchemaCompiler::new())));
    let engine = Arc::new(PolicyDecisionEngine::pending(Arc::new(SchemaRuleEvaluator::new())));

    tokio::spawn(run_settings_reload_loop(
        Arc::clone(&settings),
        source,
        config.settings_reload_interval,
    ));
    tokio::spawn(Arc::clone(&publisher).follow(settings.subscribe()));

    let definitions = DefinitionSync::new(
        DefinitionSourceClient::from_config(&config)?,
        Arc::clone(&registry),
        Arc::clone(&engine),
        config.sync_poll_interval,
    )
    .with_cursor_file(config.sync_cursor_file.clone());
    tokio::spawn(async move { definitions.run().await });

    let pipeline = IngestionPipeline::new(registry, engine, publisher)?;
    let app = api::create_router(AppState::new(pipeline, settings));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal; HTTP server shutting down");
        })
        .await?;

    info!("admit ingestion stopped");
    Ok(())
}
