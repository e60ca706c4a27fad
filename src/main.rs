use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use hearth_functions::{
    api::{ApiState, SecurityMiddlewareConfig, SecurityState, create_router},
    config::{AppConfig, sanitize_for_logging},
    notify::{LogNotifier, Notifier, PushGatewayNotifier},
    store::{DocumentStore, MemoryStore, PostgresStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates all security requirements
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check HEARTH_* environment variables.");
        e
    })?;

    init_logging(&config)?;

    info!("Starting hearth functions server");
    info!(
        "Auth enabled: {}, API keys: [{}]",
        config.security.enable_auth,
        config
            .security
            .api_keys
            .iter()
            .map(|k| sanitize_for_logging(k))
            .collect::<Vec<_>>()
            .join(", ")
    );
    for (level, notice) in config.startup_notices() {
        if level == Level::WARN {
            warn!("{}", notice);
        } else {
            info!("{}", notice);
        }
    }

    let store: Arc<dyn DocumentStore> = if config.database.postgres_enabled {
        let store = PostgresStore::connect(
            &config.database.postgres_url,
            config.database.max_connections,
        )
        .await
        .context("Failed to connect to PostgreSQL")?;
        store
            .init_schema()
            .await
            .context("Failed to initialize document store schema")?;
        Arc::new(store)
    } else {
        info!("PostgreSQL disabled, using in-memory document store");
        Arc::new(MemoryStore::new())
    };

    let notifier: Arc<dyn Notifier> = match config.push.gateway() {
        Some(gateway) => Arc::new(PushGatewayNotifier::new(&gateway)?),
        None => Arc::new(LogNotifier),
    };

    let state = ApiState::build(store, notifier, &config);
    info!(
        report_threshold = config.moderation.report_threshold,
        initial_score = config.trust.initial_score,
        txn_attempts = config.transactions.max_attempts,
        "Services initialized"
    );

    let security_state = SecurityState::new(SecurityMiddlewareConfig {
        enable_auth: config.security.enable_auth,
        api_keys: config.security.api_keys.clone(),
        log_requests: config.logging.log_requests,
        public_paths: vec!["/health".to_string()],
    });

    let app = create_router(state, security_state, config.security.max_request_size);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Hearth functions server listening on {}", bind_addr);
    info!(
        "Max body={}KB, request logging={}",
        config.security.max_request_size / 1024,
        config.logging.log_requests
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Initialize logging; `RUST_LOG` takes precedence over `HEARTH_LOG_LEVEL`
fn init_logging(config: &AppConfig) -> Result<()> {
    let level = match config.logging.level.to_lowercase().as_str() {
        "error" => "error",
        "warn" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
