//! # Payhook Service
//!
//! Binary entry point for the payment webhook service.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes structured logging
//! - Wires the stores, downstream mutator, and alert notifier
//! - Starts the HTTP server from payhook-api and drains on shutdown

mod settings;

use anyhow::Context;
use payhook_api::{start_server, AppState, LoggingConfig, ServiceConfig, ServiceError};
use payhook_core::{
    InMemorySecurityEventStore, InMemoryWebhookEventStore, PipelineDependencies,
    RecordingPaymentMutator, SystemClock, TracingAlertNotifier,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_DIRECTIVES: &str =
    "payhook_service=info,payhook_api=info,payhook_core=info,tower_http=debug";

#[tokio::main]
async fn main() {
    let service_config = match settings::load() {
        Ok(config) => {
            init_tracing(&config.logging);
            config
        }
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            error!(error = %e, "Service configuration could not be loaded; aborting");
            std::process::exit(3);
        }
    };

    info!("Starting Payhook Service");
    warn_on_risky_settings(&service_config);

    if let Err(e) = run(service_config).await {
        error!(error = ?e, "Service stopped with error");
        std::process::exit(exit_code(&e));
    }
}

async fn run(service_config: ServiceConfig) -> anyhow::Result<()> {
    let deps = PipelineDependencies {
        webhook_store: Arc::new(InMemoryWebhookEventStore::new()),
        security_store: Arc::new(InMemorySecurityEventStore::new()),
        mutator: Arc::new(RecordingPaymentMutator::new()),
        clock: Arc::new(SystemClock),
        alerts: Arc::new(TracingAlertNotifier),
        rate_limiter: None,
    };

    let state =
        AppState::build(service_config, deps).context("Failed to assemble service state")?;

    info!(
        host = %state.config.server.host,
        port = state.config.server.port,
        endpoint = %state.config.webhooks.endpoint_path,
        "Starting HTTP server"
    );

    start_server(state, shutdown_signal())
        .await
        .context("HTTP server terminated")?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if logging.level.is_empty() || logging.level == "info" {
            DEFAULT_LOG_DIRECTIVES.into()
        } else {
            EnvFilter::new(&logging.level)
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn warn_on_risky_settings(config: &ServiceConfig) {
    if config.security.shared_secret.is_none() {
        warn!("No webhook shared secret configured; every delivery will be rejected");
    }
    if config.admin.api_key().is_none() {
        warn!("No internal API key configured; admin endpoints are disabled");
    }
    if config.server.trust_forwarded_for {
        info!("Source addresses taken from X-Forwarded-For");
    }
}

fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<ServiceError>() {
        Some(ServiceError::BindFailed { .. }) => 1,
        Some(ServiceError::ServerFailed { .. }) => 2,
        Some(ServiceError::Configuration(_)) => 3,
        Some(ServiceError::Metrics(_)) | None => 4,
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
