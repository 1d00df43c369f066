//! Proxy Fleet Server
//!
//! This server manages a fleet of local proxy workers: it stores their
//! definitions, starts and stops their processes, and reports per-account
//! quota and entitlement fetched from the upstream provider.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod domain;
mod error;
mod infra;
mod service;

pub use config::Config;
pub use error::{Error, Result};

use infra::config_store::ConfigStore;
use service::credential::CredentialManager;
use service::instance::InstanceService;
use service::project::ProjectResolver;
use service::quota::QuotaAggregator;
use service::supervisor::{ProcessSupervisor, WorkerOptions};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub instance_service: Arc<InstanceService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if config.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let http_addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;

    info!("Starting Proxy Fleet Server");
    info!("Tokens directory: {}", config.tokens_dir.display());
    info!("Worker command: {} {:?}", config.worker_command, config.worker_args);

    let (instance_service, supervisor) = build_services(&config)?;
    let state = AppState { instance_service };

    let app = api::http::create_router(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    info!("HTTP listening on {}", http_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if config.stop_workers_on_shutdown {
        supervisor.stop_all().await;
    } else {
        info!(
            "Leaving {} workers running",
            supervisor.running_count().await
        );
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Wire the services together from configuration
fn build_services(config: &Config) -> anyhow::Result<(Arc<InstanceService>, Arc<ProcessSupervisor>)> {
    let accounts = Arc::new(config.account_registry());
    let store = Arc::new(ConfigStore::new(&config.instances_file));
    info!("Instances file: {}", store.path().display());
    let credentials = Arc::new(CredentialManager::new(
        &config.tokens_dir,
        config.http_timeout(),
    )?);

    let supervisor = Arc::new(ProcessSupervisor::new(
        store.clone(),
        credentials.clone(),
        accounts.clone(),
        WorkerOptions {
            program: config.worker_command.clone(),
            args: config.worker_args.clone(),
            host: config.worker_host.clone(),
            stop_timeout: config.stop_timeout(),
            probe_timeout: config.probe_timeout(),
        },
    ));

    let quota = Arc::new(QuotaAggregator::new(
        credentials.clone(),
        config.userinfo_url.clone(),
        config.max_concurrent_fetches,
    ));
    let projects = Arc::new(ProjectResolver::new(
        credentials.clone(),
        config.resource_manager_url.clone(),
    ));

    let instance_service = Arc::new(InstanceService::new(
        store,
        credentials,
        accounts,
        supervisor.clone(),
        quota,
        projects,
    ));

    Ok((instance_service, supervisor))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Received shutdown signal");
}
