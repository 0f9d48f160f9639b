//! Binary entrypoint: loads configuration, wires the node store, scheduler,
//! routing policy, and controller registry together, and serves the HTTP
//! front-end until shutdown.

use std::sync::Arc;

use clap::Parser;
use digs::config::{Cli, CoordinatorConfig, LogFormat};
use digs::controller::kube_client::RealKubeClient;
use digs::controller::status_file::StatusHandler;
use digs::controller::{ControllerRegistry, CrossNodeController, KubeClient};
use digs::core::DeployMode;
use digs::http::{router, spawn_background_loops, AppState};
use digs::node_store::NodeStore;
use digs::policies::{AlgorithmType, PolicyFactory};
use digs::scheduler::Scheduler;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve()?;
    init_tracing(&config);

    if let Err(err) = run(config).await {
        error!(error = %err, "startup failed");
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(config: &CoordinatorConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

async fn run(config: CoordinatorConfig) -> anyhow::Result<()> {
    let deploy_mode = if config.scheduler.deploy_mode.is_single_node() {
        DeployMode::SingleNode
    } else {
        DeployMode::PdDisaggregated
    };

    let store = Arc::new(NodeStore::new());
    let scheduler = Scheduler::new(store.clone(), deploy_mode);
    let policy = PolicyFactory::create(
        AlgorithmType::parse(&config.scheduler.algorithm_type),
        config.scheduler.prefix_cache_config(),
    );
    scheduler.set_policy(Arc::from(policy));
    scheduler.start();

    let kube: Arc<dyn KubeClient> = Arc::new(
        RealKubeClient::try_new(
            std::time::Duration::from_secs(config.cross_node.kube_call_timeout_secs),
            config.cross_node.kube_call_retries,
        )
        .await?,
    );
    let status_handler = Arc::new(StatusHandler::new(config.status_file.clone(), config.cross_node.max_servers));
    let registry = Arc::new(ControllerRegistry::new());

    restore_controllers(&registry, &kube, &status_handler, &config).await?;

    let state = AppState {
        scheduler,
        registry,
        kube,
        status_handler,
        cross_node_config: config.cross_node.clone(),
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.http.bind_addr).await?;
    info!(addr = %config.http.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Rehydrates every replica recorded in the status file from a prior run,
/// discarding records whose backing Deployment no longer exists.
async fn restore_controllers(
    registry: &ControllerRegistry,
    kube: &Arc<dyn KubeClient>,
    status_handler: &Arc<StatusHandler>,
    config: &CoordinatorConfig,
) -> anyhow::Result<()> {
    for record in status_handler.load().await? {
        let controller = Arc::new(CrossNodeController::new(
            kube.clone(),
            status_handler.clone(),
            config.cross_node.clone(),
        ));
        match controller.restore_from_status(&record).await {
            Ok(()) => {
                info!(server_name = %record.server_name, "restored replica from status file");
                registry.insert(record.server_name.clone(), controller.clone());
                spawn_background_loops(controller, config.cross_node.clone());
            }
            Err(err) => {
                error!(server_name = %record.server_name, error = %err, "failed to restore replica, dropping record");
                status_handler.remove(&record.server_name).await.ok();
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
