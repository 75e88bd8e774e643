//! proxbot: wires config, the Proxmox client, the alert monitor and the
//! HTTP ingress together, then serves until Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use proxbot::actions::ActionController;
use proxbot::alerts::AlertMonitor;
use proxbot::api::ProxmoxClient;
use proxbot::auth::AccessGate;
use proxbot::config::BotConfig;
use proxbot::console::GuestCommandExecutor;
use proxbot::directory::Directory;
use proxbot::dispatch::Dispatcher;
use proxbot::health::HealthTracker;
use proxbot::http::{self, AppState};
use proxbot::logging;
use proxbot::session::SessionStore;
use proxbot::sink::{NotificationSink, TelegramSink};
use proxbot_host::{HostMetrics, ProcessRunner, SysinfoCollector};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = BotConfig::load().await.context("failed to load configuration")?;
    cfg.validate().context("invalid configuration")?;
    logging::init(&cfg.logging).context("failed to initialize logging")?;
    info!("Starting proxbot with {:?}", cfg);

    let health = HealthTracker::new();

    let client = Arc::new(ProxmoxClient::new(cfg.proxmox.clone()).with_health(health.clone()));
    if let Err(e) = client.ensure_connected().await {
        error!("Proxmox API unreachable at startup: {}", e);
        return Err(e).context("failed to connect to the Proxmox API");
    }

    let metrics: Arc<dyn HostMetrics> = Arc::new(SysinfoCollector::new());
    let sink: Arc<dyn NotificationSink> =
        Arc::new(TelegramSink::new(&cfg.chat).context("failed to build chat client")?);

    let directory = Directory::new(client.clone());
    let dispatcher = Dispatcher::new(
        directory.clone(),
        ActionController::new(directory.clone()),
        GuestCommandExecutor::new(client, Arc::new(ProcessRunner)),
        metrics.clone(),
    );

    let monitor = Arc::new(
        AlertMonitor::new(
            metrics.clone(),
            sink.clone(),
            cfg.chat.whitelist.clone(),
            cfg.alerts.clone(),
        )
        .with_health(health.clone()),
    );
    let monitor = monitor.start();

    let app_state = AppState {
        dispatcher: Arc::new(dispatcher),
        sessions: SessionStore::new(),
        gate: AccessGate::new(cfg.chat.whitelist.clone(), sink),
        directory,
        metrics,
        health,
        api_key: cfg.http.api_key.clone(),
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!("Listening on http://{}", cfg.http.bind);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    monitor.stop().await;
    served.context("HTTP server failed")?;
    info!("proxbot stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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
    info!("Shutdown signal received");
}
