#![warn(clippy::all)]

use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uplink::ControllerClient;

mod config;
mod monitoring;
mod routes;

use config::AgentConfig;
use monitoring::{MonitoringExecutor, MonitoringScheduler};
use routes::StatusSource;

/// SiteUp remote monitoring agent
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/siteup/agent.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AgentConfig::load(cli.config.as_deref()).context("Configuration error")?;
    if cli.print_config {
        println!("{config}");
        return Ok(());
    }

    logger::init_tracing(&config.agent.log_level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        agent_id = %config.agent.id,
        hostname = %config.agent.hostname,
        controller = %config.controller.url,
        controller_port = config.controller.port,
        health_port = config.agent.health_port,
        "SiteUp agent starting"
    );
    if config.controller.use_websocket {
        info!("Push channel enabled, falling back to HTTP/2 then HTTP/1.1 polling");
    } else {
        info!("Push channel disabled, polling over HTTP/2 then HTTP/1.1");
    }

    run(config).await
}

async fn run(config: AgentConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.agent.health_port));
    let listener =
        TcpListener::bind(addr).with_context(|| format!("Failed to bind status server on {addr}"))?;

    let root = CancellationToken::new();
    let client = Arc::new(
        ControllerClient::new(config.to_controller_config())
            .context("Failed to create controller client")?,
    );

    let initial = client
        .establish(&root)
        .await
        .with_context(|| format!("Failed to connect to controller at {}", config.controller.url))?;

    if client.is_push_connected().await {
        info!("Connected to controller, push channel established for real-time updates");
    } else {
        info!(protocol = %client.request_protocol().await, "Connected to controller, using polling");
    }

    let executor = MonitoringExecutor::new(
        config.probe_timeout(),
        config.ping_timeout(),
        &config.controller.user_agent,
    )?;
    let scheduler =
        Arc::new(MonitoringScheduler::new(client.clone(), Arc::new(executor), root.clone()));
    scheduler.start(&initial, client.take_updates().await).await;

    let status = web::Data::new(StatusSource {
        agent_id: config.agent.id.clone(),
        client: client.clone(),
        scheduler: scheduler.clone(),
    });
    let server =
        HttpServer::new(move || App::new().app_data(status.clone()).configure(routes::routes))
            .workers(1)
            .disable_signals()
            .listen(listener)?
            .run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);
    info!(%addr, "Status server listening");

    shutdown_signal().await;
    info!("Shutdown signal received");

    scheduler.stop().await;
    client.close().await;
    server_handle.stop(true).await;
    match server_task.await {
        Ok(Err(e)) => warn!("Status server exited with error: {}", e),
        Err(e) => warn!("Status server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    info!("SiteUp agent shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
