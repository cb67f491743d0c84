use std::sync::Arc;

use tracing::info;

use murmur_db::Database;
use murmur_gateway::notify::{QueueNotifier, run_dispatch_loop};
use murmur_server::config::ServerConfig;
use murmur_server::{Services, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur_server=debug,murmur_gateway=debug,murmur_api=debug,murmur_db=debug,tower_http=debug".into()),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&config.db_path)?);

    let (notifier, jobs) = QueueNotifier::new();
    tokio::spawn(run_dispatch_loop(jobs));

    let services = Services::new(
        db,
        Arc::new(notifier),
        config.jwt_secret.clone(),
        config.history_page,
    );
    let app = build_router(&services);

    let addr = config.addr()?;
    info!("Murmur server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
