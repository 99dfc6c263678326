//! oddsfeed - prediction-market price service
//!
//! Main entry point for the gRPC server

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use oddsfeed_grpc_server::{GrpcServer, LogConfig, ServerSettings};
use oddsfeed_price_feed::FeedHub;

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let settings = ServerSettings::load()?;
    init_tracing(&settings.log);

    info!("Starting oddsfeed v{}", env!("CARGO_PKG_VERSION"));

    let hub = Arc::new(FeedHub::new(settings.feed.clone())?);
    hub.start();
    info!("Feed hub started");

    let server = GrpcServer::new(settings.grpc.clone(), Arc::clone(&hub));

    info!(addr = %server.address(), "Serving until Ctrl+C or SIGTERM");
    let result = server.serve_until(shutdown_signal()).await;
    hub.stop();

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e);
    }

    info!("Server shutdown complete");
    Ok(())
}
