use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use audiodrop_server::retention::ShutdownMode;
use audiodrop_server::transcoder::FfmpegTranscoder;
use audiodrop_server::{create_router, AppState, ServiceConfig};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// audiodrop - convert M4A uploads to short-lived MP3 downloads
#[derive(Parser, Debug)]
#[command(name = "audiodrop-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to listen on (overrides AUDIODROP_BIND)
    #[arg(short, long)]
    bind: Option<std::net::SocketAddr>,

    /// Directory for uploads and converted files (overrides AUDIODROP_STORAGE_DIR)
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Seconds a converted file stays downloadable (overrides AUDIODROP_RETENTION_SECS)
    #[arg(short, long)]
    retention_secs: Option<u64>,

    /// Leave pending files on disk at shutdown instead of deleting them
    #[arg(long)]
    keep_on_shutdown: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("audiodrop_server=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = ServiceConfig::from_env().context("Invalid configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(secs) = args.retention_secs {
        config.retention = std::time::Duration::from_secs(secs);
    }

    info!(
        bind = %config.bind,
        storage_dir = %config.storage_dir.display(),
        retention_secs = config.retention.as_secs(),
        transcoder = %config.transcoder.display(),
        "Starting audiodrop server"
    );

    let transcoder = Arc::new(FfmpegTranscoder::new(
        config.transcoder.clone(),
        config.transcode_timeout,
    ));
    let bind = config.bind;
    let state = AppState::new(config, transcoder);

    state
        .store
        .ensure_base_dir()
        .await
        .context("Failed to create storage directory")?;
    state
        .retention
        .recover()
        .await
        .context("Failed to recover artifacts from previous run")?;

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(address = %bind, "Listening");

    let retention = state.retention.clone();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let mode = if args.keep_on_shutdown {
        ShutdownMode::Abandon
    } else {
        ShutdownMode::Drain
    };
    retention.shutdown(mode).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
