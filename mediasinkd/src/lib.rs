use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio::fs;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mediasink_core::{
    load_config, IngestContext, IngestServer, SinkConfig, Transcoder, VideoQueue,
};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config error: {0}")]
    Config(#[from] mediasink_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "TCP video ingestion daemon",
    long_about = None
)]
pub struct Cli {
    /// Number of concurrent upload workers
    #[arg(value_name = "WORKERS", value_parser = clap::value_parser!(u32).range(1..))]
    pub workers: Option<u32>,
    /// Maximum number of queued videos awaiting display
    #[arg(value_name = "QUEUE_CAPACITY", value_parser = clap::value_parser!(u32).range(1..))]
    pub queue_capacity: Option<u32>,
    /// Further positional arguments are ignored with a warning
    #[arg(value_name = "IGNORED", hide = true)]
    pub extra: Vec<String>,
    /// Optional TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

pub async fn run(cli: Cli) -> Result<()> {
    if !cli.extra.is_empty() {
        warn!(
            ignored = ?cli.extra,
            "ignoring extra command-line arguments; only WORKERS and QUEUE_CAPACITY are used"
        );
    }

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SinkConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.limits.workers = workers as usize;
    }
    if let Some(capacity) = cli.queue_capacity {
        config.limits.queue_capacity = capacity as usize;
    }
    config.validate()?;

    info!(
        workers = config.limits.workers,
        queue_capacity = config.limits.queue_capacity,
        port = config.server.port,
        "starting media sink"
    );

    let uploads_dir = PathBuf::from(&config.server.uploads_dir);
    fs::create_dir_all(&uploads_dir).await?;

    let queue = Arc::new(VideoQueue::new(config.limits.queue_capacity));
    let transcoder = Transcoder::new(&config.transcode);
    let ctx = Arc::new(IngestContext::new(
        uploads_dir,
        queue.clone(),
        transcoder,
        config.limits.compress_threshold_bytes,
    ));

    let server = IngestServer::bind(
        ("0.0.0.0", config.server.port),
        config.limits.workers,
        ctx,
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let display = tokio::spawn(drain_queue(queue.clone()));
    let server_task = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    queue.close();

    server_task.await?;
    display.await?;
    info!("media sink stopped");
    Ok(())
}

/// Stand-in for the display surface: drains the hand-off queue and logs
/// each handle as it becomes ready.
async fn drain_queue(queue: Arc<VideoQueue>) {
    while let Ok(handle) = queue.take().await {
        info!(
            video = %handle,
            hash = %handle.hash(),
            received_at = %handle.received_at(),
            pending = queue.size(),
            "video ready for display"
        );
    }
}
