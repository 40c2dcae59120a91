//! TCP acceptor and the shared state behind every connection handler.

pub mod error;
mod handler;
pub mod proto;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::locks::HashLocks;
use crate::queue::VideoQueue;
use crate::transcode::Transcoder;

pub use error::{HandlerError, HandlerResult};

/// State shared by every connection handler.
pub struct IngestContext {
    pub(crate) uploads_dir: PathBuf,
    pub(crate) queue: Arc<VideoQueue>,
    pub(crate) locks: HashLocks,
    pub(crate) transcoder: Transcoder,
    pub(crate) compress_threshold: u64,
}

impl IngestContext {
    pub fn new(
        uploads_dir: PathBuf,
        queue: Arc<VideoQueue>,
        transcoder: Transcoder,
        compress_threshold: u64,
    ) -> Self {
        Self {
            uploads_dir,
            queue,
            locks: HashLocks::new(),
            transcoder,
            compress_threshold,
        }
    }
}

/// Accepts producer connections and runs each one through the upload
/// pipeline on a worker pool of fixed size. Excess connections wait for
/// a free permit; the backlog is bounded only by OS socket limits.
pub struct IngestServer {
    listener: TcpListener,
    ctx: Arc<IngestContext>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl IngestServer {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        workers: usize,
        ctx: Arc<IngestContext>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            ctx,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs until `shutdown` flips. On shutdown the listener closes, no
    /// new connections are admitted, and in-flight handlers are allowed
    /// to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, workers = self.workers, "ingest server listening"),
            Err(_) => info!(workers = self.workers, "ingest server listening"),
        }

        let mut handlers = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "producer connected");
                        let permits = self.permits.clone();
                        let ctx = self.ctx.clone();
                        handlers.spawn(async move {
                            let _permit = match permits.acquire_owned().await {
                                Ok(permit) => permit,
                                Err(_) => return,
                            };
                            handler::handle_connection(ctx, socket, peer).await;
                        });
                    }
                    Err(err) => {
                        error!(error = %err, "failed to accept connection");
                    }
                },
                changed = shutdown.changed() => {
                    let _ = changed;
                    break;
                }
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(err) = finished {
                        error!(error = %err, "upload worker panicked");
                    }
                }
            }
        }

        drop(self.listener);
        if !handlers.is_empty() {
            info!(in_flight = handlers.len(), "waiting for in-flight uploads");
        }
        while let Some(finished) = handlers.join_next().await {
            if let Err(err) = finished {
                error!(error = %err, "upload worker panicked");
            }
        }
        info!("ingest server stopped");
    }
}
