//! Per-connection upload pipeline.
//!
//! Each connection walks ReadMeta → PreQueueCheck → CreateTemp →
//! Receive → Hash → DupCheck → MaybeCompress → Finalize → Admit, with
//! everything from DupCheck onward serialized per content hash. The
//! terminal status is written exactly once, after cleanup, so the
//! on-disk invariants hold by the time the producer sees the reply.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::error::{HandlerError, HandlerResult};
use super::proto::{self, Status};
use super::IngestContext;
use crate::queue::VideoHandle;
use crate::{dedup, hash, uploads};

const TEMP_CREATE_ATTEMPTS: usize = 4;

/// Upper bound on waiting for the producer to stop sending after the
/// status went out.
const DRAIN_WINDOW: std::time::Duration = std::time::Duration::from_secs(5);

pub(crate) async fn handle_connection(
    ctx: Arc<IngestContext>,
    mut socket: TcpStream,
    peer: SocketAddr,
) {
    let mut pipeline = UploadPipeline::new(ctx, peer);
    let status = match pipeline.process(&mut socket).await {
        Ok(()) => Status::Success,
        Err(err) => {
            warn!(peer = %peer, error = %err, "upload failed");
            err.status()
        }
    };
    pipeline.cleanup().await;

    if let Err(err) = proto::write_string(&mut socket, status.as_str()).await {
        warn!(peer = %peer, status = %status, error = %err, "failed to deliver terminal status");
    } else {
        debug!(peer = %peer, status = %status, "terminal status sent");
    }
    let _ = socket.shutdown().await;

    // An early reject leaves unread payload in the receive queue;
    // closing now would reset the connection and could cut off the
    // status. Absorb what is in flight until the producer closes.
    let _ = tokio::time::timeout(DRAIN_WINDOW, async {
        let mut sink = [0u8; 8192];
        loop {
            match socket.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
}

/// Tracks the files a single connection has put on disk so that every
/// exit path can honour the cleanup invariants: no temp file survives
/// the handler, and a finalized file survives only a SUCCESS.
struct UploadPipeline {
    ctx: Arc<IngestContext>,
    peer: SocketAddr,
    temp_path: Option<PathBuf>,
    working_path: Option<PathBuf>,
    finalized_path: Option<PathBuf>,
    queued: bool,
}

impl UploadPipeline {
    fn new(ctx: Arc<IngestContext>, peer: SocketAddr) -> Self {
        Self {
            ctx,
            peer,
            temp_path: None,
            working_path: None,
            finalized_path: None,
            queued: false,
        }
    }

    async fn process(&mut self, socket: &mut TcpStream) -> HandlerResult<()> {
        // ReadMeta
        let original_name = proto::read_string(socket)
            .await
            .map_err(|source| HandlerError::TransferIo { source })?;
        let declared_size = socket
            .read_i64()
            .await
            .map_err(|source| HandlerError::TransferIo { source })?;
        if declared_size < 0 {
            return Err(HandlerError::transfer(format!(
                "negative declared size {declared_size}"
            )));
        }
        let declared_size = declared_size as u64;
        let file_name = uploads::sanitize_file_name(&original_name);
        info!(
            peer = %self.peer,
            original = %original_name,
            file = %file_name,
            size = declared_size,
            "upload announced"
        );

        // Best-effort early reject; Admit is the authoritative check.
        if self.ctx.queue.is_full() {
            return Err(HandlerError::QueueFull);
        }

        // CreateTemp
        fs::create_dir_all(&self.ctx.uploads_dir)
            .await
            .map_err(|source| HandlerError::Io {
                source,
                path: self.ctx.uploads_dir.clone(),
            })?;
        let (temp_path, temp_file, token) = self.create_temp().await?;
        self.temp_path = Some(temp_path.clone());

        // Receive
        self.receive_payload(socket, temp_file, &temp_path, declared_size)
            .await?;

        // Hash
        let content_hash = hash::sha256_file(&temp_path)
            .await
            .map_err(|source| HandlerError::Io {
                source,
                path: temp_path.clone(),
            })?;
        debug!(peer = %self.peer, hash = %content_hash, "payload hashed");

        // Everything below runs under the per-hash mutex so racing
        // uploads of identical content serialize.
        let lock = self.ctx.locks.lock_for(&content_hash);
        let _guard = lock.lock().await;

        // DupCheck
        let duplicate = dedup::is_duplicate(&content_hash, &self.ctx.uploads_dir, &temp_path)
            .await
            .map_err(|source| HandlerError::Io {
                source,
                path: self.ctx.uploads_dir.clone(),
            })?;
        if duplicate {
            return Err(HandlerError::Duplicate { hash: content_hash });
        }

        // MaybeCompress
        let mut current_path = temp_path.clone();
        if declared_size > self.ctx.compress_threshold {
            info!(
                peer = %self.peer,
                file = %file_name,
                size = declared_size,
                threshold = self.ctx.compress_threshold,
                "payload exceeds threshold, compressing"
            );
            let compressed = self.ctx.transcoder.compress(&temp_path).await?;
            match fs::remove_file(&temp_path).await {
                Ok(()) => self.temp_path = None,
                Err(err) => {
                    warn!(peer = %self.peer, path = %temp_path.display(), error = %err, "failed to remove temp after compression");
                }
            }
            self.working_path = Some(compressed.clone());
            current_path = compressed;
        }

        // Finalize
        let final_name = uploads::finalized_name(&file_name, &token, Local::now());
        let final_path = self.ctx.uploads_dir.join(&final_name);
        fs::rename(&current_path, &final_path)
            .await
            .map_err(|source| HandlerError::Io {
                source,
                path: final_path.clone(),
            })?;
        // Only the rename source is gone; a temp that survived a failed
        // removal above stays tracked for cleanup.
        if self.temp_path.as_deref() == Some(current_path.as_path()) {
            self.temp_path = None;
        }
        self.working_path = None;
        self.finalized_path = Some(final_path.clone());
        info!(peer = %self.peer, file = %final_name, "upload finalized");

        // Admit
        let handle = VideoHandle::new(final_path.clone(), content_hash);
        if self.ctx.queue.offer(handle) {
            self.queued = true;
            info!(
                peer = %self.peer,
                file = %final_name,
                queued = self.ctx.queue.size(),
                "video queued for display"
            );
            Ok(())
        } else {
            // Still under the hash lock, so no racer can observe the
            // finalized file between the rename and this removal.
            warn!(peer = %self.peer, file = %final_name, "queue at capacity after finalize, discarding");
            match fs::remove_file(&final_path).await {
                Ok(()) => self.finalized_path = None,
                Err(err) => {
                    warn!(peer = %self.peer, path = %final_path.display(), error = %err, "failed to remove unqueued finalized file");
                }
            }
            Err(HandlerError::QueueFull)
        }
    }

    async fn create_temp(&self) -> HandlerResult<(PathBuf, fs::File, String)> {
        for _ in 0..TEMP_CREATE_ATTEMPTS {
            let token = uploads::fresh_token();
            let path = self.ctx.uploads_dir.join(uploads::temp_file_name(&token));
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    debug!(peer = %self.peer, path = %path.display(), "created temp file");
                    return Ok((path, file, token));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(HandlerError::Io { source, path }),
            }
        }
        Err(HandlerError::Io {
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "exhausted temp name attempts",
            ),
            path: self.ctx.uploads_dir.clone(),
        })
    }

    async fn receive_payload(
        &self,
        socket: &mut TcpStream,
        mut file: fs::File,
        temp_path: &Path,
        expected: u64,
    ) -> HandlerResult<()> {
        let mut limited = socket.take(expected);
        let received = tokio::io::copy(&mut limited, &mut file)
            .await
            .map_err(|source| HandlerError::TransferIo { source })?;
        file.flush()
            .await
            .map_err(|source| HandlerError::TransferIo { source })?;
        drop(file);

        if received != expected {
            return Err(HandlerError::transfer(format!(
                "connection closed after {received} of {expected} bytes"
            )));
        }
        let on_disk = fs::metadata(temp_path)
            .await
            .map_err(|source| HandlerError::TransferIo { source })?
            .len();
        if on_disk != expected {
            return Err(HandlerError::transfer(format!(
                "on-disk size {on_disk} does not match declared {expected}"
            )));
        }
        debug!(peer = %self.peer, bytes = received, "payload received");
        Ok(())
    }

    async fn cleanup(&mut self) {
        if let Some(path) = self.temp_path.take() {
            remove_quietly(&path, "leftover temp file").await;
        }
        if let Some(path) = self.working_path.take() {
            remove_quietly(&path, "leftover transcode output").await;
        }
        if !self.queued {
            if let Some(path) = self.finalized_path.take() {
                remove_quietly(&path, "finalized file without queue admission").await;
            }
        }
    }
}

async fn remove_quietly(path: &Path, reason: &str) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), reason, "removed file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), reason, error = %err, "failed to remove file"),
    }
}
