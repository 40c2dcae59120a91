//! Duplicate index over the uploads directory.
//!
//! A candidate counts as a duplicate when it is a regular, non-hidden,
//! non-temporary file whose content hashes to the target value. Every
//! in-flight connection keeps its own `vid-*.tmp` in the directory, so
//! skipping temporaries is what keeps concurrent identical uploads from
//! seeing each other as pre-existing copies.

use std::io;
use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::hash;
use crate::uploads;

/// True iff a finalized file in `dir`, other than `excluded`, hashes to
/// `target_hash` (case-insensitive hex comparison). A missing directory
/// yields false; unreadable candidates are logged and skipped.
pub async fn is_duplicate(target_hash: &str, dir: &Path, excluded: &Path) -> io::Result<bool> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path == excluded {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if uploads::is_hidden_name(&name) || uploads::is_temp_name(&name) {
            continue;
        }
        match entry.file_type().await {
            Ok(file_type) if file_type.is_file() => {}
            Ok(_) => continue,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable directory entry");
                continue;
            }
        }
        match hash::sha256_file(&path).await {
            Ok(candidate) if candidate.eq_ignore_ascii_case(target_hash) => {
                debug!(path = %path.display(), hash = %candidate, "found duplicate content");
                return Ok(true);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to hash candidate, treating as non-match");
            }
        }
    }
    Ok(false)
}
