use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 8 * 1024;

/// Streams `path` through SHA-256 and returns the lowercase hex digest.
pub async fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.bin");
        tokio::fs::write(&path, b"hello").await.unwrap();
        let digest = sha256_file(&path).await.unwrap();
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn empty_file_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.bin");
        tokio::fs::write(&path, b"").await.unwrap();
        let digest = sha256_file(&path).await.unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn repeated_calls_agree() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        tokio::fs::write(&path, vec![0xabu8; 64 * 1024]).await.unwrap();
        let first = sha256_file(&path).await.unwrap();
        let second = sha256_file(&path).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = sha256_file(&dir.path().join("absent")).await;
        assert!(result.is_err());
    }
}
