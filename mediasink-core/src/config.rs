use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// TCP port producers connect to.
pub const DEFAULT_PORT: u16 = 9090;

/// Uploads above this size are handed to the transcoder.
pub const DEFAULT_COMPRESS_THRESHOLD: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub server: ServerSection,
    pub limits: LimitsSection,
    pub transcode: TranscodeSection,
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.limits.workers == 0 {
            return Err(ConfigError::Invalid(
                "worker count must be a positive integer".into(),
            ));
        }
        if self.limits.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacity must be a positive integer".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    pub uploads_dir: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            uploads_dir: "uploads".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub workers: usize,
    pub queue_capacity: usize,
    pub compress_threshold_bytes: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 10,
            compress_threshold_bytes: DEFAULT_COMPRESS_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscodeSection {
    pub ffmpeg_path: String,
    pub crf: u8,
    pub preset: String,
    pub timeout_seconds: u64,
}

impl TranscodeSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for TranscodeSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            crf: 28,
            preset: "fast".into(),
            timeout_seconds: 120,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SinkConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
