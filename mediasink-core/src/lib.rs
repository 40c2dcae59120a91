pub mod config;
pub mod dedup;
pub mod error;
pub mod hash;
pub mod ingest;
pub mod locks;
pub mod queue;
pub mod transcode;
pub mod uploads;

pub use config::{
    load_config, LimitsSection, ServerSection, SinkConfig, TranscodeSection, DEFAULT_PORT,
};
pub use error::{ConfigError, Result};
pub use ingest::{proto::Status, IngestContext, IngestServer};
pub use locks::HashLocks;
pub use queue::{QueueError, QueueResult, VideoHandle, VideoQueue};
pub use transcode::{CommandExecutor, SystemCommandExecutor, TranscodeError, Transcoder};
