//! Wrapper around the external ffmpeg compression subprocess.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::TranscodeSection;

const STDERR_TAIL_BYTES: usize = 800;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: io::Error,
    },
    #[error("transcode timed out after {0:?}")]
    Timeout(Duration),
    #[error("transcoder exited with status {status:?}: {stderr}")]
    Failed {
        status: Option<i32>,
        stderr: String,
    },
    #[error("transcoder reported success but produced no output at {path}")]
    MissingOutput { path: PathBuf },
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> io::Result<Output> {
        command.output().await
    }
}

/// Invokes ffmpeg to re-encode an oversized upload (H.264 at the
/// configured CRF/preset, AAC audio) into `compressed_<stem>.mp4` next
/// to the input. Bounded by a wall-clock timeout; the child is killed
/// and partial output removed on every failure path.
pub struct Transcoder {
    program: PathBuf,
    crf: u8,
    preset: String,
    timeout: Duration,
    executor: Box<dyn CommandExecutor>,
}

impl Transcoder {
    pub fn new(config: &TranscodeSection) -> Self {
        Self {
            program: PathBuf::from(&config.ffmpeg_path),
            crf: config.crf,
            preset: config.preset.clone(),
            timeout: config.timeout(),
            executor: Box::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Box<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub async fn compress(&self, input: &Path) -> TranscodeResult<PathBuf> {
        let output_path = self.output_path(input);
        let mut command = Command::new(&self.program);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-c:v")
            .arg("libx264")
            .arg("-crf")
            .arg(self.crf.to_string())
            .arg("-preset")
            .arg(&self.preset)
            .arg("-c:a")
            .arg("aac")
            .arg(&output_path);

        debug!(
            program = %self.program.display(),
            input = %input.display(),
            output = %output_path.display(),
            "starting transcode"
        );

        let output = match timeout(self.timeout, self.executor.run(&mut command)).await {
            // Dropping the in-flight future kills the child (kill_on_drop).
            Err(_elapsed) => {
                self.remove_partial(&output_path).await;
                return Err(TranscodeError::Timeout(self.timeout));
            }
            Ok(Err(source)) => {
                self.remove_partial(&output_path).await;
                return Err(TranscodeError::Spawn {
                    program: self.program.clone(),
                    source,
                });
            }
            Ok(Ok(output)) => output,
        };

        trace!(
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "transcoder stdout"
        );

        if !output.status.success() {
            self.remove_partial(&output_path).await;
            return Err(TranscodeError::Failed {
                status: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        match fs::metadata(&output_path).await {
            Ok(meta) if meta.len() > 0 => Ok(output_path),
            Ok(_) => {
                self.remove_partial(&output_path).await;
                Err(TranscodeError::Failed {
                    status: output.status.code(),
                    stderr: "output file is empty".into(),
                })
            }
            Err(_) => Err(TranscodeError::MissingOutput { path: output_path }),
        }
    }

    fn output_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        input.with_file_name(format!("compressed_{stem}.mp4"))
    }

    async fn remove_partial(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path).await {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %err, "failed to remove partial transcode output");
            }
        }
    }
}

fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn section(program: &str, timeout_seconds: u64) -> TranscodeSection {
        TranscodeSection {
            ffmpeg_path: program.to_string(),
            timeout_seconds,
            ..TranscodeSection::default()
        }
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn output_path_replaces_extension() {
        let transcoder = Transcoder::new(&section("ffmpeg", 120));
        let output = transcoder.output_path(Path::new("/data/up/vid-abcd1234.tmp"));
        assert_eq!(
            output,
            Path::new("/data/up/compressed_vid-abcd1234.mp4")
        );
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("vid-spawn.tmp");
        tokio::fs::write(&input, b"payload").await.unwrap();

        let transcoder = Transcoder::new(&section("/definitely/not/ffmpeg", 5));
        let err = transcoder.compress(&input).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_failure_with_stderr() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("vid-fail.tmp");
        tokio::fs::write(&input, b"payload").await.unwrap();
        let script = write_script(dir.path(), "fake-ffmpeg", "echo boom >&2; exit 3");

        let transcoder = Transcoder::new(&section(&script.to_string_lossy(), 5));
        let err = transcoder.compress(&input).await.unwrap_err();
        match err {
            TranscodeError::Failed { status, stderr } => {
                assert_eq!(status, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn success_requires_nonempty_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("vid-empty.tmp");
        tokio::fs::write(&input, b"payload").await.unwrap();
        // Exits zero without writing anything.
        let script = write_script(dir.path(), "fake-ffmpeg", "exit 0");

        let transcoder = Transcoder::new(&section(&script.to_string_lossy(), 5));
        let err = transcoder.compress(&input).await.unwrap_err();
        assert!(matches!(err, TranscodeError::MissingOutput { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_returns_output_path() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("vid-ok.tmp");
        tokio::fs::write(&input, b"payload").await.unwrap();
        // Copies the input (third arg) to the output (last arg).
        let script = write_script(
            dir.path(),
            "fake-ffmpeg",
            "for last in \"$@\"; do :; done\ncp \"$3\" \"$last\"",
        );

        let transcoder = Transcoder::new(&section(&script.to_string_lossy(), 5));
        let output = transcoder.compress(&input).await.unwrap();
        assert_eq!(output, dir.path().join("compressed_vid-ok.mp4"));
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"payload");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn injected_executor_replaces_the_subprocess() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        // Answers with a crafted Output and writes the output file the
        // way a successful ffmpeg run would, without spawning anything.
        struct FakeExecutor;

        #[async_trait::async_trait]
        impl CommandExecutor for FakeExecutor {
            async fn run(&self, command: &mut Command) -> io::Result<Output> {
                let output_path = command
                    .as_std()
                    .get_args()
                    .last()
                    .expect("command has an output path")
                    .to_owned();
                std::fs::write(output_path, b"encoded")?;
                Ok(Output {
                    status: ExitStatus::from_raw(0),
                    stdout: b"frame= 1".to_vec(),
                    stderr: Vec::new(),
                })
            }
        }

        let dir = TempDir::new().unwrap();
        let input = dir.path().join("vid-fake.tmp");
        tokio::fs::write(&input, b"payload").await.unwrap();

        // The program does not exist; only the injected executor runs.
        let transcoder = Transcoder::new(&section("/definitely/not/ffmpeg", 5))
            .with_executor(Box::new(FakeExecutor));
        let output = transcoder.compress(&input).await.unwrap();
        assert_eq!(output, dir.path().join("compressed_vid-fake.mp4"));
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"encoded");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_child_times_out() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("vid-slow.tmp");
        tokio::fs::write(&input, b"payload").await.unwrap();
        let script = write_script(dir.path(), "fake-ffmpeg", "sleep 30");

        let mut config = section(&script.to_string_lossy(), 120);
        config.timeout_seconds = 0;
        let transcoder = Transcoder::new(&config);
        let started = std::time::Instant::now();
        let err = transcoder.compress(&input).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
