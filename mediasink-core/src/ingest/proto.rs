//! Wire framing shared with producers.
//!
//! Strings travel as a u16 big-endian length followed by that many
//! UTF-8 bytes (bit-identical to the Java `DataOutput` UTF format for
//! ASCII); the declared file size is an i64 big-endian.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Terminal status delivered to the producer, exactly once per
/// completed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    QueueFull,
    DuplicateFile,
    CompressionFailed,
    TransferError,
    InternalError,
}

impl Status {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::QueueFull => "QUEUE_FULL",
            Status::DuplicateFile => "DUPLICATE_FILE",
            Status::CompressionFailed => "COMPRESSION_FAILED",
            Status::TransferError => "TRANSFER_ERROR",
            Status::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub async fn read_string<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await? as usize;
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;
    String::from_utf8(buffer)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

pub async fn write_string<W>(writer: &mut W, value: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "string exceeds u16 length prefix")
    })?;
    writer.write_u16(len).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}
