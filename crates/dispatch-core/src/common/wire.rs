//! Length-prefixed `serde_json` framing used over a worker process's
//! inherited stdin/stdout pipes.
//!
//! Each frame is a 4-byte big-endian length prefix followed by that many
//! bytes of JSON. This is the Rust-native replacement for Python's
//! `multiprocessing.Queue`, which can pickle arbitrary objects directly
//! into shared OS-backed queues; a real OS process boundary in Rust has no
//! equivalent, so payloads and results are serialized explicitly instead.

use crate::common::error::Error;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A single item sent from the feeder (or controller, during shutdown) to
/// a worker process over its stdin pipe.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub enum WireTask<P> {
    /// A real unit of work.
    Task { task_id: u64, payload: P },
    /// The distinguished stop sentinel. Terminates the worker's dequeue
    /// loop cleanly; the controller sends exactly one per worker during
    /// shutdown.
    Stop,
}

/// Writes `value` as a length-prefixed JSON frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value).map_err(|e| Error::Wire {
        context: format!("failed to encode frame: {e}"),
    })?;
    let len = u32::try_from(bytes.len()).map_err(|_| Error::Wire {
        context: "frame too large to encode".to_string(),
    })?;
    writer.write_all(&len.to_be_bytes()).await.map_err(|e| Error::Wire {
        context: format!("failed to write frame length: {e}"),
    })?;
    writer.write_all(&bytes).await.map_err(|e| Error::Wire {
        context: format!("failed to write frame body: {e}"),
    })?;
    writer.flush().await.map_err(|e| Error::Wire {
        context: format!("failed to flush frame: {e}"),
    })?;
    Ok(())
}

/// Reads a length-prefixed JSON frame. Returns `Ok(None)` on a clean EOF
/// (the peer closed the pipe between frames, e.g. the process exited).
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, Error>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0_u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(Error::Wire {
                context: format!("failed to read frame length: {e}"),
            });
        }
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body).await.map_err(|e| Error::Wire {
        context: format!("failed to read frame body: {e}"),
    })?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| Error::Wire {
            context: format!("failed to decode frame: {e}"),
        })
}
