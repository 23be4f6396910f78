//! Chunked, status-terminated model transfer.
//!
//! Both transfer directions use the same framing: `IN_PROGRESS` frames carry
//! at most [`CHUNK_SIZE`] bytes of payload, and exactly one terminal frame
//! ends the stream. Uploads terminate with an empty `OK` frame; downloads
//! terminate with `OK` (complete) or `FAILED` (abort).

use crate::error::{ProtocolError, Result};
use crate::messages::{ModelRequest, ModelStatus};

/// Maximum payload bytes per frame (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Split a model artifact into upload frames.
///
/// Produces zero or more `IN_PROGRESS` frames followed by the empty `OK`
/// terminator. An empty payload yields only the terminator.
pub fn upload_frames(id: &str, payload: &[u8]) -> Vec<ModelRequest> {
    let mut frames: Vec<ModelRequest> = payload
        .chunks(CHUNK_SIZE)
        .map(|chunk| ModelRequest {
            id: id.to_string(),
            status: ModelStatus::InProgress as i32,
            data: chunk.to_vec(),
        })
        .collect();

    frames.push(ModelRequest {
        id: id.to_string(),
        status: ModelStatus::Ok as i32,
        data: Vec::new(),
    });

    frames
}

/// Outcome of feeding one frame to a [`ChunkAssembler`].
#[derive(Debug)]
pub enum ChunkProgress {
    /// More frames expected.
    Continue,
    /// Terminal `OK` seen; the full artifact.
    Done(Vec<u8>),
}

/// Receive-side accumulator for a chunked download.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    buf: Vec<u8>,
    finished: bool,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame. `IN_PROGRESS` data is appended, `OK` completes with
    /// the accumulated bytes, `FAILED` aborts with the server's message.
    pub fn push(&mut self, status: ModelStatus, data: &[u8], message: &str) -> Result<ChunkProgress> {
        if self.finished {
            return Err(ProtocolError::FrameAfterTerminal);
        }

        match status {
            ModelStatus::InProgress => {
                self.buf.extend_from_slice(data);
                Ok(ChunkProgress::Continue)
            }
            ModelStatus::Ok => {
                self.finished = true;
                Ok(ChunkProgress::Done(std::mem::take(&mut self.buf)))
            }
            ModelStatus::Failed => {
                self.finished = true;
                Err(ProtocolError::TransferFailed(if message.is_empty() {
                    "combiner reported FAILED".to_string()
                } else {
                    message.to_string()
                }))
            }
        }
    }
}
