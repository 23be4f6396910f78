//! Protocol error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("model transfer failed: {0}")]
    TransferFailed(String),

    #[error("model stream ended without a terminal frame")]
    TruncatedStream,

    #[error("frame received after terminal frame")]
    FrameAfterTerminal,
}
