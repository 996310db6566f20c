use std::{io, time::Duration};

use thiserror::Error;

pub mod codec;
pub mod command;
pub mod response;

pub type Result<T> = std::result::Result<T, ProtoError>;

#[derive(Debug, Error)]
pub enum ProtoError {
    /// Opening or configuring the serial port failed.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("channel is not open")]
    ChannelNotOpen,
    #[error("write to channel failed: {0}")]
    WriteFailed(#[source] io::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// Single-shot command issued while the sampling loop owns the channel.
    #[error("sampling session is active")]
    SessionActive,
    /// The sampling task died and took the channel with it.
    #[error("sampling task aborted")]
    Abort,
}

impl ProtoError {
    /// True for failures where no protocol exchange happened
    /// (the scale was never heard from). These are absorbed by the
    /// sampling loop into an `Error` reading.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(
            self,
            ProtoError::Io(_)
                | ProtoError::ChannelNotOpen
                | ProtoError::WriteFailed(_)
                | ProtoError::Timeout(_)
        )
    }
}
