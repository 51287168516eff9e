use std::time::Duration;

use mxlink_frame::FrameError;
use mxlink_transport::TransportError;

/// Errors returned by the IPC session.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// The link layer rejected the packet.
    #[error("link error: {0}")]
    Frame(#[from] FrameError),

    /// A buffer or bus primitive failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Request parameters do not fit in one link payload.
    #[error("request parameters too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Inbound payload shorter than the IPC header.
    #[error("packet too short ({0} bytes, need at least 6)")]
    PacketTooShort(usize),

    /// A bypass frame announces more bytes than the event carries.
    #[error("bypass frame truncated ({available} of {announced} bytes)")]
    TruncatedFrame { announced: usize, available: usize },

    /// No matching response arrived in time.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// A request is already waiting for its response.
    #[error("request 0x{0:08x} is still outstanding")]
    RequestOutstanding(u32),

    /// The session stopped after a protocol violation.
    #[error("session faulted: {0}")]
    Faulted(String),

    /// A session thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },

    /// The session has been shut down.
    #[error("session shut down")]
    Shutdown,

    /// The blocking task behind an async request did not complete.
    #[cfg(feature = "async")]
    #[error("async request task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, IpcError>;
