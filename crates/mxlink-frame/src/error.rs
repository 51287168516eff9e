use std::fmt;

use mxlink_transport::TransportError;

/// Which flow-control gate of a transaction timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Header,
    Data,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Header => f.write_str("header"),
            Phase::Data => f.write_str("data"),
        }
    }
}

/// Errors that can occur while framing a link transaction.
///
/// Everything here except [`FrameError::Spawn`] aborts only the current
/// transaction; the pump carries on with the next one.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The slave answered with something other than a READ header.
    #[error("invalid header type 0x{0:02x} (expected READ 0x0b)")]
    InvalidType(u8),

    /// `length ^ length_complement` was not `0xffff`.
    #[error("header length check failed (len 0x{len:04x}, complement 0x{complement:04x})")]
    LengthCheck { len: u16, complement: u16 },

    /// A length exceeds the negotiated maximum payload.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Zero-length sends are not framed.
    #[error("refusing to send an empty payload")]
    EmptyPayload,

    /// The flow-control line did not rise in time.
    #[error("timed out waiting for flow control before {phase} phase")]
    FlowTimeout { phase: Phase },

    /// A previous payload is still waiting for its transaction.
    #[error("send slot busy ({0} bytes still queued)")]
    SendBusy(usize),

    /// The queued payload was withdrawn between header and data phase.
    #[error("queued payload withdrawn mid-transaction")]
    SendWithdrawn,

    /// No receive buffer was available for an inbound payload.
    #[error("no receive buffer available")]
    NoReceiveBuffer,

    /// The bus primitive failed.
    #[error("bus error: {0}")]
    Bus(#[from] TransportError),

    /// The pump thread could not be started.
    #[error("failed to spawn pump thread: {0}")]
    Spawn(std::io::Error),

    /// The link has been shut down.
    #[error("link shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, FrameError>;
