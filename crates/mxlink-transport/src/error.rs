use std::time::Duration;

/// Errors raised by the bus and buffer primitives under the SPI link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The bus peripheral reported a failed transfer.
    #[error("bus transfer of {len} bytes failed: {reason}")]
    Transfer { len: usize, reason: String },

    /// The bus peripheral did not complete a transfer in time.
    #[error("bus transfer of {len} bytes timed out after {timeout:?}")]
    TransferTimeout { len: usize, timeout: Duration },

    /// Transmit and receive buffers of a full-duplex transfer differ in size.
    #[error("full-duplex transfer length mismatch (tx {tx}, rx {rx})")]
    LengthMismatch { tx: usize, rx: usize },

    /// Attempted to hide more header bytes than the buffer holds.
    #[error("cannot hide {hide} header bytes from a {len}-byte payload")]
    HeaderUnderrun { hide: usize, len: usize },

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
