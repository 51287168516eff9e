use std::time::Duration;

use bytes::{Buf, BufMut};

use crate::error::{FrameError, Result};

/// Header: type (1) + length (2) + length complement (2) + reserved (3) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Header type sent by the host (master).
pub const SPI_WRITE: u8 = 0x0A;

/// Header type answered by the co-processor (slave).
pub const SPI_READ: u8 = 0x0B;

/// Largest payload either side may announce in one transaction.
pub const DEFAULT_MAX_PAYLOAD: usize = 2500;

/// Bound on each flow-control wait.
pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_millis(20);

/// One side's half of the header exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiHeader {
    /// [`SPI_WRITE`] or [`SPI_READ`]; anything else is a protocol error.
    pub kind: u8,
    /// Payload length announced for the data phase.
    pub len: u16,
    /// Bitwise NOT of `len`.
    pub len_complement: u16,
}

impl SpiHeader {
    /// Host header announcing `len` bytes to send.
    pub fn write(len: u16) -> Self {
        Self {
            kind: SPI_WRITE,
            len,
            len_complement: !len,
        }
    }

    /// Slave header announcing `len` bytes to return.
    pub fn read(len: u16) -> Self {
        Self {
            kind: SPI_READ,
            len,
            len_complement: !len,
        }
    }

    pub fn is_length_consistent(&self) -> bool {
        self.len ^ self.len_complement == 0xFFFF
    }

    pub fn payload_len(&self) -> usize {
        usize::from(self.len)
    }

    /// Encode into the wire format.
    ///
    /// Wire format (little-endian, packed):
    /// ```text
    /// ┌──────────┬──────────┬──────────────┬──────────────┐
    /// │ Type     │ Length   │ ~Length      │ Reserved     │
    /// │ (1B)     │ (2B LE)  │ (2B LE)      │ (3B, zero)   │
    /// └──────────┴──────────┴──────────────┴──────────────┘
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut dst = &mut out[..];
        dst.put_u8(self.kind);
        dst.put_u16_le(self.len);
        dst.put_u16_le(self.len_complement);
        dst.put_bytes(0, 3);
        out
    }

    /// Parse the raw fields without validating them.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut src = &bytes[..];
        let kind = src.get_u8();
        let len = src.get_u16_le();
        let len_complement = src.get_u16_le();
        Self {
            kind,
            len,
            len_complement,
        }
    }
}

/// Parse and validate a header received from the slave.
pub fn decode_slave_header(bytes: &[u8; HEADER_SIZE]) -> Result<SpiHeader> {
    let header = SpiHeader::parse(bytes);
    if header.kind != SPI_READ {
        return Err(FrameError::InvalidType(header.kind));
    }
    if !header.is_length_consistent() {
        return Err(FrameError::LengthCheck {
            len: header.len,
            complement: header.len_complement,
        });
    }
    Ok(header)
}

/// Configuration for the link layer.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Maximum payload per transaction in bytes. Default: 2500.
    pub max_payload_size: usize,
    /// Bound on each flow-control wait. Default: 20 ms.
    pub flow_timeout: Duration,
    /// Bound on each bus transfer. Default: 100 ms.
    pub transfer_timeout: Duration,
    /// Delay between receive-buffer allocation attempts. Default: 1 ms.
    pub alloc_retry_delay: Duration,
    /// Pause after a failed transaction before the pump retries. Default: 1 ms.
    pub error_backoff: Duration,
    /// How long the reset line is held low. Default: 100 ms.
    pub reset_pulse: Duration,
    /// Boot time allowed after the reset line is released. Default: 1200 ms.
    pub reset_settle: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            flow_timeout: DEFAULT_FLOW_TIMEOUT,
            transfer_timeout: Duration::from_millis(100),
            alloc_retry_delay: Duration::from_millis(1),
            error_backoff: Duration::from_millis(1),
            reset_pulse: Duration::from_millis(100),
            reset_settle: Duration::from_millis(1200),
        }
    }
}

impl LinkConfig {
    /// Largest payload that fits both the configuration and the 16-bit length field.
    pub fn effective_max_payload(&self) -> usize {
        self.max_payload_size.min(usize::from(u16::MAX))
    }
}
