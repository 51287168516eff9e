//! SPI link layer for the mxlink co-processor link.
//!
//! Every exchange with the co-processor is one half-duplex transaction:
//!
//! ```text
//! host:  CS low ─ wait FLOW ─ [WRITE hdr] ─ wait FLOW ─ [payload out] ─ CS high
//! slave:                      [READ  hdr]              [payload in ]
//! ```
//!
//! Both sides announce their payload length in an 8-byte header. The data
//! phase then clocks `max(send, recv)` bytes. [`LinkFramer`] runs one such
//! transaction; [`LinkDriver`] keeps a receive buffer armed around it and can
//! be polled from the caller's context; [`TransportPump`] drives it from a
//! dedicated thread.
//!
//! [`sim::SimCoprocessor`] models the slave side for tests and host tooling.

pub mod codec;
pub mod driver;
pub mod error;
pub mod framer;
pub mod pump;
pub mod sim;

pub use codec::{
    decode_slave_header, LinkConfig, SpiHeader, DEFAULT_FLOW_TIMEOUT, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE, SPI_READ, SPI_WRITE,
};
pub use driver::{LinkDriver, LinkSender};
pub use error::{FrameError, Phase, Result};
pub use framer::{LinkFramer, Transaction, TxSlot};
pub use pump::TransportPump;
