//! IPC with a Wi-Fi co-processor over a half-duplex SPI link.
//!
//! mxlink frames payloads over a master/slave SPI link with flow-control and
//! data-ready lines, correlates command responses by request id and
//! dispatches unsolicited events to registered handlers.
//!
//! # Crate Structure
//!
//! - [`transport`]: bus and pin traits, interrupt signals, receive buffers
//! - [`frame`]: SPI header codec, transaction framer, transport pump
//! - [`ipc`]: packets, request correlation, event dispatch, sessions

/// Re-export transport types.
pub mod transport {
    pub use mxlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mxlink_frame::*;
}

/// Re-export IPC session types.
pub mod ipc {
    pub use mxlink_ipc::*;
}
