//! IPC session layer for the mxlink co-processor link.
//!
//! Every link payload is a packet: a little-endian request id, an api id and
//! the parameters. Commands go out through [`Session::request`], which holds
//! a single pending-request slot until the response carrying the same
//! request id arrives or the timeout expires. Packets with the event bit set
//! (or no request id) are routed to handlers registered on the session's
//! [`EventDispatcher`].
//!
//! ```text
//! caller ─ request ─► Correlator ─► LinkSender ─► pump ─► bus
//! caller ◄─ response ◄─ Correlator ◄─ Router ◄─ pump ◄─ bus
//!                 handlers ◄─ EventDispatcher ◄─┘
//! ```

pub mod api;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod packet;
pub mod session;
pub mod sim;

pub use correlator::{Correlator, Delivery, MismatchPolicy};
pub use dispatch::{Event, EventDispatcher};
pub use error::{IpcError, Result};
pub use events::{BypassFrame, EventSummary, WifiInterface, WifiStatus};
pub use packet::{PacketHeader, PKT_MIN_SIZE, REQ_ID_NONE, REQ_ID_RESET};
pub use session::{Session, SessionConfig, MAX_IPC_PARAMS};
