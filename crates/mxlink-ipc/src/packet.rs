use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::api;
use crate::error::{IpcError, Result};

pub const REQ_ID_SIZE: usize = 4;
pub const API_ID_SIZE: usize = 2;

/// Offset of the parameters within a packet.
pub const PARAMS_OFFSET: usize = REQ_ID_SIZE + API_ID_SIZE;

/// Shortest payload that is a packet at all.
pub const PKT_MIN_SIZE: usize = PARAMS_OFFSET;

/// Request id carried by events.
pub const REQ_ID_NONE: u32 = 0;

/// Request id that never names a live request.
pub const REQ_ID_RESET: u32 = 0xFFFF_FFFF;

/// The fixed part of every IPC packet.
///
/// Wire format (little-endian):
/// ```text
/// ┌──────────────┬──────────┬─────────────────────┐
/// │ Request ID   │ API ID   │ Parameters          │
/// │ (4B LE)      │ (2B LE)  │ (variable)          │
/// └──────────────┴──────────┴─────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub req_id: u32,
    pub api_id: u16,
}

impl PacketHeader {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < PKT_MIN_SIZE {
            return Err(IpcError::PacketTooShort(payload.len()));
        }
        let mut src = payload;
        let req_id = src.get_u32_le();
        let api_id = src.get_u16_le();
        Ok(Self { req_id, api_id })
    }

    pub fn is_event(&self) -> bool {
        api::is_event(self.api_id)
    }

    /// A command response: not an event and carrying a request id.
    pub fn is_response(&self) -> bool {
        !self.is_event() && self.req_id != REQ_ID_NONE
    }
}

/// Build a packet ready to hand to the link.
pub fn encode(req_id: u32, api_id: u16, params: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PARAMS_OFFSET + params.len());
    buf.put_u32_le(req_id);
    buf.put_u16_le(api_id);
    buf.put_slice(params);
    buf.freeze()
}

/// Parameters of an already validated packet.
pub fn params(payload: &[u8]) -> &[u8] {
    payload.get(PARAMS_OFFSET..).unwrap_or_default()
}
