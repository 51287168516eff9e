//! Command handling for the simulated co-processor.
//!
//! Plugs into [`mxlink_frame::sim::SimCoprocessor`] as its responder so that
//! sessions can be exercised end to end without hardware.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use mxlink_frame::sim::Responder;
use tracing::debug;

use crate::api;
use crate::packet::{self, PacketHeader, REQ_ID_NONE};

/// Firmware version string reported by default.
pub const SIM_FIRMWARE_VERSION: &str = "mxlink-sim 2.3.4";

/// Scripted firmware behaviour.
///
/// Echo returns the parameters unchanged, version returns the version
/// string, reboot answers and then emits the reboot event, and every other
/// command answers with a zero status word. Api ids marked silent are
/// swallowed without a response.
#[derive(Debug, Clone)]
pub struct SimFirmware {
    version: String,
    silent: Arc<Mutex<HashSet<u16>>>,
}

impl Default for SimFirmware {
    fn default() -> Self {
        Self::new(SIM_FIRMWARE_VERSION)
    }
}

impl SimFirmware {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            silent: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Stop (or resume) answering `api_id`.
    pub fn set_silent(&self, api_id: u16, silent: bool) {
        let mut set = self.silent.lock().unwrap_or_else(PoisonError::into_inner);
        if silent {
            set.insert(api_id);
        } else {
            set.remove(&api_id);
        }
    }

    /// Answer one inbound packet.
    pub fn handle(&self, inbound: &[u8]) -> Vec<Vec<u8>> {
        let Ok(header) = PacketHeader::parse(inbound) else {
            debug!(len = inbound.len(), "sim firmware ignoring short packet");
            return Vec::new();
        };
        let silent = self
            .silent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&header.api_id);
        if silent {
            return Vec::new();
        }

        let params = packet::params(inbound);
        let reply = |body: &[u8]| packet::encode(header.req_id, header.api_id, body).to_vec();
        match header.api_id {
            api::SYS_ECHO_CMD => vec![reply(params)],
            api::SYS_VERSION_CMD => vec![reply(self.version.as_bytes())],
            api::SYS_REBOOT_CMD => {
                vec![reply(&status(0)), event_packet(api::SYS_REBOOT_EVENT, &[])]
            }
            _ => vec![reply(&status(0))],
        }
    }

    pub fn responder(&self) -> Responder {
        let firmware = self.clone();
        Box::new(move |inbound| firmware.handle(inbound))
    }
}

/// Unsolicited packet carrying `params` for `api_id`.
pub fn event_packet(api_id: u16, params: &[u8]) -> Vec<u8> {
    packet::encode(REQ_ID_NONE, api_id, params).to_vec()
}

fn status(code: i32) -> [u8; 4] {
    code.to_le_bytes()
}
