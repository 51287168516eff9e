//! Typed views of the events the firmware emits.

use std::fmt;

use bytes::Buf;
use mxlink_transport::NetBuffer;
use serde::Serialize;
use tracing::{info, warn};

use crate::api;
use crate::dispatch::{Event, EventDispatcher};
use crate::error::{IpcError, Result};

/// Link state reported by [`api::WIFI_STATUS_EVENT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WifiStatus {
    StaDown = 1,
    StaUp = 2,
    StaGotIp = 3,
    ApDown = 4,
    ApUp = 5,
}

/// Which radio interface a [`WifiStatus`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WifiInterface {
    Station,
    SoftAp,
}

impl WifiStatus {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::StaDown),
            2 => Some(Self::StaUp),
            3 => Some(Self::StaGotIp),
            4 => Some(Self::ApDown),
            5 => Some(Self::ApUp),
            _ => None,
        }
    }

    pub fn interface(self) -> WifiInterface {
        match self {
            Self::StaDown | Self::StaUp | Self::StaGotIp => WifiInterface::Station,
            Self::ApDown | Self::ApUp => WifiInterface::SoftAp,
        }
    }
}

impl fmt::Display for WifiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StaDown => "station down",
            Self::StaUp => "station up",
            Self::StaGotIp => "station got ip",
            Self::ApDown => "soft-ap down",
            Self::ApUp => "soft-ap up",
        };
        f.write_str(name)
    }
}

/// Bypass parameters preceding the frame: `idx` (i32), 2 pad bytes, `tot_len` (u16).
pub const BYPASS_PARAMS_SIZE: usize = 8;

/// An Ethernet frame delivered through the bypass (netlink) path.
#[derive(Debug)]
pub struct BypassFrame {
    /// Interface index the frame arrived on.
    pub idx: i32,
    buf: NetBuffer,
}

impl BypassFrame {
    pub fn frame(&self) -> &[u8] {
        self.buf.payload()
    }

    pub fn into_buffer(self) -> NetBuffer {
        self.buf
    }
}

impl Event {
    /// Decode a Wi-Fi status event.
    pub fn wifi_status(&self) -> Option<WifiStatus> {
        if self.api_id() != api::WIFI_STATUS_EVENT {
            return None;
        }
        let raw = *self.params().first()?;
        let status = WifiStatus::from_raw(raw);
        if status.is_none() {
            warn!(raw, "unknown wifi status");
        }
        status
    }

    /// Strip the bypass parameters, leaving the frame in place.
    ///
    /// `Ok(None)` for other events and for an empty frame. A frame shorter
    /// than its announced length is rejected.
    pub fn into_bypass_frame(self) -> Result<Option<BypassFrame>> {
        if self.api_id() != api::WIFI_BYPASS_INPUT_EVENT
            || self.params().len() < BYPASS_PARAMS_SIZE
        {
            return Ok(None);
        }
        let mut params = self.params();
        let idx = params.get_i32_le();
        params.advance(2);
        let tot_len = params.get_u16_le();
        if tot_len == 0 {
            return Ok(None);
        }
        let announced = usize::from(tot_len);
        let mut buf = self.into_buffer();
        buf.hide_header(BYPASS_PARAMS_SIZE)?;
        if announced > buf.len() {
            warn!(idx, announced, available = buf.len(), "truncated bypass frame");
            return Err(IpcError::TruncatedFrame {
                announced,
                available: buf.len(),
            });
        }
        buf.set_payload_len(announced);
        Ok(Some(BypassFrame { idx, buf }))
    }
}

/// Events with a decoded payload, as reported to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSummary {
    Reboot,
    WifiStatus {
        status: WifiStatus,
        interface: WifiInterface,
    },
    BypassInput {
        idx: i32,
        len: usize,
    },
    Other {
        api_id: u16,
        len: usize,
    },
}

impl EventSummary {
    pub fn from_event(event: Event) -> Result<Self> {
        let api_id = event.api_id();
        let len = event.params().len();
        let summary = match api_id {
            api::SYS_REBOOT_EVENT => Self::Reboot,
            api::WIFI_STATUS_EVENT => match event.wifi_status() {
                Some(status) => Self::WifiStatus {
                    status,
                    interface: status.interface(),
                },
                None => Self::Other { api_id, len },
            },
            api::WIFI_BYPASS_INPUT_EVENT => match event.into_bypass_frame()? {
                Some(frame) => Self::BypassInput {
                    idx: frame.idx,
                    len: frame.frame().len(),
                },
                None => Self::Other { api_id, len },
            },
            _ => Self::Other { api_id, len },
        };
        Ok(summary)
    }
}

/// Install the reboot handler every session carries.
pub fn register_default_handlers(events: &EventDispatcher) {
    events.register(api::SYS_REBOOT_EVENT, |_event: Event| {
        info!("co-processor reboot done");
    });
}

impl EventDispatcher {
    /// Call `handler` for every decodable Wi-Fi status event.
    pub fn on_wifi_status<F>(&self, mut handler: F) -> bool
    where
        F: FnMut(WifiInterface, WifiStatus) + Send + 'static,
    {
        self.register(api::WIFI_STATUS_EVENT, move |event: Event| {
            if let Some(status) = event.wifi_status() {
                handler(status.interface(), status);
            }
        })
    }

    /// Call `handler` with every non-empty bypass frame.
    pub fn on_bypass_input<F>(&self, mut handler: F) -> bool
    where
        F: FnMut(BypassFrame) + Send + 'static,
    {
        self.register(api::WIFI_BYPASS_INPUT_EVENT, move |event: Event| {
            match event.into_bypass_frame() {
                Ok(Some(frame)) => handler(frame),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "malformed bypass input event"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use bytes::BufMut;

    use super::*;
    use crate::packet::{encode, PacketHeader, REQ_ID_NONE};

    fn event(api_id: u16, params: &[u8]) -> Event {
        let pkt = encode(REQ_ID_NONE, api_id, params);
        let header = PacketHeader::parse(&pkt).unwrap();
        Event::from_packet(header, NetBuffer::from_slice(&pkt)).unwrap()
    }

    fn bypass_params(idx: i32, frame: &[u8]) -> Vec<u8> {
        let mut params = Vec::new();
        params.put_i32_le(idx);
        params.put_u16_le(0);
        params.put_u16_le(frame.len() as u16);
        params.put_slice(frame);
        params
    }

    #[test]
    fn status_classification() {
        assert_eq!(WifiStatus::from_raw(3), Some(WifiStatus::StaGotIp));
        assert_eq!(WifiStatus::StaGotIp.interface(), WifiInterface::Station);
        assert_eq!(WifiStatus::ApUp.interface(), WifiInterface::SoftAp);
        assert_eq!(WifiStatus::from_raw(0), None);
        assert_eq!(WifiStatus::from_raw(6), None);
    }

    #[test]
    fn wifi_status_event_decodes() {
        let ev = event(api::WIFI_STATUS_EVENT, &[WifiStatus::ApUp as u8]);
        assert_eq!(ev.wifi_status(), Some(WifiStatus::ApUp));
        assert_eq!(event(api::WIFI_STATUS_EVENT, &[]).wifi_status(), None);
        assert_eq!(event(api::SYS_REBOOT_EVENT, &[2]).wifi_status(), None);
    }

    #[test]
    fn bypass_frame_is_exposed_in_place() {
        let frame = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01];
        let ev = event(api::WIFI_BYPASS_INPUT_EVENT, &bypass_params(0, &frame));
        let bypass = ev.into_bypass_frame().unwrap().unwrap();
        assert_eq!(bypass.idx, 0);
        assert_eq!(bypass.frame(), frame);
    }

    #[test]
    fn empty_bypass_frame_is_dropped() {
        let ev = event(api::WIFI_BYPASS_INPUT_EVENT, &bypass_params(1, &[]));
        assert!(ev.into_bypass_frame().unwrap().is_none());
    }

    #[test]
    fn truncated_bypass_frame_is_rejected() {
        let mut params = bypass_params(2, b"eth");
        params[6..8].copy_from_slice(&64u16.to_le_bytes());
        let err = event(api::WIFI_BYPASS_INPUT_EVENT, &params)
            .into_bypass_frame()
            .unwrap_err();
        assert!(matches!(
            err,
            IpcError::TruncatedFrame {
                announced: 64,
                available: 3
            }
        ));
    }

    #[test]
    fn trailing_padding_is_trimmed_from_bypass_frame() {
        let mut params = bypass_params(0, b"eth\0\0");
        params[6..8].copy_from_slice(&3u16.to_le_bytes());
        let bypass = event(api::WIFI_BYPASS_INPUT_EVENT, &params)
            .into_bypass_frame()
            .unwrap()
            .unwrap();
        assert_eq!(bypass.frame(), b"eth");
    }

    #[test]
    fn summary_serializes_with_kind_tag() {
        let ev = event(api::WIFI_STATUS_EVENT, &[2]);
        let summary = EventSummary::from_event(ev).unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["kind"], "wifi_status");
        assert_eq!(json["status"], "sta_up");
        assert_eq!(json["interface"], "station");
    }

    #[test]
    fn typed_status_handler() {
        let dispatcher = EventDispatcher::spawn(4).unwrap();
        let (tx, rx) = mpsc::channel();
        dispatcher.on_wifi_status(move |iface, status| {
            tx.send((iface, status)).unwrap();
        });
        dispatcher.dispatch(event(api::WIFI_STATUS_EVENT, &[1]));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            (WifiInterface::Station, WifiStatus::StaDown)
        );
    }

    #[test]
    fn typed_bypass_handler() {
        let dispatcher = EventDispatcher::spawn(4).unwrap();
        let (tx, rx) = mpsc::channel();
        dispatcher.on_bypass_input(move |frame| {
            tx.send(frame.frame().to_vec()).unwrap();
        });
        dispatcher.dispatch(event(api::WIFI_BYPASS_INPUT_EVENT, &bypass_params(0, &[])));
        dispatcher.dispatch(event(api::WIFI_BYPASS_INPUT_EVENT, &bypass_params(0, b"eth")));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"eth");
    }
}
