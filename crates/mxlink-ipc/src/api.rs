//! API identifiers understood by the co-processor firmware.
//!
//! Bit 15 marks an unsolicited event; everything below [`EVENT_BASE`] is a
//! command whose response echoes the request id.

pub const SYS_BASE: u16 = 0x0000;
pub const SYS_ECHO_CMD: u16 = SYS_BASE + 1;
pub const SYS_REBOOT_CMD: u16 = SYS_BASE + 2;
pub const SYS_VERSION_CMD: u16 = SYS_BASE + 3;
pub const SYS_RESET_CMD: u16 = SYS_BASE + 4;

pub const WIFI_BASE: u16 = 0x0100;
pub const SOCKET_BASE: u16 = 0x0200;

pub const EVENT_BASE: u16 = 0x8000;
pub const SYS_REBOOT_EVENT: u16 = EVENT_BASE + SYS_BASE + 1;
pub const WIFI_STATUS_EVENT: u16 = EVENT_BASE + WIFI_BASE + 1;
pub const WIFI_BYPASS_INPUT_EVENT: u16 = EVENT_BASE + WIFI_BASE + 2;

pub fn is_event(api_id: u16) -> bool {
    api_id & EVENT_BASE != 0
}

/// Human-readable name for the ids this crate knows about.
pub fn api_name(api_id: u16) -> Option<&'static str> {
    let name = match api_id {
        SYS_ECHO_CMD => "sys.echo",
        SYS_REBOOT_CMD => "sys.reboot",
        SYS_VERSION_CMD => "sys.version",
        SYS_RESET_CMD => "sys.reset",
        SYS_REBOOT_EVENT => "sys.reboot_event",
        WIFI_STATUS_EVENT => "wifi.status_event",
        WIFI_BYPASS_INPUT_EVENT => "wifi.bypass_input_event",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_carry_event_bit() {
        for id in [SYS_REBOOT_EVENT, WIFI_STATUS_EVENT, WIFI_BYPASS_INPUT_EVENT] {
            assert!(is_event(id), "0x{id:04x}");
        }
        for id in [SYS_ECHO_CMD, SYS_VERSION_CMD, WIFI_BASE, SOCKET_BASE] {
            assert!(!is_event(id), "0x{id:04x}");
        }
    }

    #[test]
    fn well_known_values() {
        assert_eq!(SYS_ECHO_CMD, 0x0001);
        assert_eq!(SYS_REBOOT_EVENT, 0x8001);
        assert_eq!(WIFI_STATUS_EVENT, 0x8101);
        assert_eq!(WIFI_BYPASS_INPUT_EVENT, 0x8102);
    }

    #[test]
    fn names() {
        assert_eq!(api_name(SYS_ECHO_CMD), Some("sys.echo"));
        assert_eq!(api_name(0x7777), None);
    }
}
