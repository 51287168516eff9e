use std::fmt;

use mxlink_frame::FrameError;
use mxlink_ipc::IpcError;
use mxlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::TransferTimeout { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        TransportError::Shutdown => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Bus(err) => transport_error(context, err),
        FrameError::PayloadTooLarge { .. } | FrameError::EmptyPayload => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::InvalidType(_)
        | FrameError::LengthCheck { .. }
        | FrameError::FlowTimeout { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        FrameError::Shutdown => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn ipc_error(context: &str, err: IpcError) -> CliError {
    match err {
        IpcError::Frame(err) => frame_error(context, err),
        IpcError::Transport(err) => transport_error(context, err),
        IpcError::PayloadTooLarge { .. }
        | IpcError::PacketTooShort(_)
        | IpcError::TruncatedFrame { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        IpcError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        IpcError::RequestOutstanding(_) | IpcError::Faulted(_) | IpcError::Shutdown => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeouts_map_to_124() {
        let err = ipc_error("request failed", IpcError::Timeout(Duration::from_millis(100)));
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("request failed: "));
    }

    #[test]
    fn oversize_maps_to_data_invalid() {
        let err = ipc_error("request failed", IpcError::PayloadTooLarge { size: 3000, max: 2494 });
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn nested_bus_errors_map_to_transport() {
        let err = ipc_error(
            "request failed",
            IpcError::Frame(FrameError::Bus(TransportError::LengthMismatch { tx: 8, rx: 4 })),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
