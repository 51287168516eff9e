use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use mxlink_ipc::IpcError;

use crate::types::MxResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let message = message.into();
    let sanitized = message.replace('\0', "?");
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> MxResult {
    set_error_message(message);
    MxResult::InvalidArgument
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_ipc_error(err: &IpcError) -> MxResult {
    set_error_message(err.to_string());
    match err {
        IpcError::Transport(_) => MxResult::TransportError,
        IpcError::Frame(_) | IpcError::PacketTooShort(_) | IpcError::TruncatedFrame { .. } => {
            MxResult::FrameError
        }
        IpcError::PayloadTooLarge { .. } => MxResult::PayloadTooLarge,
        IpcError::Timeout(_) => MxResult::Timeout,
        IpcError::RequestOutstanding(_) => MxResult::RequestOutstanding,
        IpcError::Faulted(_) => MxResult::Faulted,
        IpcError::Shutdown => MxResult::Shutdown,
        IpcError::Spawn { .. } => MxResult::Internal,
        #[allow(unreachable_patterns)]
        _ => MxResult::Internal,
    }
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
