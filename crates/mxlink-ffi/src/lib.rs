//! mxlink-ffi: C-ABI exports for the mxlink session API.
//!
//! The host supplies an [`MxBusOps`] table (SPI transfer, chip select, the
//! two line levels and optionally the reset line) and forwards its GPIO interrupts through
//! [`mxlink_notify_data_ready`] and [`mxlink_notify_flow`].

mod bus;
mod error;
mod session;
mod types;

use std::panic::AssertUnwindSafe;

pub use session::{
    mxlink_deinit, mxlink_echo, mxlink_init, mxlink_init_polled, mxlink_notify_data_ready,
    mxlink_notify_flow, mxlink_poll, mxlink_register_event, mxlink_request,
};
pub use types::{
    MxBusOps, MxEventFn, MxLineLevelFn, MxResult, MxSessionHandle, MxSetLineFn,
    MxTransferFn, MX_ERR_FAULTED, MX_ERR_FRAME, MX_ERR_INTERNAL, MX_ERR_INVALID_ARGUMENT,
    MX_ERR_PAYLOAD_TOO_LARGE, MX_ERR_REQUEST_OUTSTANDING, MX_ERR_SHUTDOWN, MX_ERR_TIMEOUT,
    MX_ERR_TRANSPORT, MX_OK,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Message for the last failed call on this thread; empty after a success.
#[no_mangle]
pub extern "C" fn mxlink_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}
