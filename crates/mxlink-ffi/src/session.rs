use std::ffi::c_void;
use std::sync::Arc;
use std::time::Duration;

use mxlink_frame::{LinkConfig, LinkDriver};
use mxlink_ipc::{api, Event, Session, SessionConfig};
use mxlink_transport::{IrqLine, LinkSignals};

use crate::bus::CBus;
use crate::error;
use crate::types::{MxBusOps, MxEventFn, MxResult, MxSessionHandle, SessionHandle};

fn with_session<T>(handle: MxSessionHandle, on_error: T, f: impl FnOnce(&SessionHandle) -> T) -> T {
    if handle.is_null() {
        let _ = error::set_invalid_argument("session handle cannot be null");
        return on_error;
    }

    let session_handle = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &*(handle as *const SessionHandle) }
    };

    f(session_handle)
}

/// Convert an optional byte pointer + length into a slice.
///
/// # Safety
/// If `len > 0`, `data` must be non-null and readable for `len` bytes.
unsafe fn bytes_arg<'a>(data: *const u8, len: usize, name: &str) -> Option<&'a [u8]> {
    if len == 0 {
        return Some(&[]);
    }
    if data.is_null() {
        let _ = error::set_invalid_argument(format!("{name} cannot be null when len > 0"));
        return None;
    }

    // SAFETY: Pointer and length are validated above and owned by caller for the call duration.
    Some(unsafe { std::slice::from_raw_parts(data, len) })
}

/// Resolve an in/out length pointer and its buffer into a writable slice.
///
/// # Safety
/// `len` must be null or writable; if `*len > 0`, `data` must be writable for `*len` bytes.
unsafe fn out_arg<'a>(data: *mut u8, len: *mut u16) -> Option<&'a mut [u8]> {
    if len.is_null() {
        return Some(&mut []);
    }
    // SAFETY: `len` checked for null above.
    let capacity = usize::from(unsafe { *len });
    if capacity == 0 {
        return Some(&mut []);
    }
    if data.is_null() {
        let _ = error::set_invalid_argument("out cannot be null when *out_len > 0");
        return None;
    }

    // SAFETY: Pointer and capacity are validated above and owned by caller for the call duration.
    Some(unsafe { std::slice::from_raw_parts_mut(data, capacity) })
}

/// Store `value` through an optional length pointer.
///
/// # Safety
/// `len` must be null or writable.
unsafe fn store_len(len: *mut u16, value: usize) {
    if !len.is_null() {
        // SAFETY: Checked for null above.
        unsafe { *len = u16::try_from(value).unwrap_or(u16::MAX) };
    }
}

fn init(ops: *const MxBusOps, out_handle: *mut MxSessionHandle, polled: bool) -> MxResult {
    error::clear_error_state();

    if out_handle.is_null() {
        return error::set_invalid_argument("out_handle cannot be null");
    }
    if ops.is_null() {
        return error::set_invalid_argument("ops cannot be null");
    }

    let ops = {
        // SAFETY: Pointer checked for null above; the table is copied.
        unsafe { *ops }
    };
    let (bus, pins) = match (CBus::new(ops), CBus::new(ops)) {
        (Ok(bus), Ok(pins)) => (bus, pins),
        (Err(message), _) | (_, Err(message)) => return error::set_invalid_argument(message),
    };

    let signals = Arc::new(LinkSignals::new());
    let mut driver = LinkDriver::new(bus, pins, Arc::clone(&signals), LinkConfig::default());
    if ops.reset.is_some() {
        driver.hardware_reset();
    }
    let session = if polled {
        Session::polled(driver, SessionConfig::default())
    } else {
        Session::spawn(driver, SessionConfig::default())
    };

    match session {
        Ok(session) => {
            let handle = SessionHandle { session, signals };
            // SAFETY: `out_handle` checked for null above.
            unsafe { *out_handle = Box::into_raw(Box::new(handle)) as MxSessionHandle };
            MxResult::Ok
        }
        Err(err) => error::map_ipc_error(&err),
    }
}

/// Start a session whose link is driven by a background thread.
///
/// # Safety
/// `ops` must point to a valid ops table whose callbacks stay callable until
/// `mxlink_deinit`; `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn mxlink_init(
    ops: *const MxBusOps,
    out_handle: *mut MxSessionHandle,
) -> MxResult {
    crate::ffi_boundary(MxResult::Internal, || init(ops, out_handle, false))
}

/// Start a session that only touches the link from `mxlink_poll` and while a
/// request waits.
///
/// # Safety
/// Same contract as `mxlink_init`.
#[no_mangle]
pub unsafe extern "C" fn mxlink_init_polled(
    ops: *const MxBusOps,
    out_handle: *mut MxSessionHandle,
) -> MxResult {
    crate::ffi_boundary(MxResult::Internal, || init(ops, out_handle, true))
}

/// Stop a session and free its handle.
///
/// # Safety
/// `handle` must be null or a handle returned by `mxlink_init`, not used again afterwards.
#[no_mangle]
pub unsafe extern "C" fn mxlink_deinit(handle: MxSessionHandle) {
    crate::ffi_boundary((), || {
        if handle.is_null() {
            return;
        }

        // SAFETY: Caller guarantees this handle was allocated by mxlink_init.
        let handle = unsafe { Box::from_raw(handle as *mut SessionHandle) };
        handle.session.shutdown();
        drop(handle);
    });
}

/// Send a command and wait for its response.
///
/// On entry `*out_len` is the capacity of `out`; on success it holds the
/// number of response bytes copied.
///
/// # Safety
/// `handle` must be a valid session handle. If `params_len > 0`, `params` must be
/// readable for that many bytes. `out_len` must be null or writable, and `out`
/// writable for `*out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn mxlink_request(
    handle: MxSessionHandle,
    api_id: u16,
    params: *const u8,
    params_len: u16,
    out: *mut u8,
    out_len: *mut u16,
    timeout_ms: u32,
) -> MxResult {
    let result = crate::ffi_boundary(MxResult::Internal, || {
        error::clear_error_state();

        // SAFETY: Pointer/length pairing validated in helper.
        let Some(params) = (unsafe { bytes_arg(params, usize::from(params_len), "params") }) else {
            return MxResult::InvalidArgument;
        };
        // SAFETY: Pointer/length pairing validated in helper.
        let Some(out_buf) = (unsafe { out_arg(out, out_len) }) else {
            return MxResult::InvalidArgument;
        };

        with_session(handle, MxResult::InvalidArgument, |session_handle| {
            let timeout = Duration::from_millis(u64::from(timeout_ms));
            match session_handle.session.request(api_id, params, out_buf, timeout) {
                Ok(copied) => {
                    // SAFETY: `out_len` is null or writable per the contract above.
                    unsafe { store_len(out_len, copied) };
                    MxResult::Ok
                }
                Err(err) => error::map_ipc_error(&err),
            }
        })
    });
    if result != MxResult::Ok {
        // SAFETY: `out_len` is null or writable per the contract above.
        unsafe { store_len(out_len, 0) };
    }
    result
}

/// Echo `input` through the co-processor.
///
/// # Safety
/// Same contract as `mxlink_request`, with `input`/`input_len` as the parameters.
#[no_mangle]
pub unsafe extern "C" fn mxlink_echo(
    handle: MxSessionHandle,
    input: *const u8,
    input_len: u16,
    out: *mut u8,
    out_len: *mut u16,
    timeout_ms: u32,
) -> MxResult {
    // SAFETY: Contract forwarded from the caller.
    unsafe { mxlink_request(handle, api::SYS_ECHO_CMD, input, input_len, out, out_len, timeout_ms) }
}

/// Drive one receive attempt for a polled session.
///
/// # Safety
/// `handle` must be a valid session handle.
#[no_mangle]
pub unsafe extern "C" fn mxlink_poll(handle: MxSessionHandle, timeout_ms: u32) -> MxResult {
    crate::ffi_boundary(MxResult::Internal, || {
        error::clear_error_state();
        with_session(handle, MxResult::InvalidArgument, |session_handle| {
            match session_handle
                .session
                .poll(Duration::from_millis(u64::from(timeout_ms)))
            {
                Ok(_) => MxResult::Ok,
                Err(err) => error::map_ipc_error(&err),
            }
        })
    })
}

fn notify(handle: MxSessionHandle, line: IrqLine) -> MxResult {
    with_session(handle, MxResult::InvalidArgument, |session_handle| {
        session_handle.signals.raise(line);
        MxResult::Ok
    })
}

/// Call from the data-ready (notify) line interrupt.
///
/// # Safety
/// `handle` must be a valid session handle.
#[no_mangle]
pub unsafe extern "C" fn mxlink_notify_data_ready(handle: MxSessionHandle) -> MxResult {
    crate::ffi_boundary(MxResult::Internal, || notify(handle, IrqLine::DataReady))
}

/// Call from the flow-control line interrupt.
///
/// # Safety
/// `handle` must be a valid session handle.
#[no_mangle]
pub unsafe extern "C" fn mxlink_notify_flow(handle: MxSessionHandle) -> MxResult {
    crate::ffi_boundary(MxResult::Internal, || notify(handle, IrqLine::Flow))
}

struct EventTarget {
    callback: MxEventFn,
    user: *mut c_void,
}

// SAFETY: The C side registers `user` for use from the event thread.
unsafe impl Send for EventTarget {}

impl EventTarget {
    fn deliver(&self, event: Event) {
        let params = event.params();
        // SAFETY: `params` outlives the call; callback and user registered together.
        unsafe { (self.callback)(self.user, event.api_id(), params.as_ptr(), params.len()) };
    }
}

/// Register `callback` for events with `api_id`; a null callback unregisters.
///
/// Callbacks run on the session's event thread, one at a time.
///
/// # Safety
/// `handle` must be a valid session handle; `user` must be usable from another thread.
#[no_mangle]
pub unsafe extern "C" fn mxlink_register_event(
    handle: MxSessionHandle,
    api_id: u16,
    callback: Option<MxEventFn>,
    user: *mut c_void,
) -> MxResult {
    crate::ffi_boundary(MxResult::Internal, || {
        error::clear_error_state();
        with_session(handle, MxResult::InvalidArgument, |session_handle| {
            let events = session_handle.session.events();
            match callback {
                Some(callback) => {
                    let target = EventTarget { callback, user };
                    events.register(api_id, move |event| target.deliver(event));
                }
                None => {
                    events.unregister(api_id);
                }
            }
            MxResult::Ok
        })
    })
}
