use std::ffi::c_void;
use std::sync::Arc;

use mxlink_ipc::Session;
use mxlink_transport::LinkSignals;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MxResult {
    Ok = 0,
    InvalidArgument = 1,
    TransportError = 2,
    FrameError = 3,
    PayloadTooLarge = 4,
    Timeout = 5,
    RequestOutstanding = 6,
    Faulted = 7,
    Shutdown = 8,
    Internal = 99,
}

#[allow(dead_code)]
pub const MX_OK: MxResult = MxResult::Ok;
#[allow(dead_code)]
pub const MX_ERR_INVALID_ARGUMENT: MxResult = MxResult::InvalidArgument;
#[allow(dead_code)]
pub const MX_ERR_TRANSPORT: MxResult = MxResult::TransportError;
#[allow(dead_code)]
pub const MX_ERR_FRAME: MxResult = MxResult::FrameError;
#[allow(dead_code)]
pub const MX_ERR_PAYLOAD_TOO_LARGE: MxResult = MxResult::PayloadTooLarge;
#[allow(dead_code)]
pub const MX_ERR_TIMEOUT: MxResult = MxResult::Timeout;
#[allow(dead_code)]
pub const MX_ERR_REQUEST_OUTSTANDING: MxResult = MxResult::RequestOutstanding;
#[allow(dead_code)]
pub const MX_ERR_FAULTED: MxResult = MxResult::Faulted;
#[allow(dead_code)]
pub const MX_ERR_SHUTDOWN: MxResult = MxResult::Shutdown;
#[allow(dead_code)]
pub const MX_ERR_INTERNAL: MxResult = MxResult::Internal;

/// Full-duplex transfer. `tx` may be null (clock out zeros) and `rx` may be
/// null (discard input). Returns 0 on success.
pub type MxTransferFn = unsafe extern "C" fn(
    ctx: *mut c_void,
    tx: *const u8,
    rx: *mut u8,
    len: u16,
    timeout_ms: u32,
) -> i32;

/// Drive an output line. `asserted` is the active state (low on the wire).
pub type MxSetLineFn = unsafe extern "C" fn(ctx: *mut c_void, asserted: bool);

pub type MxLineLevelFn = unsafe extern "C" fn(ctx: *mut c_void) -> bool;

/// Event callback. `params` is valid only for the duration of the call.
pub type MxEventFn =
    unsafe extern "C" fn(user: *mut c_void, api_id: u16, params: *const u8, len: usize);

/// Board operations the link runs on.
///
/// All callbacks are invoked from the pump thread (or the polling caller)
/// and receive `ctx` unchanged.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MxBusOps {
    pub ctx: *mut c_void,
    pub transfer: Option<MxTransferFn>,
    pub set_chip_select: Option<MxSetLineFn>,
    pub data_ready: Option<MxLineLevelFn>,
    pub flow_ready: Option<MxLineLevelFn>,
    /// Optional reset line. When set, init pulses it before the link starts.
    pub reset: Option<MxSetLineFn>,
}

pub type MxSessionHandle = *mut c_void;

pub(crate) struct SessionHandle {
    pub(crate) session: Session,
    pub(crate) signals: Arc<LinkSignals>,
}
