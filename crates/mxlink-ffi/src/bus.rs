use std::time::Duration;

use mxlink_transport::{check_duplex_lengths, LinkPins, SpiBus, TransportError};

use crate::types::MxBusOps;

/// [`SpiBus`] and [`LinkPins`] over C callbacks.
pub(crate) struct CBus {
    ops: MxBusOps,
}

// SAFETY: The C side promises that `ops.ctx` and its callbacks may be used
// from the thread that drives the link, which is the only thread touching a
// given `CBus` at a time.
unsafe impl Send for CBus {}

impl CBus {
    /// Reject ops tables with a missing callback.
    pub(crate) fn new(ops: MxBusOps) -> Result<Self, &'static str> {
        if ops.transfer.is_none() {
            return Err("ops.transfer cannot be null");
        }
        if ops.set_chip_select.is_none() {
            return Err("ops.set_chip_select cannot be null");
        }
        if ops.data_ready.is_none() {
            return Err("ops.data_ready cannot be null");
        }
        if ops.flow_ready.is_none() {
            return Err("ops.flow_ready cannot be null");
        }
        Ok(Self { ops })
    }

    fn call_transfer(
        &mut self,
        tx: *const u8,
        rx: *mut u8,
        len: usize,
        timeout: Duration,
    ) -> mxlink_transport::Result<()> {
        let Some(transfer) = self.ops.transfer else {
            return Err(TransportError::Shutdown);
        };
        let wire_len = u16::try_from(len).map_err(|_| TransportError::Transfer {
            len,
            reason: "longer than the 16-bit transfer length".to_string(),
        })?;
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

        // SAFETY: `tx` and `rx` are null or valid for `len` bytes for the
        // duration of the call; `ctx` is passed back unchanged.
        let code = unsafe { transfer(self.ops.ctx, tx, rx, wire_len, timeout_ms) };
        if code != 0 {
            return Err(TransportError::Transfer {
                len,
                reason: format!("bus callback returned {code}"),
            });
        }
        Ok(())
    }
}

impl SpiBus for CBus {
    fn transfer(
        &mut self,
        tx: &[u8],
        rx: &mut [u8],
        timeout: Duration,
    ) -> mxlink_transport::Result<()> {
        check_duplex_lengths(tx, rx)?;
        self.call_transfer(tx.as_ptr(), rx.as_mut_ptr(), tx.len(), timeout)
    }

    fn transmit(&mut self, tx: &[u8], timeout: Duration) -> mxlink_transport::Result<()> {
        self.call_transfer(tx.as_ptr(), std::ptr::null_mut(), tx.len(), timeout)
    }

    fn receive(&mut self, rx: &mut [u8], timeout: Duration) -> mxlink_transport::Result<()> {
        self.call_transfer(std::ptr::null(), rx.as_mut_ptr(), rx.len(), timeout)
    }
}

impl LinkPins for CBus {
    fn set_chip_select(&mut self, asserted: bool) {
        if let Some(set) = self.ops.set_chip_select {
            // SAFETY: Callback and context supplied together by the C side.
            unsafe { set(self.ops.ctx, asserted) }
        }
    }

    fn data_ready(&self) -> bool {
        match self.ops.data_ready {
            // SAFETY: Callback and context supplied together by the C side.
            Some(level) => unsafe { level(self.ops.ctx) },
            None => false,
        }
    }

    fn flow_ready(&self) -> bool {
        match self.ops.flow_ready {
            // SAFETY: Callback and context supplied together by the C side.
            Some(level) => unsafe { level(self.ops.ctx) },
            None => false,
        }
    }

    fn set_reset(&mut self, asserted: bool) {
        if let Some(set) = self.ops.reset {
            // SAFETY: Callback and context supplied together by the C side.
            unsafe { set(self.ops.ctx, asserted) }
        }
    }
}
