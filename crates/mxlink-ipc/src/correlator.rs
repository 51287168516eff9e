use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::error::{IpcError, Result};

/// What to do with a response whose request id matches nothing pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MismatchPolicy {
    /// Log and drop it; the waiter keeps waiting.
    #[default]
    Discard,
    /// Fault the session: the waiter and every later request fail.
    Halt,
}

/// Outcome of handing a response to the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Matched the pending request and woke its waiter.
    Matched,
    /// Arrived after its request had timed out.
    Late,
    /// Matched nothing and was dropped.
    Discarded,
    /// Matched nothing and faulted the session.
    Halted,
    /// The session was already faulted.
    Faulted,
}

#[derive(Debug)]
enum Slot {
    Idle,
    Waiting { req_id: u32 },
    Completed { req_id: u32, params: Bytes },
}

#[derive(Debug)]
struct State {
    slot: Slot,
    abandoned: Option<u32>,
    fault: Option<String>,
}

/// Single pending-request slot with a completion rendezvous.
#[derive(Debug)]
pub struct Correlator {
    state: Mutex<State>,
    cond: Condvar,
    policy: MismatchPolicy,
}

impl Correlator {
    pub fn new(policy: MismatchPolicy) -> Self {
        Self {
            state: Mutex::new(State {
                slot: Slot::Idle,
                abandoned: None,
                fault: None,
            }),
            cond: Condvar::new(),
            policy,
        }
    }

    pub fn policy(&self) -> MismatchPolicy {
        self.policy
    }

    /// Install `req_id` as the pending request.
    pub fn begin(&self, req_id: u32) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(reason) = &state.fault {
            return Err(IpcError::Faulted(reason.clone()));
        }
        match state.slot {
            Slot::Idle => {
                state.slot = Slot::Waiting { req_id };
                Ok(())
            }
            Slot::Waiting { req_id: busy } | Slot::Completed { req_id: busy, .. } => {
                error!(pending = busy, req_id, "request issued while another is outstanding");
                Err(IpcError::RequestOutstanding(busy))
            }
        }
    }

    /// Id of the request currently waiting, if any.
    pub fn pending(&self) -> Option<u32> {
        match self.lock().slot {
            Slot::Waiting { req_id } => Some(req_id),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<String> {
        self.lock().fault.clone()
    }

    pub fn is_faulted(&self) -> bool {
        self.lock().fault.is_some()
    }

    /// Hand a response's parameters to the pending request.
    pub fn complete(&self, req_id: u32, params: Bytes) -> Delivery {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.fault.is_some() {
            return Delivery::Faulted;
        }
        let expected = match state.slot {
            Slot::Waiting { req_id: pending } => Some(pending),
            _ => None,
        };
        if expected == Some(req_id) {
            state.slot = Slot::Completed { req_id, params };
            drop(guard);
            self.cond.notify_all();
            return Delivery::Matched;
        }
        if state.abandoned == Some(req_id) {
            state.abandoned = None;
            debug!(req_id, "discarding response to timed-out request");
            return Delivery::Late;
        }

        match self.policy {
            MismatchPolicy::Discard => {
                warn!(req_id, ?expected, "discarding response with unexpected request id");
                Delivery::Discarded
            }
            MismatchPolicy::Halt => {
                let reason = match expected {
                    Some(pending) => format!(
                        "response 0x{req_id:08x} does not match pending request 0x{pending:08x}"
                    ),
                    None => format!("response 0x{req_id:08x} with no request pending"),
                };
                error!(req_id, ?expected, "halting session on mismatched response");
                state.fault = Some(reason);
                drop(guard);
                self.cond.notify_all();
                Delivery::Halted
            }
        }
    }

    /// Take the response for `req_id` if it has arrived.
    ///
    /// `None` while still waiting. Clears the slot on success or fault.
    pub fn try_take(&self, req_id: u32) -> Option<Result<Bytes>> {
        let mut state = self.lock();
        Self::take_locked(&mut state, req_id)
    }

    /// Block until the response for `req_id` arrives, the session faults or
    /// `timeout` elapses. The slot is always clear on return.
    pub fn wait(&self, req_id: u32, timeout: Duration) -> Result<Bytes> {
        let state = self.lock();
        let (mut state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |state| {
                state.fault.is_none() && !completed(&state.slot, req_id)
            })
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(outcome) = Self::take_locked(&mut state, req_id) {
            return outcome;
        }
        Self::abandon_locked(&mut state, req_id);
        Err(IpcError::Timeout(timeout))
    }

    /// Give up on `req_id`; a response arriving later is discarded.
    pub fn abandon(&self, req_id: u32) {
        Self::abandon_locked(&mut self.lock(), req_id);
    }

    fn take_locked(state: &mut State, req_id: u32) -> Option<Result<Bytes>> {
        if let Some(reason) = &state.fault {
            let reason = reason.clone();
            state.slot = Slot::Idle;
            return Some(Err(IpcError::Faulted(reason)));
        }
        if !completed(&state.slot, req_id) {
            return None;
        }
        match std::mem::replace(&mut state.slot, Slot::Idle) {
            Slot::Completed { params, .. } => Some(Ok(params)),
            _ => None,
        }
    }

    fn abandon_locked(state: &mut State, req_id: u32) {
        let owned = match state.slot {
            Slot::Waiting { req_id: id } | Slot::Completed { req_id: id, .. } => id == req_id,
            Slot::Idle => false,
        };
        if owned {
            state.slot = Slot::Idle;
            state.abandoned = Some(req_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn completed(slot: &Slot, req_id: u32) -> bool {
    matches!(slot, Slot::Completed { req_id: id, .. } if *id == req_id)
}
