use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use mxlink_transport::{BufferAllocator, HeapAllocator, LinkPins, LinkSignals, NetBuffer, SpiBus};
use tracing::{debug, warn};

use crate::codec::LinkConfig;
use crate::error::Result;
use crate::framer::{LinkFramer, Transaction, TxSlot};

/// Queues payloads for the link from any thread.
#[derive(Debug, Clone)]
pub struct LinkSender {
    tx: Arc<TxSlot>,
    signals: Arc<LinkSignals>,
    max_payload: usize,
}

impl LinkSender {
    /// Queue `payload` and wake whoever drives the link.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.tx.put(payload.into(), self.max_payload)?;
        self.signals.work.raise();
        Ok(())
    }

    /// Withdraw a payload that has not reached its data phase yet.
    pub fn cancel(&self) -> Option<Bytes> {
        self.tx.take()
    }

    pub fn is_pending(&self) -> bool {
        !self.tx.is_empty()
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

/// Owns the framer plus the receive buffer that is kept armed between
/// transactions. Driven either by a [`TransportPump`](crate::TransportPump)
/// thread or directly through [`poll_once`](Self::poll_once).
pub struct LinkDriver<B, P, A = HeapAllocator> {
    framer: LinkFramer<B, P>,
    allocator: A,
    tx: Arc<TxSlot>,
    rx: Option<NetBuffer>,
    shortage: bool,
    shortages: u64,
}

impl<B: SpiBus, P: LinkPins> LinkDriver<B, P> {
    pub fn new(bus: B, pins: P, signals: Arc<LinkSignals>, config: LinkConfig) -> Self {
        Self::with_allocator(bus, pins, signals, config, HeapAllocator)
    }
}

impl<B: SpiBus, P: LinkPins, A: BufferAllocator> LinkDriver<B, P, A> {
    pub fn with_allocator(
        bus: B,
        pins: P,
        signals: Arc<LinkSignals>,
        config: LinkConfig,
        allocator: A,
    ) -> Self {
        Self {
            framer: LinkFramer::new(bus, pins, signals, config),
            allocator,
            tx: Arc::new(TxSlot::new()),
            rx: None,
            shortage: false,
            shortages: 0,
        }
    }

    pub fn sender(&self) -> LinkSender {
        LinkSender {
            tx: Arc::clone(&self.tx),
            signals: Arc::clone(self.framer.signals()),
            max_payload: self.framer.config().effective_max_payload(),
        }
    }

    pub fn signals(&self) -> &Arc<LinkSignals> {
        self.framer.signals()
    }

    pub fn config(&self) -> &LinkConfig {
        self.framer.config()
    }

    /// Number of allocation shortages seen so far. Retries within one
    /// shortage do not count again.
    pub fn allocation_shortages(&self) -> u64 {
        self.shortages
    }

    /// Pulse the co-processor reset line and wait for it to boot.
    ///
    /// Anything queued before the reset is dropped along with the armed
    /// receive buffer.
    pub fn hardware_reset(&mut self) {
        if let Some(dropped) = self.tx.take() {
            debug!(len = dropped.len(), "dropping queued payload for reset");
        }
        self.rx = None;
        self.framer.hardware_reset();
    }

    /// Make sure a receive buffer is armed, retrying until `give_up` says stop.
    ///
    /// A shortage is logged once when it starts and once when it ends.
    pub fn ensure_rx_buffer(&mut self, give_up: impl Fn() -> bool) -> bool {
        let capacity = self.framer.config().effective_max_payload();
        loop {
            if self.rx.is_some() {
                return true;
            }
            if let Some(buf) = self.allocator.allocate(capacity) {
                if self.shortage {
                    debug!(capacity, "receive buffer allocation recovered");
                    self.shortage = false;
                }
                self.rx = Some(buf);
                return true;
            }
            if !self.shortage {
                warn!(capacity, "receive buffer allocation failed, retrying");
                self.shortage = true;
                self.shortages += 1;
            }
            if give_up() {
                return false;
            }
            thread::sleep(self.framer.config().alloc_retry_delay);
        }
    }

    /// Run one transaction and return what arrived, if anything.
    ///
    /// Re-raises the work signal while the notify line is still high or a
    /// payload is still queued, so a waiting loop comes straight back.
    pub fn run_once(&mut self) -> Result<Option<NetBuffer>> {
        let outcome = self.framer.transact(&self.tx, &mut self.rx);
        if outcome.is_err() {
            thread::sleep(self.framer.config().error_backoff);
        }
        if self.framer.needs_service(&self.tx) {
            self.framer.signals().work.raise();
        }
        match outcome? {
            Transaction::Exchanged { received, .. } => Ok(received),
            Transaction::Idle | Transaction::Empty => Ok(None),
        }
    }

    /// Caller-driven receive attempt bounded by `timeout`.
    pub fn poll_once(&mut self, timeout: Duration) -> Result<Option<NetBuffer>> {
        let deadline = Instant::now() + timeout;
        if !self.ensure_rx_buffer(|| Instant::now() >= deadline) {
            return Ok(None);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !self.framer.signals().work.wait_timeout(remaining) {
            return Ok(None);
        }
        self.run_once()
    }
}
