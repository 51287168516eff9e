use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use mxlink_transport::{LinkPins, LinkSignals, NetBuffer, SpiBus};
use tracing::{debug, trace};

use crate::codec::{decode_slave_header, LinkConfig, SpiHeader, HEADER_SIZE};
use crate::error::{FrameError, Phase, Result};

/// The single outbound payload waiting for a transaction.
///
/// Only one payload is ever queued; the session layer above serialises
/// requests so a second `put` before the first is consumed is a caller bug.
#[derive(Debug, Default)]
pub struct TxSlot {
    pending: Mutex<Option<Bytes>>,
}

impl TxSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `payload` for the next transaction.
    pub fn put(&self, payload: Bytes, max_payload: usize) -> Result<()> {
        if payload.is_empty() {
            return Err(FrameError::EmptyPayload);
        }
        if payload.len() > max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: max_payload,
            });
        }
        let mut pending = self.lock();
        if let Some(queued) = pending.as_ref() {
            return Err(FrameError::SendBusy(queued.len()));
        }
        *pending = Some(payload);
        Ok(())
    }

    pub fn peek(&self) -> Option<Bytes> {
        self.lock().clone()
    }

    /// Remove the queued payload, if any.
    pub fn take(&self) -> Option<Bytes> {
        self.lock().take()
    }

    /// Remove the queued payload only if it is still `announced`.
    ///
    /// A payload queued after `announced` was withdrawn stays in the slot.
    pub fn take_announced(&self, announced: &Bytes) -> Option<Bytes> {
        let mut pending = self.lock();
        match pending.as_ref() {
            Some(queued)
                if queued.len() == announced.len() && queued.as_ptr() == announced.as_ptr() =>
            {
                pending.take()
            }
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Bytes>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outcome of one [`LinkFramer::transact`] call.
#[derive(Debug)]
pub enum Transaction {
    /// Nothing queued and the notify line was low; the bus was not touched.
    Idle,
    /// Headers were exchanged but neither side had data.
    Empty,
    /// The data phase ran.
    Exchanged {
        sent: usize,
        received: Option<NetBuffer>,
    },
}

/// Drives one half-duplex transaction per call.
pub struct LinkFramer<B, P> {
    bus: B,
    pins: P,
    signals: Arc<LinkSignals>,
    config: LinkConfig,
}

impl<B: SpiBus, P: LinkPins> LinkFramer<B, P> {
    pub fn new(bus: B, mut pins: P, signals: Arc<LinkSignals>, config: LinkConfig) -> Self {
        pins.set_chip_select(false);
        Self {
            bus,
            pins,
            signals,
            config,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn signals(&self) -> &Arc<LinkSignals> {
        &self.signals
    }

    /// Pulse the reset line, then wait for the co-processor to boot.
    ///
    /// Interrupt latches from before the pulse are discarded; a notify line
    /// that is high once the device is back raises the work signal again.
    pub fn hardware_reset(&mut self) {
        debug!(
            pulse = ?self.config.reset_pulse,
            settle = ?self.config.reset_settle,
            "resetting co-processor"
        );
        self.pins.set_chip_select(false);
        self.pins.set_reset(true);
        thread::sleep(self.config.reset_pulse);
        self.signals.flow.clear();
        self.signals.work.clear();
        self.pins.set_reset(false);
        thread::sleep(self.config.reset_settle);
        if self.pins.data_ready() {
            self.signals.work.raise();
        }
    }

    /// True while there is still work for another transaction.
    pub fn needs_service(&self, tx: &TxSlot) -> bool {
        !tx.is_empty() || self.pins.data_ready()
    }

    /// Run one transaction.
    ///
    /// The queued payload in `tx` is consumed once the data phase starts;
    /// failures before that leave it queued. If it was replaced after the
    /// header announced its length, the replacement stays queued and the
    /// call fails with [`FrameError::SendWithdrawn`]. `rx` must hold a receive buffer
    /// whenever the slave may announce data; it is taken only when bytes
    /// actually arrive.
    pub fn transact(&mut self, tx: &TxSlot, rx: &mut Option<NetBuffer>) -> Result<Transaction> {
        self.pins.set_chip_select(false);

        let outbound = tx.peek();
        if outbound.is_none() && !self.pins.data_ready() {
            return Ok(Transaction::Idle);
        }

        let send_len = outbound.as_ref().map_or(0, Bytes::len);
        let max = self.config.effective_max_payload();
        let announced = u16::try_from(send_len).map_err(|_| FrameError::PayloadTooLarge {
            size: send_len,
            max,
        })?;
        let master = SpiHeader::write(announced);

        // A flow edge left over from the previous transaction is not a grant.
        self.signals.flow.clear();
        let cs = ChipSelect::assert(&mut self.pins);

        wait_flow(&self.signals, &*cs, self.config.flow_timeout, Phase::Header)?;

        let mut slave_raw = [0u8; HEADER_SIZE];
        self.bus
            .transfer(&master.encode(), &mut slave_raw, self.config.transfer_timeout)?;
        let slave = decode_slave_header(&slave_raw)?;
        let recv_len = slave.payload_len();
        trace!(send_len, recv_len, "headers exchanged");

        if send_len == 0 && recv_len == 0 {
            return Ok(Transaction::Empty);
        }

        if send_len > max || recv_len > max {
            return Err(FrameError::PayloadTooLarge {
                size: send_len.max(recv_len),
                max,
            });
        }

        if recv_len > 0 && rx.is_none() {
            return Err(FrameError::NoReceiveBuffer);
        }

        wait_flow(&self.signals, &*cs, self.config.flow_timeout, Phase::Data)?;

        let data_len = send_len.max(recv_len);
        let payload = match &outbound {
            Some(announced) => Some(
                tx.take_announced(announced)
                    .ok_or(FrameError::SendWithdrawn)?,
            ),
            None => None,
        };
        let timeout = self.config.transfer_timeout;

        match (payload, rx.as_mut().filter(|_| recv_len > 0)) {
            (Some(out), Some(buf)) => {
                let mut padded = out.to_vec();
                padded.resize(data_len, 0);
                buf.set_payload_len(data_len);
                self.bus.transfer(&padded, buf.payload_mut(), timeout)?;
            }
            (Some(out), None) => {
                self.bus.transmit(&out[..send_len], timeout)?;
            }
            (None, Some(buf)) => {
                buf.set_payload_len(data_len);
                self.bus.receive(buf.payload_mut(), timeout)?;
            }
            (None, None) => return Ok(Transaction::Empty),
        }

        drop(cs);

        let received = if recv_len > 0 {
            rx.take().map(|mut buf| {
                buf.set_payload_len(recv_len);
                buf
            })
        } else {
            None
        };
        debug!(sent = send_len, received = recv_len, "link transaction complete");

        Ok(Transaction::Exchanged {
            sent: send_len,
            received,
        })
    }
}

/// Selects the slave for as long as it lives.
struct ChipSelect<'a, P: LinkPins> {
    pins: &'a mut P,
}

impl<'a, P: LinkPins> ChipSelect<'a, P> {
    fn assert(pins: &'a mut P) -> Self {
        pins.set_chip_select(true);
        Self { pins }
    }
}

impl<P: LinkPins> Deref for ChipSelect<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        self.pins
    }
}

impl<P: LinkPins> Drop for ChipSelect<'_, P> {
    fn drop(&mut self) {
        self.pins.set_chip_select(false);
    }
}

/// Wait for the flow-control interrupt and confirm the line is actually high.
fn wait_flow<P: LinkPins>(
    signals: &LinkSignals,
    pins: &P,
    timeout: Duration,
    phase: Phase,
) -> Result<()> {
    let latched = signals.flow.wait_timeout(timeout);
    if !latched || !pins.flow_ready() {
        return Err(FrameError::FlowTimeout { phase });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mxlink_transport::TransportError;

    use super::*;
    use crate::codec::{SPI_READ, SPI_WRITE};
    use crate::sim::{HeaderFault, SimCoprocessor};

    fn framer_for(sim: &SimCoprocessor) -> LinkFramer<crate::sim::SimBus, crate::sim::SimBus> {
        LinkFramer::new(
            sim.bus(),
            sim.bus(),
            Arc::clone(sim.signals()),
            LinkConfig::default(),
        )
    }

    fn rx_buffer() -> Option<NetBuffer> {
        Some(NetBuffer::with_capacity(LinkConfig::default().max_payload_size))
    }

    #[test]
    fn idle_when_nothing_to_do() {
        let sim = SimCoprocessor::silent();
        let mut framer = framer_for(&sim);
        let tx = TxSlot::new();
        let mut rx = rx_buffer();

        let outcome = framer.transact(&tx, &mut rx).unwrap();
        assert!(matches!(outcome, Transaction::Idle));
        assert_eq!(sim.transfers(), 0);
        assert!(rx.is_some());
    }

    #[test]
    fn send_only_transaction() {
        let sim = SimCoprocessor::silent();
        let mut framer = framer_for(&sim);
        let tx = TxSlot::new();
        tx.put(Bytes::from_static(b"hello"), 2500).unwrap();
        let mut rx = rx_buffer();

        let outcome = framer.transact(&tx, &mut rx).unwrap();
        assert!(matches!(
            outcome,
            Transaction::Exchanged {
                sent: 5,
                received: None
            }
        ));
        assert!(tx.is_empty());
        assert!(rx.is_some(), "unused receive buffer is kept");
        assert_eq!(sim.received(), vec![b"hello".to_vec()]);
        assert!(!sim.is_selected());
    }

    #[test]
    fn receive_only_transaction() {
        let sim = SimCoprocessor::silent();
        sim.push_outbound(b"event".to_vec());
        let mut framer = framer_for(&sim);
        let tx = TxSlot::new();
        let mut rx = rx_buffer();

        let outcome = framer.transact(&tx, &mut rx).unwrap();
        let buf = match outcome {
            Transaction::Exchanged {
                sent: 0,
                received: Some(buf),
            } => buf,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(buf.payload(), b"event");
        assert!(rx.is_none(), "receive buffer handed upward");
    }

    #[test]
    fn full_duplex_uses_longer_length() {
        let sim = SimCoprocessor::silent();
        sim.push_outbound(b"a-much-longer-inbound".to_vec());
        let mut framer = framer_for(&sim);
        let tx = TxSlot::new();
        tx.put(Bytes::from_static(b"short"), 2500).unwrap();
        let mut rx = rx_buffer();

        let outcome = framer.transact(&tx, &mut rx).unwrap();
        match outcome {
            Transaction::Exchanged {
                sent: 5,
                received: Some(buf),
            } => assert_eq!(buf.payload(), b"a-much-longer-inbound"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(sim.received(), vec![b"short".to_vec()]);
    }

    #[test]
    fn empty_exchange_when_data_ready_but_nothing_queued() {
        let sim = SimCoprocessor::silent();
        sim.set_phantom_data_ready(true);
        let mut framer = framer_for(&sim);
        let tx = TxSlot::new();
        let mut rx = rx_buffer();

        let outcome = framer.transact(&tx, &mut rx).unwrap();
        assert!(matches!(outcome, Transaction::Empty));
        assert!(!sim.is_selected());
    }

    #[test]
    fn corrupt_header_rejected_and_payload_kept() {
        let sim = SimCoprocessor::silent();
        sim.corrupt_next_header(HeaderFault::BadComplement);
        let mut framer = framer_for(&sim);
        let tx = TxSlot::new();
        tx.put(Bytes::from_static(b"retry-me"), 2500).unwrap();
        let mut rx = rx_buffer();

        let err = framer.transact(&tx, &mut rx).unwrap_err();
        assert!(matches!(err, FrameError::LengthCheck { .. }));
        assert!(!sim.is_selected(), "chip select released on error");
        assert!(!tx.is_empty(), "payload survives a header failure");

        let outcome = framer.transact(&tx, &mut rx).unwrap();
        assert!(matches!(outcome, Transaction::Exchanged { sent: 8, .. }));
        assert_eq!(sim.received(), vec![b"retry-me".to_vec()]);
    }

    #[test]
    fn wrong_slave_type_rejected() {
        let sim = SimCoprocessor::silent();
        sim.corrupt_next_header(HeaderFault::WrongType);
        sim.push_outbound(b"data".to_vec());
        let mut framer = framer_for(&sim);
        let tx = TxSlot::new();
        let mut rx = rx_buffer();

        let err = framer.transact(&tx, &mut rx).unwrap_err();
        assert!(matches!(err, FrameError::InvalidType(SPI_WRITE)));
        assert_eq!(sim.pending_outbound(), 1, "slave frame not lost");

        let outcome = framer.transact(&tx, &mut rx).unwrap();
        assert!(matches!(outcome, Transaction::Exchanged { received: Some(_), .. }));
        assert_eq!(SPI_READ, 0x0B);
    }

    #[test]
    fn oversize_slave_length_rejected() {
        let sim = SimCoprocessor::silent();
        sim.push_outbound(vec![0x55; 64]);
        let mut framer = LinkFramer::new(
            sim.bus(),
            sim.bus(),
            Arc::clone(sim.signals()),
            LinkConfig {
                max_payload_size: 32,
                ..LinkConfig::default()
            },
        );
        let tx = TxSlot::new();
        let mut rx = rx_buffer();

        let err = framer.transact(&tx, &mut rx).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 64, max: 32 }));
        assert!(!sim.is_selected());
    }

    #[test]
    fn flow_timeout_releases_chip_select() {
        let sim = SimCoprocessor::silent();
        sim.set_flow_stalled(true);
        let mut framer = framer_for(&sim);
        let tx = TxSlot::new();
        tx.put(Bytes::from_static(b"x"), 2500).unwrap();
        let mut rx = rx_buffer();

        let err = framer.transact(&tx, &mut rx).unwrap_err();
        assert!(matches!(
            err,
            FrameError::FlowTimeout {
                phase: Phase::Header
            }
        ));
        assert!(!sim.is_selected());
        assert_eq!(sim.transfers(), 0);
        assert!(!tx.is_empty());
    }

    #[test]
    fn bus_failure_is_recoverable() {
        let sim = SimCoprocessor::silent();
        sim.fail_next_transfer();
        let mut framer = framer_for(&sim);
        let tx = TxSlot::new();
        tx.put(Bytes::from_static(b"again"), 2500).unwrap();
        let mut rx = rx_buffer();

        let err = framer.transact(&tx, &mut rx).unwrap_err();
        assert!(matches!(err, FrameError::Bus(TransportError::Transfer { .. })));
        assert!(!sim.is_selected());

        framer.transact(&tx, &mut rx).unwrap();
        assert_eq!(sim.received(), vec![b"again".to_vec()]);
    }

    #[test]
    fn missing_receive_buffer_is_reported() {
        let sim = SimCoprocessor::silent();
        sim.push_outbound(b"inbound".to_vec());
        let mut framer = framer_for(&sim);
        let tx = TxSlot::new();
        let mut rx = None;

        let err = framer.transact(&tx, &mut rx).unwrap_err();
        assert!(matches!(err, FrameError::NoReceiveBuffer));
        assert_eq!(sim.pending_outbound(), 1);
    }

    /// Answers every header with an empty READ and grants the data phase.
    struct GrantingBus {
        signals: Arc<LinkSignals>,
        clocked: Arc<Mutex<Vec<usize>>>,
    }

    impl SpiBus for GrantingBus {
        fn transfer(
            &mut self,
            tx: &[u8],
            rx: &mut [u8],
            _timeout: Duration,
        ) -> mxlink_transport::Result<()> {
            self.clocked.lock().unwrap().push(tx.len());
            if rx.len() == HEADER_SIZE {
                rx.copy_from_slice(&SpiHeader::read(0).encode());
            }
            self.signals.flow.raise();
            Ok(())
        }
    }

    /// Replaces the queued payload the second time flow is sampled.
    struct SwappingPins {
        signals: Arc<LinkSignals>,
        tx: Arc<TxSlot>,
        flow_checks: AtomicUsize,
    }

    impl LinkPins for SwappingPins {
        fn set_chip_select(&mut self, asserted: bool) {
            if asserted {
                self.signals.flow.raise();
            }
        }

        fn data_ready(&self) -> bool {
            false
        }

        fn flow_ready(&self) -> bool {
            if self.flow_checks.fetch_add(1, Ordering::SeqCst) == 1 {
                self.tx.take();
                self.tx.put(Bytes::from_static(b"0123456789"), 2500).unwrap();
            }
            true
        }
    }

    #[test]
    fn payload_replaced_after_header_is_not_sent() {
        let signals = Arc::new(LinkSignals::new());
        let tx = Arc::new(TxSlot::new());
        let clocked = Arc::new(Mutex::new(Vec::new()));
        let mut framer = LinkFramer::new(
            GrantingBus {
                signals: Arc::clone(&signals),
                clocked: Arc::clone(&clocked),
            },
            SwappingPins {
                signals: Arc::clone(&signals),
                tx: Arc::clone(&tx),
                flow_checks: AtomicUsize::new(0),
            },
            Arc::clone(&signals),
            LinkConfig::default(),
        );
        tx.put(Bytes::from_static(b"first"), 2500).unwrap();
        let mut rx = rx_buffer();

        let err = framer.transact(&tx, &mut rx).unwrap_err();
        assert!(matches!(err, FrameError::SendWithdrawn));
        assert_eq!(*clocked.lock().unwrap(), vec![HEADER_SIZE]);
        assert_eq!(tx.take().unwrap().as_ref(), b"0123456789");
    }

    #[test]
    fn take_announced_ignores_other_payloads() {
        let slot = TxSlot::new();
        let announced = Bytes::from_static(b"abc");
        slot.put(Bytes::from(b"abc".to_vec()), 16).unwrap();
        assert!(slot.take_announced(&announced).is_none());
        assert!(!slot.is_empty());

        let queued = slot.peek().unwrap();
        assert_eq!(slot.take_announced(&queued).unwrap().as_ref(), b"abc");
        assert!(slot.is_empty());
    }

    #[test]
    fn tx_slot_rejects_second_put() {
        let slot = TxSlot::new();
        slot.put(Bytes::from_static(b"one"), 16).unwrap();
        let err = slot.put(Bytes::from_static(b"two"), 16).unwrap_err();
        assert!(matches!(err, FrameError::SendBusy(3)));
        assert_eq!(slot.take().unwrap().as_ref(), b"one");
    }

    #[test]
    fn tx_slot_rejects_empty_and_oversize() {
        let slot = TxSlot::new();
        assert!(matches!(
            slot.put(Bytes::new(), 16),
            Err(FrameError::EmptyPayload)
        ));
        assert!(matches!(
            slot.put(Bytes::from(vec![0u8; 17]), 16),
            Err(FrameError::PayloadTooLarge { size: 17, max: 16 })
        ));
        assert!(slot.is_empty());
    }

    struct CountingPins {
        signals: Arc<LinkSignals>,
        asserted: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        selected: bool,
    }

    impl LinkPins for CountingPins {
        fn set_chip_select(&mut self, asserted: bool) {
            if asserted {
                self.asserted.fetch_add(1, Ordering::SeqCst);
                self.signals.flow.raise();
            } else if self.selected {
                self.released.fetch_add(1, Ordering::SeqCst);
            }
            self.selected = asserted;
        }

        fn data_ready(&self) -> bool {
            true
        }

        fn flow_ready(&self) -> bool {
            true
        }
    }

    struct GarbageBus;

    impl SpiBus for GarbageBus {
        fn transfer(
            &mut self,
            _tx: &[u8],
            rx: &mut [u8],
            _timeout: Duration,
        ) -> mxlink_transport::Result<()> {
            rx.fill(0xEE);
            Ok(())
        }
    }

    #[test]
    fn every_assert_is_paired_with_a_release() {
        let asserted = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let signals = Arc::new(LinkSignals::new());
        let pins = CountingPins {
            signals: Arc::clone(&signals),
            asserted: Arc::clone(&asserted),
            released: Arc::clone(&released),
            selected: false,
        };
        let mut framer = LinkFramer::new(
            GarbageBus,
            pins,
            Arc::clone(&signals),
            LinkConfig::default(),
        );
        let tx = TxSlot::new();
        let mut rx = rx_buffer();

        for _ in 0..3 {
            let err = framer.transact(&tx, &mut rx).unwrap_err();
            assert!(matches!(err, FrameError::InvalidType(0xEE)));
        }
        assert_eq!(asserted.load(Ordering::SeqCst), 3);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }
}
