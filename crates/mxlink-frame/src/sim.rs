//! In-process model of the co-processor's side of the link.
//!
//! [`SimCoprocessor`] answers header exchanges the way the real slave does,
//! drives the data-ready and flow-control interrupts, and hands every payload
//! the host sends to a responder closure whose return values are queued as
//! outbound frames. Faults can be injected to exercise the recovery paths.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mxlink_transport::{
    check_duplex_lengths, IrqLine, LinkPins, LinkSignals, SpiBus, TransportError,
};
use tracing::trace;

use crate::codec::{SpiHeader, HEADER_SIZE, SPI_WRITE};

/// Maps one inbound payload to zero or more outbound payloads.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

type IrqSink = Arc<dyn Fn(IrqLine) + Send + Sync>;

/// Ways to spoil the next slave header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFault {
    /// Answer with a WRITE header instead of READ.
    WrongType,
    /// Flip a bit of the length complement.
    BadComplement,
}

#[derive(Debug, Clone, Copy)]
enum SimPhase {
    Header,
    Data { host_len: usize, slave_len: usize },
    Done,
}

struct SimState {
    selected: bool,
    phase: SimPhase,
    outbound: VecDeque<Vec<u8>>,
    received: Vec<Vec<u8>>,
    responder: Responder,
    header_fault: Option<HeaderFault>,
    flow_stalled: bool,
    fail_next: bool,
    phantom_data_ready: bool,
    in_reset: bool,
    resets: usize,
    transfers: usize,
}

/// Simulated co-processor.
///
/// Cloneable handles to it are obtained with [`SimCoprocessor::bus`]; each
/// handle implements both [`SpiBus`] and [`LinkPins`].
#[derive(Clone)]
pub struct SimCoprocessor {
    state: Arc<Mutex<SimState>>,
    irq: IrqSink,
    signals: Arc<LinkSignals>,
}

impl SimCoprocessor {
    /// Co-processor raising interrupts on its own [`LinkSignals`].
    pub fn new(responder: Responder) -> Self {
        let signals = Arc::new(LinkSignals::new());
        let irq: IrqSink = {
            let signals = Arc::clone(&signals);
            Arc::new(move |line| signals.raise(line))
        };
        Self::build(signals, irq, responder)
    }

    /// Co-processor that accepts everything and never answers.
    pub fn silent() -> Self {
        Self::new(Box::new(|_| Vec::new()))
    }

    /// Co-processor delivering interrupts through `irq`.
    ///
    /// The signals returned by [`signals`](Self::signals) are not raised in
    /// this mode; `irq` is responsible for reaching whichever signals the host
    /// side waits on.
    pub fn with_irq(
        irq: impl Fn(IrqLine) + Send + Sync + 'static,
        responder: Responder,
    ) -> Self {
        Self::build(Arc::new(LinkSignals::new()), Arc::new(irq), responder)
    }

    fn build(signals: Arc<LinkSignals>, irq: IrqSink, responder: Responder) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                selected: false,
                phase: SimPhase::Header,
                outbound: VecDeque::new(),
                received: Vec::new(),
                responder,
                header_fault: None,
                flow_stalled: false,
                fail_next: false,
                phantom_data_ready: false,
                in_reset: false,
                resets: 0,
                transfers: 0,
            })),
            irq,
            signals,
        }
    }

    pub fn signals(&self) -> &Arc<LinkSignals> {
        &self.signals
    }

    /// A handle to hand to the link as bus and pins.
    pub fn bus(&self) -> SimBus {
        SimBus { sim: self.clone() }
    }

    /// Queue an unsolicited frame and raise the notify line.
    pub fn push_outbound(&self, payload: Vec<u8>) {
        let mut state = self.lock();
        state.outbound.push_back(payload);
        let notify = !state.selected;
        drop(state);
        if notify {
            (self.irq)(IrqLine::DataReady);
        }
    }

    pub fn corrupt_next_header(&self, fault: HeaderFault) {
        self.lock().header_fault = Some(fault);
    }

    /// While stalled, the flow-control line never rises.
    pub fn set_flow_stalled(&self, stalled: bool) {
        self.lock().flow_stalled = stalled;
    }

    /// Make the next bus transfer fail.
    pub fn fail_next_transfer(&self) {
        self.lock().fail_next = true;
    }

    /// Hold the notify line high with nothing queued, until the next header exchange.
    pub fn set_phantom_data_ready(&self, on: bool) {
        let mut state = self.lock();
        state.phantom_data_ready = on;
        let notify = on && !state.selected;
        drop(state);
        if notify {
            (self.irq)(IrqLine::DataReady);
        }
    }

    /// Payloads received from the host, in order.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.lock().received.clone()
    }

    /// Completed bus transfers, headers included.
    pub fn transfers(&self) -> usize {
        self.lock().transfers
    }

    /// Completed reset pulses.
    pub fn resets(&self) -> usize {
        self.lock().resets
    }

    pub fn pending_outbound(&self) -> usize {
        self.lock().outbound.len()
    }

    pub fn is_selected(&self) -> bool {
        self.lock().selected
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SimCoprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SimCoprocessor")
            .field("selected", &state.selected)
            .field("outbound", &state.outbound.len())
            .field("transfers", &state.transfers)
            .finish()
    }
}

/// Host-facing handle to a [`SimCoprocessor`].
#[derive(Clone, Debug)]
pub struct SimBus {
    sim: SimCoprocessor,
}

impl SimBus {
    fn exchange_header(
        state: &mut SimState,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<Option<IrqLine>, TransportError> {
        let raw: &[u8; HEADER_SIZE] = tx.try_into().map_err(|_| TransportError::Transfer {
            len: tx.len(),
            reason: format!("expected a {HEADER_SIZE}-byte header"),
        })?;
        let master = SpiHeader::parse(raw);
        let host_len = if master.kind == SPI_WRITE && master.is_length_consistent() {
            master.payload_len()
        } else {
            0
        };
        let slave_len = state.outbound.front().map_or(0, Vec::len);
        let announced = u16::try_from(slave_len).unwrap_or(u16::MAX);

        let mut slave = SpiHeader::read(announced);
        let fault = state.header_fault.take();
        match fault {
            Some(HeaderFault::WrongType) => slave.kind = SPI_WRITE,
            Some(HeaderFault::BadComplement) => slave.len_complement ^= 0x0001,
            None => {}
        }
        rx.copy_from_slice(&slave.encode());
        state.phantom_data_ready = false;
        trace!(host_len, slave_len, ?fault, "sim header exchange");

        if fault.is_some() || (host_len == 0 && slave_len == 0) {
            state.phase = SimPhase::Done;
            return Ok(None);
        }
        state.phase = SimPhase::Data { host_len, slave_len };
        Ok((!state.flow_stalled).then_some(IrqLine::Flow))
    }

    fn exchange_data(
        state: &mut SimState,
        host_len: usize,
        slave_len: usize,
        tx: &[u8],
        rx: &mut [u8],
    ) {
        rx.fill(0);
        if slave_len > 0 {
            if let Some(frame) = state.outbound.pop_front() {
                let n = frame.len().min(rx.len());
                rx[..n].copy_from_slice(&frame[..n]);
            }
        }
        if host_len > 0 {
            let inbound = tx[..host_len.min(tx.len())].to_vec();
            let responses = (state.responder)(&inbound);
            state.received.push(inbound);
            state.outbound.extend(responses);
        }
        state.phase = SimPhase::Done;
    }
}

impl SpiBus for SimBus {
    fn transfer(
        &mut self,
        tx: &[u8],
        rx: &mut [u8],
        _timeout: Duration,
    ) -> mxlink_transport::Result<()> {
        check_duplex_lengths(tx, rx)?;
        let mut state = self.sim.lock();
        if state.in_reset {
            return Err(TransportError::Transfer {
                len: tx.len(),
                reason: "co-processor held in reset".to_string(),
            });
        }
        if state.fail_next {
            state.fail_next = false;
            return Err(TransportError::Transfer {
                len: tx.len(),
                reason: "injected bus fault".to_string(),
            });
        }
        if !state.selected {
            return Err(TransportError::Transfer {
                len: tx.len(),
                reason: "chip select not asserted".to_string(),
            });
        }
        let irq = match state.phase {
            SimPhase::Header => Self::exchange_header(&mut state, tx, rx)?,
            SimPhase::Data { host_len, slave_len } => {
                Self::exchange_data(&mut state, host_len, slave_len, tx, rx);
                None
            }
            SimPhase::Done => {
                return Err(TransportError::Transfer {
                    len: tx.len(),
                    reason: "transfer after transaction end".to_string(),
                })
            }
        };
        state.transfers += 1;
        drop(state);
        if let Some(line) = irq {
            (self.sim.irq)(line);
        }
        Ok(())
    }
}

impl LinkPins for SimBus {
    fn set_chip_select(&mut self, asserted: bool) {
        let mut state = self.sim.lock();
        let was = state.selected;
        state.selected = asserted;
        state.phase = SimPhase::Header;
        let irq = match (was, asserted) {
            (false, true) if !state.flow_stalled => Some(IrqLine::Flow),
            (true, false) if !state.outbound.is_empty() => Some(IrqLine::DataReady),
            _ => None,
        };
        drop(state);
        if let Some(line) = irq {
            (self.sim.irq)(line);
        }
    }

    fn data_ready(&self) -> bool {
        let state = self.sim.lock();
        !state.in_reset && (!state.outbound.is_empty() || state.phantom_data_ready)
    }

    fn flow_ready(&self) -> bool {
        let state = self.sim.lock();
        !state.in_reset && state.selected && !state.flow_stalled
    }

    /// Holding reset loses every queued frame and any pending fault.
    fn set_reset(&mut self, asserted: bool) {
        let mut state = self.sim.lock();
        if asserted {
            state.outbound.clear();
            state.header_fault = None;
            state.fail_next = false;
            state.phantom_data_ready = false;
            state.phase = SimPhase::Header;
        } else if state.in_reset {
            state.resets += 1;
        }
        state.in_reset = asserted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_slave_header, SPI_READ};

    fn select(bus: &mut SimBus) {
        bus.set_chip_select(true);
    }

    #[test]
    fn select_raises_flow() {
        let sim = SimCoprocessor::silent();
        let mut bus = sim.bus();
        select(&mut bus);
        assert!(sim.signals().flow.is_raised());
        assert!(bus.flow_ready());
    }

    #[test]
    fn stalled_flow_stays_low() {
        let sim = SimCoprocessor::silent();
        sim.set_flow_stalled(true);
        let mut bus = sim.bus();
        select(&mut bus);
        assert!(!sim.signals().flow.is_raised());
        assert!(!bus.flow_ready());
    }

    #[test]
    fn header_announces_queued_frame() {
        let sim = SimCoprocessor::silent();
        sim.push_outbound(vec![1, 2, 3, 4]);
        assert!(sim.signals().work.is_raised());

        let mut bus = sim.bus();
        select(&mut bus);
        let mut rx = [0u8; HEADER_SIZE];
        bus.transfer(&SpiHeader::write(0).encode(), &mut rx, Duration::from_millis(1)).unwrap();
        let header = decode_slave_header(&rx).unwrap();
        assert_eq!(header.kind, SPI_READ);
        assert_eq!(header.payload_len(), 4);
    }

    #[test]
    fn responder_output_announced_after_deselect() {
        let sim = SimCoprocessor::new(Box::new(|inbound| {
            vec![inbound.iter().rev().copied().collect()]
        }));
        let mut bus = sim.bus();
        select(&mut bus);
        let mut rx = [0u8; HEADER_SIZE];
        bus.transfer(&SpiHeader::write(3).encode(), &mut rx, Duration::from_millis(1)).unwrap();
        let mut data_rx = [0u8; 3];
        bus.transfer(&[7, 8, 9], &mut data_rx, Duration::from_millis(1)).unwrap();
        sim.signals().work.clear();

        bus.set_chip_select(false);
        assert!(sim.signals().work.is_raised());
        assert_eq!(sim.received(), vec![vec![7, 8, 9]]);
        assert_eq!(sim.pending_outbound(), 1);
    }

    #[test]
    fn transfer_without_select_fails() {
        let sim = SimCoprocessor::silent();
        let mut bus = sim.bus();
        let mut rx = [0u8; HEADER_SIZE];
        let err = bus
            .transfer(&SpiHeader::write(0).encode(), &mut rx, Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(err, TransportError::Transfer { .. }));
    }

    #[test]
    fn reset_drops_queued_frames() {
        let sim = SimCoprocessor::silent();
        sim.push_outbound(vec![1, 2]);
        sim.fail_next_transfer();
        let mut bus = sim.bus();

        bus.set_reset(true);
        assert!(!bus.data_ready());
        select(&mut bus);
        assert!(!bus.flow_ready());
        bus.set_reset(false);
        bus.set_chip_select(false);

        assert_eq!(sim.resets(), 1);
        assert_eq!(sim.pending_outbound(), 0);
        select(&mut bus);
        let mut rx = [0u8; HEADER_SIZE];
        bus.transfer(&SpiHeader::write(0).encode(), &mut rx, Duration::from_millis(1)).unwrap();
        assert_eq!(decode_slave_header(&rx).unwrap().payload_len(), 0);
    }

    #[test]
    fn irq_sink_receives_lines() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sim = {
            let seen = Arc::clone(&seen);
            SimCoprocessor::with_irq(
                move |line| seen.lock().unwrap().push(line),
                Box::new(|_| Vec::new()),
            )
        };
        sim.push_outbound(vec![0xAA]);
        sim.bus().set_chip_select(true);
        assert_eq!(*seen.lock().unwrap(), vec![IrqLine::DataReady, IrqLine::Flow]);
        assert!(!sim.signals().work.is_raised());
    }
}
