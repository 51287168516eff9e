use std::time::Duration;

use crate::error::{Result, TransportError};

/// Full-duplex SPI master.
///
/// Implemented by the board's SPI peripheral driver (blocking or DMA-backed)
/// and by the simulated co-processor. Every call is bounded by `timeout`.
pub trait SpiBus: Send {
    /// Clock `tx.len()` bytes out while clocking the same number of bytes into `rx`.
    ///
    /// `tx` and `rx` must have equal lengths.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], timeout: Duration) -> Result<()>;

    /// Transmit only; whatever the slave clocks back is discarded.
    fn transmit(&mut self, tx: &[u8], timeout: Duration) -> Result<()> {
        let mut scratch = vec![0u8; tx.len()];
        self.transfer(tx, &mut scratch, timeout)
    }

    /// Receive only; the master clocks out zeros.
    fn receive(&mut self, rx: &mut [u8], timeout: Duration) -> Result<()> {
        let zeros = vec![0u8; rx.len()];
        self.transfer(&zeros, rx, timeout)
    }
}

/// GPIO lines shared with the co-processor.
///
/// The two input lines are also wired to interrupts; see
/// [`LinkSignals`](crate::LinkSignals) for the latched side of them.
pub trait LinkPins: Send {
    /// Drive the chip-select line. `true` selects the slave (line low).
    fn set_chip_select(&mut self, asserted: bool);

    /// Level of the "slave has data" notify line.
    fn data_ready(&self) -> bool;

    /// Level of the flow-control line (high when the slave can take a phase).
    fn flow_ready(&self) -> bool;

    /// Drive the co-processor reset line. `true` holds it in reset (line low).
    ///
    /// Boards without a wired reset line keep the default, which does nothing.
    fn set_reset(&mut self, _asserted: bool) {}
}

impl<T: SpiBus + ?Sized> SpiBus for Box<T> {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], timeout: Duration) -> Result<()> {
        (**self).transfer(tx, rx, timeout)
    }

    fn transmit(&mut self, tx: &[u8], timeout: Duration) -> Result<()> {
        (**self).transmit(tx, timeout)
    }

    fn receive(&mut self, rx: &mut [u8], timeout: Duration) -> Result<()> {
        (**self).receive(rx, timeout)
    }
}

impl<T: LinkPins + ?Sized> LinkPins for Box<T> {
    fn set_chip_select(&mut self, asserted: bool) {
        (**self).set_chip_select(asserted)
    }

    fn data_ready(&self) -> bool {
        (**self).data_ready()
    }

    fn flow_ready(&self) -> bool {
        (**self).flow_ready()
    }

    fn set_reset(&mut self, asserted: bool) {
        (**self).set_reset(asserted)
    }
}

/// Reject full-duplex buffers of different sizes.
pub fn check_duplex_lengths(tx: &[u8], rx: &[u8]) -> Result<()> {
    if tx.len() != rx.len() {
        return Err(TransportError::LengthMismatch {
            tx: tx.len(),
            rx: rx.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Loops every transmitted byte back inverted.
    struct InvertingBus {
        calls: usize,
    }

    impl SpiBus for InvertingBus {
        fn transfer(&mut self, tx: &[u8], rx: &mut [u8], _timeout: Duration) -> Result<()> {
            check_duplex_lengths(tx, rx)?;
            self.calls += 1;
            for (out, byte) in rx.iter_mut().zip(tx) {
                *out = !byte;
            }
            Ok(())
        }
    }

    #[test]
    fn receive_clocks_out_zeros() {
        let mut bus = InvertingBus { calls: 0 };
        let mut rx = [0u8; 4];
        bus.receive(&mut rx, Duration::from_millis(1)).unwrap();
        assert_eq!(rx, [0xFF; 4]);
        assert_eq!(bus.calls, 1);
    }

    #[test]
    fn transmit_discards_rx() {
        let mut bus = InvertingBus { calls: 0 };
        bus.transmit(&[1, 2, 3], Duration::from_millis(1)).unwrap();
        assert_eq!(bus.calls, 1);
    }

    #[test]
    fn boxed_bus_forwards() {
        let mut bus: Box<dyn SpiBus> = Box::new(InvertingBus { calls: 0 });
        let mut rx = [0u8; 1];
        bus.transfer(&[0x0F], &mut rx, Duration::from_millis(1)).unwrap();
        assert_eq!(rx, [0xF0]);
    }

    struct ResetOnlyPins {
        resets: Vec<bool>,
    }

    impl LinkPins for ResetOnlyPins {
        fn set_chip_select(&mut self, _asserted: bool) {}

        fn data_ready(&self) -> bool {
            false
        }

        fn flow_ready(&self) -> bool {
            false
        }

        fn set_reset(&mut self, asserted: bool) {
            self.resets.push(asserted);
        }
    }

    #[test]
    fn boxed_pins_forward_reset() {
        let mut pins: Box<ResetOnlyPins> = Box::new(ResetOnlyPins { resets: Vec::new() });
        LinkPins::set_reset(&mut pins, true);
        LinkPins::set_reset(&mut pins, false);
        assert_eq!(pins.resets, vec![true, false]);
    }

    #[test]
    fn mismatched_duplex_lengths_rejected() {
        let mut bus = InvertingBus { calls: 0 };
        let mut rx = [0u8; 2];
        let err = bus
            .transfer(&[1, 2, 3], &mut rx, Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(err, TransportError::LengthMismatch { tx: 3, rx: 2 }));
    }
}
