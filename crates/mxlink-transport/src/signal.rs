use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

/// Level-latched binary signal.
///
/// Raising an already raised signal is a no-op: the waiter only cares whether
/// there is work, not how many times it was announced. A successful wait
/// consumes the latch.
#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub const fn new() -> Self {
        Self {
            raised: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Latch the signal and wake one waiter.
    ///
    /// Returns `false` if it was already latched.
    pub fn raise(&self) -> bool {
        let mut raised = lock(&self.raised);
        let fresh = !*raised;
        *raised = true;
        drop(raised);
        self.cond.notify_one();
        fresh
    }

    /// Block until the signal is raised, then consume it.
    pub fn wait(&self) {
        let raised = lock(&self.raised);
        let mut raised = self
            .cond
            .wait_while(raised, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        *raised = false;
    }

    /// Block for at most `timeout`. Returns `true` if the signal was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let raised = lock(&self.raised);
        let (mut raised, _) = self
            .cond
            .wait_timeout_while(raised, timeout, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        let consumed = *raised;
        *raised = false;
        consumed
    }

    /// Drop a pending latch without waiting.
    pub fn clear(&self) {
        *lock(&self.raised) = false;
    }

    pub fn is_raised(&self) -> bool {
        *lock(&self.raised)
    }
}

/// Interrupt sources wired from the co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqLine {
    /// Notify line: the slave has data queued.
    DataReady,
    /// Flow-control line rose: the slave is ready for the next phase.
    Flow,
}

/// The two signals the link layer blocks on.
///
/// `work` is raised by the data-ready interrupt and by the send path;
/// `flow` is raised only by the flow-control interrupt.
#[derive(Debug, Default)]
pub struct LinkSignals {
    pub work: Signal,
    pub flow: Signal,
}

impl LinkSignals {
    pub const fn new() -> Self {
        Self {
            work: Signal::new(),
            flow: Signal::new(),
        }
    }

    /// Interrupt entry point: latch the signal matching `line`.
    pub fn raise(&self, line: IrqLine) {
        trace!(?line, "irq");
        match line {
            IrqLine::DataReady => {
                self.work.raise();
            }
            IrqLine::Flow => {
                self.flow.raise();
            }
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    #[test]
    fn raise_is_latched_not_counted() {
        let signal = Signal::new();
        assert!(signal.raise());
        assert!(!signal.raise());
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn wait_timeout_expires() {
        let signal = Signal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_wakes_on_raise_from_other_thread() {
        let signal = Arc::new(Signal::new());
        let raiser = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                signal.raise();
            })
        };
        signal.wait();
        assert!(!signal.is_raised());
        raiser.join().unwrap();
    }

    #[test]
    fn clear_drops_latch() {
        let signal = Signal::new();
        signal.raise();
        signal.clear();
        assert!(!signal.is_raised());
    }

    #[test]
    fn irq_lines_are_independent() {
        let signals = LinkSignals::new();
        signals.raise(IrqLine::Flow);
        assert!(signals.flow.is_raised());
        assert!(!signals.work.is_raised());

        signals.raise(IrqLine::DataReady);
        assert!(signals.work.is_raised());
    }
}
