use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use mxlink_transport::{BufferAllocator, LinkPins, LinkSignals, NetBuffer, SpiBus};
use tracing::{debug, warn};

use crate::driver::{LinkDriver, LinkSender};
use crate::error::{FrameError, Result};

/// Dedicated thread that owns the bus and runs a transaction whenever the
/// work signal is raised.
///
/// Every received payload is handed to the sink on the pump thread. Dropping
/// the pump shuts it down.
pub struct TransportPump {
    quit: Arc<AtomicBool>,
    signals: Arc<LinkSignals>,
    sender: LinkSender,
    handle: Option<JoinHandle<()>>,
}

impl TransportPump {
    pub fn spawn<B, P, A, F>(driver: LinkDriver<B, P, A>, sink: F) -> Result<Self>
    where
        B: SpiBus + 'static,
        P: LinkPins + 'static,
        A: BufferAllocator + 'static,
        F: FnMut(NetBuffer) + Send + 'static,
    {
        let quit = Arc::new(AtomicBool::new(false));
        let signals = Arc::clone(driver.signals());
        let sender = driver.sender();

        let handle = thread::Builder::new()
            .name("mxlink-pump".to_string())
            .spawn({
                let quit = Arc::clone(&quit);
                move || pump_loop(driver, &quit, sink)
            })
            .map_err(FrameError::Spawn)?;

        Ok(Self {
            quit,
            signals,
            sender,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> LinkSender {
        self.sender.clone()
    }

    /// Queue `payload` for the next transaction.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        if !self.is_running() {
            return Err(FrameError::Shutdown);
        }
        self.sender.send(payload)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.quit.load(Ordering::Acquire)
    }

    /// Stop the pump and wait for its thread to exit.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.quit.store(true, Ordering::Release);
        self.signals.work.raise();
        if handle.join().is_err() {
            warn!("transport pump thread panicked");
        }
    }
}

impl Drop for TransportPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pump_loop<B, P, A, F>(mut driver: LinkDriver<B, P, A>, quit: &AtomicBool, mut sink: F)
where
    B: SpiBus,
    P: LinkPins,
    A: BufferAllocator,
    F: FnMut(NetBuffer),
{
    debug!("transport pump started");
    loop {
        if !driver.ensure_rx_buffer(|| quit.load(Ordering::Acquire)) {
            break;
        }
        driver.signals().work.wait();
        if quit.load(Ordering::Acquire) {
            break;
        }
        match driver.run_once() {
            Ok(Some(buf)) => sink(buf),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "link transaction failed"),
        }
    }
    debug!("transport pump stopped");
}
