use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use mxlink_transport::NetBuffer;
use tracing::{debug, trace, warn};

use crate::error::{IpcError, Result};
use crate::packet::{PacketHeader, PARAMS_OFFSET};

/// An unsolicited packet from the co-processor.
///
/// Owns the receive buffer; the IPC header is already hidden so
/// [`params`](Self::params) starts at the event parameters. Dropping the event
/// frees the buffer.
#[derive(Debug)]
pub struct Event {
    header: PacketHeader,
    buf: NetBuffer,
}

impl Event {
    /// Wrap a received packet, hiding its IPC header.
    pub fn from_packet(header: PacketHeader, mut buf: NetBuffer) -> Result<Self> {
        buf.hide_header(PARAMS_OFFSET)?;
        Ok(Self { header, buf })
    }

    pub fn api_id(&self) -> u16 {
        self.header.api_id
    }

    pub fn req_id(&self) -> u32 {
        self.header.req_id
    }

    pub fn params(&self) -> &[u8] {
        self.buf.payload()
    }

    pub fn into_buffer(self) -> NetBuffer {
        self.buf
    }
}

type Handler = Arc<Mutex<Box<dyn FnMut(Event) + Send>>>;

#[derive(Default)]
struct Queue {
    events: VecDeque<Event>,
    closed: bool,
}

struct Shared {
    handlers: Mutex<HashMap<u16, Handler>>,
    queue: Mutex<Queue>,
    ready: Condvar,
    capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
    unknown: AtomicU64,
}

/// Routes events to handlers registered per api id.
///
/// Handlers run on a dedicated worker thread behind a bounded queue; when the
/// queue is full the oldest event is dropped. Events for api ids with no
/// handler are dropped on arrival.
pub struct EventDispatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    pub fn spawn(capacity: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            handlers: Mutex::new(HashMap::new()),
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
            capacity: capacity.max(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
        });
        let worker = thread::Builder::new()
            .name("mxlink-events".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || worker_loop(&shared)
            })
            .map_err(|source| IpcError::Spawn {
                name: "event worker",
                source,
            })?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Install `handler` for `api_id`, replacing any previous one.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn register<F>(&self, api_id: u16, handler: F) -> bool
    where
        F: FnMut(Event) + Send + 'static,
    {
        let handler: Handler = Arc::new(Mutex::new(Box::new(handler)));
        let replaced = lock(&self.shared.handlers)
            .insert(api_id, handler)
            .is_some();
        debug!(api_id = format_args!("0x{api_id:04x}"), replaced, "event handler registered");
        replaced
    }

    pub fn unregister(&self, api_id: u16) -> bool {
        lock(&self.shared.handlers).remove(&api_id).is_some()
    }

    pub fn is_registered(&self, api_id: u16) -> bool {
        lock(&self.shared.handlers).contains_key(&api_id)
    }

    /// Queue `event` for its handler.
    pub fn dispatch(&self, event: Event) {
        let api_id = event.api_id();
        if !self.is_registered(api_id) {
            self.shared.unknown.fetch_add(1, Ordering::Relaxed);
            warn!(api_id = format_args!("0x{api_id:04x}"), "dropping unknown event");
            return;
        }

        let mut queue = lock(&self.shared.queue);
        if queue.closed {
            debug!(api_id = format_args!("0x{api_id:04x}"), "dispatcher closed, dropping event");
            return;
        }
        if queue.events.len() >= self.shared.capacity {
            if let Some(oldest) = queue.events.pop_front() {
                let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    dropped_api_id = format_args!("0x{:04x}", oldest.api_id()),
                    total_dropped = total,
                    "event queue full, dropping oldest event"
                );
            }
        }
        queue.events.push_back(event);
        drop(queue);
        self.shared.ready.notify_one();
    }

    /// Events handed to a handler so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Events dropped because no handler was registered.
    pub fn unknown(&self) -> u64 {
        self.shared.unknown.load(Ordering::Relaxed)
    }

    /// Deliver what is queued, then stop the worker.
    pub fn shutdown(&self) {
        lock(&self.shared.queue).closed = true;
        self.shared.ready.notify_all();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("event worker thread panicked");
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("capacity", &self.shared.capacity)
            .field("delivered", &self.delivered())
            .field("dropped", &self.dropped())
            .finish()
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let event = {
            let queue = lock(&shared.queue);
            let mut queue = shared
                .ready
                .wait_while(queue, |queue| queue.events.is_empty() && !queue.closed)
                .unwrap_or_else(PoisonError::into_inner);
            match queue.events.pop_front() {
                Some(event) => event,
                None => break,
            }
        };

        let api_id = event.api_id();
        let handler = lock(&shared.handlers).get(&api_id).cloned();
        match handler {
            Some(handler) => {
                trace!(api_id = format_args!("0x{api_id:04x}"), "delivering event");
                let mut handler = lock(&handler);
                (handler.as_mut())(event);
                shared.delivered.fetch_add(1, Ordering::Relaxed);
            }
            None => debug!(
                api_id = format_args!("0x{api_id:04x}"),
                "handler removed before delivery, dropping event"
            ),
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
