use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use mxlink_frame::{LinkDriver, LinkSender, TransportPump, DEFAULT_MAX_PAYLOAD};
use mxlink_transport::{BufferAllocator, LinkPins, NetBuffer, SpiBus};
use tracing::{debug, trace, warn};

use crate::api;
use crate::correlator::{Correlator, MismatchPolicy};
use crate::dispatch::{Event, EventDispatcher};
use crate::error::{IpcError, Result};
use crate::events::register_default_handlers;
use crate::packet::{self, PacketHeader, PARAMS_OFFSET, PKT_MIN_SIZE, REQ_ID_NONE, REQ_ID_RESET};

/// Largest parameter block a request may carry: one link payload minus the IPC header.
pub const MAX_IPC_PARAMS: usize = DEFAULT_MAX_PAYLOAD - PKT_MIN_SIZE;

/// Configuration for an IPC session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handling of responses that match no pending request. Default: discard.
    pub mismatch_policy: MismatchPolicy,
    /// Events buffered for the handler thread before the oldest is dropped. Default: 32.
    pub event_queue_capacity: usize,
    /// Longest single link poll while a polled session waits. Default: 10 ms.
    pub poll_slice: Duration,
    /// Upper bound on request parameters. Default: [`MAX_IPC_PARAMS`].
    pub max_params: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mismatch_policy: MismatchPolicy::Discard,
            event_queue_capacity: 32,
            poll_slice: Duration::from_millis(10),
            max_params: MAX_IPC_PARAMS,
        }
    }
}

/// Where inbound packets go.
struct Router {
    correlator: Correlator,
    events: EventDispatcher,
}

impl Router {
    fn route(&self, mut buf: NetBuffer) {
        let header = match PacketHeader::parse(buf.payload()) {
            Ok(header) => header,
            Err(err) => {
                debug!(error = %err, "dropping inbound payload");
                return;
            }
        };
        trace!(
            req_id = header.req_id,
            api_id = format_args!("0x{:04x}", header.api_id),
            len = buf.len(),
            "inbound packet"
        );
        if self.correlator.is_faulted() {
            debug!(req_id = header.req_id, "session faulted, dropping inbound packet");
            return;
        }

        if header.is_response() {
            if let Err(err) = buf.hide_header(PARAMS_OFFSET) {
                warn!(error = %err, "malformed response");
                return;
            }
            let delivery = self.correlator.complete(header.req_id, buf.freeze());
            trace!(req_id = header.req_id, ?delivery, "response routed");
        } else {
            match Event::from_packet(header, buf) {
                Ok(event) => self.events.dispatch(event),
                Err(err) => warn!(error = %err, "malformed event"),
            }
        }
    }
}

/// Link access for sessions without a pump thread.
trait LinkPoll: Send {
    fn poll_link(&mut self, timeout: Duration) -> mxlink_frame::Result<Option<NetBuffer>>;
}

impl<B: SpiBus, P: LinkPins, A: BufferAllocator> LinkPoll for LinkDriver<B, P, A> {
    fn poll_link(&mut self, timeout: Duration) -> mxlink_frame::Result<Option<NetBuffer>> {
        self.poll_once(timeout)
    }
}

enum Engine {
    Pump(Mutex<Option<TransportPump>>),
    Polled(Mutex<Box<dyn LinkPoll>>),
}

/// An IPC session with one co-processor.
///
/// At most one request is outstanding at a time; concurrent callers queue on
/// the command lock. Unsolicited events go to the handlers registered on
/// [`events`](Self::events).
pub struct Session {
    router: Arc<Router>,
    sender: LinkSender,
    engine: Engine,
    command: Mutex<()>,
    next_req_id: AtomicU32,
    config: SessionConfig,
    closed: AtomicBool,
}

impl Session {
    /// Start a session whose link is driven by a dedicated pump thread.
    pub fn spawn<B, P, A>(driver: LinkDriver<B, P, A>, config: SessionConfig) -> Result<Self>
    where
        B: SpiBus + 'static,
        P: LinkPins + 'static,
        A: BufferAllocator + 'static,
    {
        let router = Arc::new(Router::new(&config)?);
        let sender = driver.sender();
        let pump = TransportPump::spawn(driver, {
            let router = Arc::clone(&router);
            move |buf| router.route(buf)
        })?;
        debug!(mode = "thread", "ipc session started");
        Ok(Self::assemble(router, sender, Engine::Pump(Mutex::new(Some(pump))), config))
    }

    /// Start a session that only touches the link from [`poll`](Self::poll)
    /// and while a request waits.
    pub fn polled<B, P, A>(driver: LinkDriver<B, P, A>, config: SessionConfig) -> Result<Self>
    where
        B: SpiBus + 'static,
        P: LinkPins + 'static,
        A: BufferAllocator + 'static,
    {
        let router = Arc::new(Router::new(&config)?);
        let sender = driver.sender();
        debug!(mode = "poll", "ipc session started");
        Ok(Self::assemble(
            router,
            sender,
            Engine::Polled(Mutex::new(Box::new(driver))),
            config,
        ))
    }

    fn assemble(
        router: Arc<Router>,
        sender: LinkSender,
        engine: Engine,
        config: SessionConfig,
    ) -> Self {
        Self {
            router,
            sender,
            engine,
            command: Mutex::new(()),
            next_req_id: AtomicU32::new(1),
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Largest parameter block [`request`](Self::request) accepts.
    pub fn max_params(&self) -> usize {
        self.config
            .max_params
            .min(self.sender.max_payload().saturating_sub(PKT_MIN_SIZE))
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.router.events
    }

    /// Why the session faulted, if it did.
    pub fn fault(&self) -> Option<String> {
        self.router.correlator.fault()
    }

    pub fn is_polled(&self) -> bool {
        matches!(self.engine, Engine::Polled(_))
    }

    /// Send a command and wait up to `timeout` for its response.
    ///
    /// Copies at most `out.len()` bytes of the response parameters into `out`
    /// and returns how many were copied.
    pub fn request(
        &self,
        api_id: u16,
        params: &[u8],
        out: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IpcError::Shutdown);
        }
        let max = self.max_params();
        if params.len() > max {
            return Err(IpcError::PayloadTooLarge {
                size: params.len(),
                max,
            });
        }

        let _command = lock(&self.command);
        let req_id = self.next_request_id();
        self.router.correlator.begin(req_id)?;
        debug!(
            req_id,
            api_id = format_args!("0x{api_id:04x}"),
            api = api::api_name(api_id).unwrap_or("unknown"),
            len = params.len(),
            "sending request"
        );

        if let Err(err) = self.sender.send(packet::encode(req_id, api_id, params)) {
            self.router.correlator.abandon(req_id);
            return Err(err.into());
        }

        let outcome = match &self.engine {
            Engine::Pump(_) => self.router.correlator.wait(req_id, timeout),
            Engine::Polled(driver) => self.wait_polled(driver, req_id, timeout),
        };

        match outcome {
            Ok(response) => {
                let copied = response.len().min(out.len());
                out[..copied].copy_from_slice(&response[..copied]);
                debug!(req_id, received = response.len(), copied, "request complete");
                Ok(copied)
            }
            Err(err) => {
                if self.sender.cancel().is_some() {
                    debug!(req_id, "withdrew request that never reached the bus");
                }
                warn!(
                    req_id,
                    api_id = format_args!("0x{api_id:04x}"),
                    error = %err,
                    "request failed"
                );
                Err(err)
            }
        }
    }

    /// Echo `input` through the co-processor.
    pub fn echo(&self, input: &[u8], out: &mut [u8], timeout: Duration) -> Result<usize> {
        self.request(api::SYS_ECHO_CMD, input, out, timeout)
    }

    /// Drive one receive attempt from the caller's context.
    ///
    /// Returns `true` if a packet was received. Sessions with a pump thread
    /// have nothing to poll and return `false` at once.
    pub fn poll(&self, timeout: Duration) -> Result<bool> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IpcError::Shutdown);
        }
        match &self.engine {
            Engine::Pump(_) => Ok(false),
            Engine::Polled(driver) => Ok(self.poll_link(driver, timeout)),
        }
    }

    /// Stop the pump and the event worker. Later calls fail with
    /// [`IpcError::Shutdown`].
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Engine::Pump(pump) = &self.engine {
            let pump = lock(pump).take();
            if let Some(mut pump) = pump {
                pump.shutdown();
            }
        }
        self.router.events.shutdown();
        debug!("ipc session stopped");
    }

    fn wait_polled(
        &self,
        driver: &Mutex<Box<dyn LinkPoll>>,
        req_id: u32,
        timeout: Duration,
    ) -> Result<bytes::Bytes> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.router.correlator.try_take(req_id) {
                return outcome;
            }
            let now = Instant::now();
            if now >= deadline {
                self.router.correlator.abandon(req_id);
                return Err(IpcError::Timeout(timeout));
            }
            self.poll_link(driver, (deadline - now).min(self.config.poll_slice));
        }
    }

    fn poll_link(&self, driver: &Mutex<Box<dyn LinkPoll>>, timeout: Duration) -> bool {
        let received = lock(driver).poll_link(timeout);
        match received {
            Ok(Some(buf)) => {
                self.router.route(buf);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(error = %err, "link transaction failed");
                false
            }
        }
    }

    fn next_request_id(&self) -> u32 {
        loop {
            let id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
            if id != REQ_ID_NONE && id != REQ_ID_RESET {
                return id;
            }
        }
    }
}

impl Router {
    fn new(config: &SessionConfig) -> Result<Self> {
        let events = EventDispatcher::spawn(config.event_queue_capacity)?;
        register_default_handlers(&events);
        Ok(Self {
            correlator: Correlator::new(config.mismatch_policy),
            events,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("polled", &self.is_polled())
            .field("pending", &self.router.correlator.pending())
            .field("faulted", &self.router.correlator.is_faulted())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(feature = "async")]
impl Session {
    /// [`request`](Self::request) on tokio's blocking pool.
    ///
    /// Returns at most `capacity` bytes of response parameters.
    pub async fn request_async(
        self: &Arc<Self>,
        api_id: u16,
        params: Vec<u8>,
        capacity: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let mut out = vec![0u8; capacity];
            let copied = session.request(api_id, &params, &mut out, timeout)?;
            out.truncate(copied);
            Ok(out)
        })
        .await
        .map_err(|err| IpcError::Join(err.to_string()))?
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
