//! Modem handle: wires the link, the demultiplexer, the engine and the
//! workers together
//!
//! Four threads run per modem:
//! - **reader**: reads bursts from the link and feeds the demultiplexer
//! - **classifier**: turns unsolicited lines into state updates
//! - **scheduler**: runs queued operations one at a time
//! - **notifier**: delivers events to observers
//!
//! Observers run on the notifier thread only, so they may call back into
//! the driver without deadlocking the reader or the classifier.

use crate::channel_lock::ChannelLock;
use crate::classifier;
use crate::config::ModemConfig;
use crate::constants::{READ_BUFFER_SIZE, SERIAL_DISCONNECT_THRESHOLD};
use crate::demux::{DemuxOutput, StreamDemux};
use crate::engine::Engine;
use crate::error::{ModemError, Result};
use crate::events::{Event, EventBus};
use crate::protocol::{AtResponse, Command};
use crate::scheduler::{AsyncOperation, Pending, Scheduler};
use crate::sink::ResponseSink;
use crate::socket::{GprsSocket, Protocol, SocketTable};
use crate::state::{DeviceSnapshot, DeviceState};
use crate::transport::{Link, SerialLink};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

// =============================================================================
// Core
// =============================================================================

/// Everything the workers and the facility operations share
pub struct ModemCore {
    config: ModemConfig,
    link: Arc<dyn Link>,
    sink: Arc<ResponseSink>,
    engine: Engine,
    sockets: SocketTable,
    state: Arc<DeviceState>,
    bus: Arc<EventBus>,
    scheduler: Scheduler<ModemCore>,
}

impl ModemCore {
    pub fn new(link: Arc<dyn Link>, config: ModemConfig) -> Result<Self> {
        config.validate()?;

        let bus = Arc::new(EventBus::new());
        let state = Arc::new(DeviceState::new(bus.clone()));
        let sink = Arc::new(ResponseSink::new());
        let lock = Arc::new(ChannelLock::new());
        let engine = Engine::new(
            link.clone(),
            sink.clone(),
            lock.clone(),
            state.clone(),
            config.timeouts.command(),
        );

        Ok(Self {
            sockets: SocketTable::new(config.sockets.max_sockets),
            scheduler: Scheduler::new(lock),
            config,
            link,
            sink,
            engine,
            state,
            bus,
        })
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub fn link(&self) -> &dyn Link {
        self.link.as_ref()
    }

    pub fn sink(&self) -> &ResponseSink {
        &self.sink
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn sockets(&self) -> &SocketTable {
        &self.sockets
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &Scheduler<ModemCore> {
        &self.scheduler
    }

    /// A demultiplexer using the configured stall limits
    pub fn new_demux(&self) -> StreamDemux {
        StreamDemux::new(
            self.config.timeouts.payload_stall(),
            self.config.timeouts.socket_stall(),
        )
    }

    /// Route what the demultiplexer recognized
    ///
    /// Tokens go to the response sink and socket bytes to their socket's
    /// buffer. Bytes for a handle with no live socket are dropped.
    pub fn dispatch(&self, outputs: Vec<DemuxOutput>) {
        for output in outputs {
            match output {
                DemuxOutput::Token(token) => self.sink.push(token),
                DemuxOutput::SocketData { handle, data } => {
                    if !self.sockets.deliver(handle, &data) {
                        warn!(handle, len = data.len(), "socket data for unknown handle dropped");
                    }
                }
                DemuxOutput::SocketDataEnd { handle, complete } => {
                    if self.sockets.get(handle).is_some() {
                        debug!(handle, complete, "socket data received");
                        self.bus.publish(Event::SocketDataReceived { handle });
                    }
                }
            }
        }
    }
}

/// Reader thread body; returns on shutdown or when the link goes away
fn read_loop(core: &ModemCore, shutdown: &AtomicBool) {
    let link = core.link();
    let mut demux = core.new_demux();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut empty_reads = 0u32;

    while !shutdown.load(Ordering::Relaxed) {
        match link.read(&mut buf) {
            Ok(n) if n > 0 => {
                empty_reads = 0;
                let idle = link.bytes_to_read().map_or(true, |pending| pending == 0);
                core.dispatch(demux.feed(&buf[..n], Instant::now(), idle));
            }
            Ok(_) => {
                // Zero bytes read - could be normal or port gone
                empty_reads += 1;
                if empty_reads > SERIAL_DISCONNECT_THRESHOLD {
                    warn!(link = link.name(), "link disconnected");
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                empty_reads = 0;
            }
            Err(e) => {
                warn!(link = link.name(), error = %e, "link read failed");
                break;
            }
        }
        core.dispatch(demux.poll_stall(Instant::now()));
    }
    debug!("reader stopped");
}

// =============================================================================
// Modem
// =============================================================================

/// A running modem driver
///
/// # Example
///
/// ```ignore
/// let modem = Modem::open(config::load(Path::new("sim800.toml"))?)?;
/// modem.power_on().end()?;
/// let reply = modem.execute("AT+CSQ");
/// ```
pub struct Modem {
    core: Arc<ModemCore>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Modem {
    /// Open the configured serial port and start the driver
    pub fn open(config: ModemConfig) -> Result<Self> {
        if config.serial.port.is_empty() {
            return Err(ModemError::ConfigValidation {
                field: "serial.port",
                reason: "no serial port configured".into(),
            });
        }
        let link = SerialLink::open(&config.serial)?;
        Self::with_link(Arc::new(link), config)
    }

    /// Start the driver over an already opened link
    pub fn with_link(link: Arc<dyn Link>, config: ModemConfig) -> Result<Self> {
        let core = Arc::new(ModemCore::new(link, config)?);
        let dispatcher = core.bus().take_dispatcher().ok_or(ModemError::NotReady {
            reason: "event dispatcher already taken",
        })?;

        let mut modem = Self {
            core,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Vec::with_capacity(4),
        };
        // a failed spawn drops `modem`, which stops the threads already started
        modem.spawn("sim800-notifier", move |_, _| dispatcher.run())?;
        modem.spawn("sim800-reader", read_loop)?;
        modem.spawn("sim800-classifier", classifier::run)?;
        modem.spawn("sim800-scheduler", |core, shutdown| {
            core.scheduler().run(core, shutdown)
        })?;

        info!(link = modem.core.link().name(), "modem driver started");
        Ok(modem)
    }

    fn spawn<F>(&mut self, name: &'static str, body: F) -> Result<()>
    where
        F: FnOnce(&ModemCore, &AtomicBool) + Send + 'static,
    {
        let core = self.core.clone();
        let shutdown = self.shutdown.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(&core, &shutdown))
            .map_err(|source| ModemError::ThreadSpawn { name, source })?;
        self.workers.push(handle);
        Ok(())
    }

    pub fn core(&self) -> &Arc<ModemCore> {
        &self.core
    }

    pub fn engine(&self) -> &Engine {
        self.core.engine()
    }

    pub fn config(&self) -> &ModemConfig {
        self.core.config()
    }

    /// Run one transaction on the command channel
    pub fn send(&self, command: &Command) -> AtResponse {
        self.core.engine().send(command)
    }

    /// Send `text` with the default budget
    pub fn execute(&self, text: &str) -> AtResponse {
        self.core.engine().execute(text)
    }

    pub fn state(&self) -> DeviceSnapshot {
        self.core.state().snapshot()
    }

    /// Queue a closure on the scheduler
    pub fn schedule<T, F>(&self, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&ModemCore) -> Result<T> + Send + 'static,
    {
        self.core.scheduler().submit_fn(f)
    }

    /// Queue an operation on the scheduler
    pub fn submit<Op: AsyncOperation<ModemCore>>(&self, op: Op) -> Pending<Op::Output> {
        self.core.scheduler().submit(op)
    }

    /// Register an observer, called on the notifier thread
    pub fn subscribe(&self, observer: impl Fn(&Event) + Send + Sync + 'static) {
        self.core.bus().subscribe(observer);
    }

    /// A receiver for every event from now on
    pub fn events(&self) -> UnboundedReceiver<Event> {
        self.core.bus().channel()
    }

    /// Allocate a TCP socket on the lowest free handle
    pub fn new_socket(&self, ssl: bool) -> Result<GprsSocket> {
        GprsSocket::new(self.core.clone(), Protocol::Tcp, ssl)
    }

    /// Discard the socket table and start over with `max_sockets` slots
    pub fn set_max_sockets(&self, max_sockets: usize) -> Result<()> {
        self.core.sockets().resize(max_sockets)
    }

    /// Stop the workers and wait for them
    ///
    /// Queued operations that have not started fail with `NotReady`. An
    /// operation already running finishes its current transaction first.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shutdown.store(true, Ordering::SeqCst);
        self.core.bus().stop();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                warn!(thread = %name, "worker panicked");
            }
        }
        info!("modem driver stopped");
    }
}

impl Drop for Modem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
