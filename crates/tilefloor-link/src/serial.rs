//! Serial transport: one session per named port, blocking I/O on dedicated
//! threads.
//!
//! Ports are opened through the injectable [`SerialPortFactory`] seam so the
//! whole link can run against the in-memory [`loopback_pair`] in tests; the
//! shipping implementation is [`SystemPortFactory`] over the `serialport`
//! crate (8N1, no flow control, short read timeout).
//!
//! Serial open failures are terminal for that port's session: they are
//! logged and the session exits without retrying. A cable that is missing at
//! startup stays dark until the grid is reconfigured.
//!
//! The read loop runs on a blocking thread; the port's read timeout doubles
//! as the cancellation check point, so teardown completes within one timeout
//! tick.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use tilefloor_core::{
    ChainTarget, FrameSource, ResolvedGrid, SensorSource, StreamMessageReader, RGB_HEADER,
};

use crate::contract::{
    GameLink, HardwareLink, PixelEvent, SensorEvent, TransportError, EVENT_CHANNEL_CAPACITY,
};
use crate::dispatch::InboundState;
use crate::session::{SessionContext, SessionKey, SessionRegistry};

/// Read timeout for real ports; also the upper bound on cancellation lag.
const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Pause after a read error so a dead port cannot spin the thread.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Default baud rate, matching the tile controllers' UART configuration.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// A bidirectional serial connection. Reads return `Ok(0)` on timeout so the
/// read loop can poll its cancellation flag.
pub trait SerialConnection: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    /// A second handle to the same port, used for the write path while the
    /// read loop owns the original.
    fn try_clone(&self) -> io::Result<Box<dyn SerialConnection>>;
}

/// Opens serial connections by port name. Injectable so tests can supply the
/// loopback implementation.
pub trait SerialPortFactory: Send + Sync {
    fn open(&self, port: &str) -> Result<Box<dyn SerialConnection>, TransportError>;
}

// ── System ports ──────────────────────────────────────────────────────────────

/// Factory over real serial ports via the `serialport` crate.
pub struct SystemPortFactory {
    pub baud_rate: u32,
}

impl Default for SystemPortFactory {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl SerialPortFactory for SystemPortFactory {
    fn open(&self, port: &str) -> Result<Box<dyn SerialConnection>, TransportError> {
        let inner = serialport::new(port, self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|source| TransportError::Open {
                port: port.to_string(),
                source,
            })?;
        Ok(Box::new(SystemPort(inner)))
    }
}

struct SystemPort(Box<dyn serialport::SerialPort>);

impl SerialConnection for SystemPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match io::Read::read(&mut self.0, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.0, data)
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialConnection>> {
        let clone = self.0.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SystemPort(clone)))
    }
}

// ── Loopback ports ────────────────────────────────────────────────────────────

/// One direction of the in-memory wire.
#[derive(Default)]
struct Wire {
    bytes: StdMutex<Vec<u8>>,
}

impl Wire {
    fn push(&self, data: &[u8]) {
        self.bytes.lock().expect("lock poisoned").extend_from_slice(data);
    }

    fn pop(&self, buf: &mut [u8]) -> usize {
        let mut bytes = self.bytes.lock().expect("lock poisoned");
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        bytes.drain(..n);
        n
    }
}

/// Serial factory backed by an in-memory crossed wire pair; see
/// [`loopback_pair`].
pub struct LoopbackFactory {
    outbound: Arc<Wire>,
    inbound: Arc<Wire>,
}

/// Creates two factories wired back to back: whatever one side writes, the
/// other side reads, regardless of the port names the links open. Lets a
/// game link and a hardware link run end to end without hardware.
pub fn loopback_pair() -> (LoopbackFactory, LoopbackFactory) {
    let a_to_b = Arc::new(Wire::default());
    let b_to_a = Arc::new(Wire::default());
    (
        LoopbackFactory {
            outbound: Arc::clone(&a_to_b),
            inbound: Arc::clone(&b_to_a),
        },
        LoopbackFactory {
            outbound: b_to_a,
            inbound: a_to_b,
        },
    )
}

impl SerialPortFactory for LoopbackFactory {
    fn open(&self, _port: &str) -> Result<Box<dyn SerialConnection>, TransportError> {
        Ok(Box::new(LoopbackPort {
            outbound: Arc::clone(&self.outbound),
            inbound: Arc::clone(&self.inbound),
        }))
    }
}

struct LoopbackPort {
    outbound: Arc<Wire>,
    inbound: Arc<Wire>,
}

impl SerialConnection for LoopbackPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inbound.pop(buf);
        if n == 0 {
            // Emulate the port read timeout so the loop stays paced.
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.outbound.push(data);
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialConnection>> {
        Ok(Box::new(LoopbackPort {
            outbound: Arc::clone(&self.outbound),
            inbound: Arc::clone(&self.inbound),
        }))
    }
}

// ── Shared session plumbing ───────────────────────────────────────────────────

/// Write handle shared between a session's read thread (which installs it)
/// and the push paths.
type SerialWriter = Arc<StdMutex<Option<Box<dyn SerialConnection>>>>;

/// Drives a port until cancellation, feeding reads through the framing
/// parser.
fn read_loop(
    mut port: Box<dyn SerialConnection>,
    mut reader: StreamMessageReader,
    cancel: watch::Receiver<bool>,
    mut on_message: impl FnMut(&[u8]),
) {
    let mut buf = [0u8; 512];
    loop {
        if *cancel.borrow() {
            return;
        }
        match port.read(&mut buf) {
            // Timeout tick: nothing arrived, re-check cancellation.
            Ok(0) => continue,
            Ok(n) => reader.feed(&buf[..n], &mut on_message),
            Err(e) => {
                warn!("serial read error: {e}");
                std::thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }
}

/// Opens the port and hands a cloned writer to the write path. `None` means
/// the session is permanently disabled (open failures are not retried).
fn open_session_port(
    factory: &dyn SerialPortFactory,
    port_name: &str,
    writer: &SerialWriter,
    context: &SessionContext,
) -> Option<Box<dyn SerialConnection>> {
    let port = match factory.open(port_name) {
        Ok(port) => port,
        Err(e) => {
            error!("serial port {port_name} unusable, chain stays dark: {e}");
            return None;
        }
    };
    match port.try_clone() {
        Ok(write_half) => *writer.lock().expect("lock poisoned") = Some(write_half),
        Err(e) => {
            error!("serial port {port_name} write handle failed: {e}");
            return None;
        }
    }
    context.connected.store(true, Ordering::Release);
    info!("serial port {port_name} open");
    Some(port)
}

/// The serial chain keys referenced by a grid, in chain order.
fn wanted_sessions(grid: &ResolvedGrid) -> Vec<(SessionKey, usize)> {
    grid.chains()
        .iter()
        .enumerate()
        .filter_map(|(index, chain)| match chain.target() {
            ChainTarget::Serial(name) => Some((SessionKey::Port(name.clone()), index)),
            ChainTarget::Network(_) => None,
        })
        .collect()
}

fn ensure_serial(grid: &ResolvedGrid) -> Result<(), TransportError> {
    if grid.is_serial() {
        Ok(())
    } else {
        Err(TransportError::WrongTarget { expected: "serial" })
    }
}

// ── Game side ─────────────────────────────────────────────────────────────────

/// Game-side serial link: RGB frames out to the tiles, sensor readings in.
pub struct SerialGameLink {
    grid: Arc<ResolvedGrid>,
    factory: Arc<dyn SerialPortFactory>,
    registry: SessionRegistry<SerialWriter>,
    events_tx: mpsc::Sender<SensorEvent>,
}

impl SerialGameLink {
    /// Opens one session per serial chain. Individual port-open failures do
    /// not fail construction; those chains simply stay dark (and veto
    /// [`GameLink::all_connected`]).
    pub async fn open(
        grid: Arc<ResolvedGrid>,
        factory: Arc<dyn SerialPortFactory>,
    ) -> Result<(Self, mpsc::Receiver<SensorEvent>), TransportError> {
        ensure_serial(&grid)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut link = Self {
            grid,
            factory,
            registry: SessionRegistry::new(),
            events_tx,
        };
        link.sync_sessions().await;
        Ok((link, events_rx))
    }

    async fn sync_sessions(&mut self) {
        let wanted = wanted_sessions(&self.grid);
        let grid = &self.grid;
        let factory = &self.factory;
        let events = &self.events_tx;
        self.registry
            .sync(&wanted, |key, chain_index, context| {
                let writer: SerialWriter = Arc::new(StdMutex::new(None));
                let port_name = key.to_string();
                let grid = Arc::clone(grid);
                let factory = Arc::clone(factory);
                let events = events.clone();
                let task_writer = Arc::clone(&writer);
                let task = tokio::task::spawn_blocking(move || {
                    run_game_session(port_name, chain_index, grid, factory, task_writer, context, events);
                });
                (writer, task)
            })
            .await;
    }
}

fn run_game_session(
    port_name: String,
    chain_index: usize,
    grid: Arc<ResolvedGrid>,
    factory: Arc<dyn SerialPortFactory>,
    writer: SerialWriter,
    context: SessionContext,
    events: mpsc::Sender<SensorEvent>,
) {
    let Some(chain) = grid.chains().get(chain_index) else {
        return;
    };
    let Some(port) = open_session_port(factory.as_ref(), &port_name, &writer, &context) else {
        return;
    };
    let reader = StreamMessageReader::new(chain.sensor_header(), chain.sensor_message_len());
    let mut inbound = InboundState::new(Arc::clone(&grid), chain_index);
    read_loop(port, reader, context.cancel.clone(), |message| {
        for event in inbound.apply_sensor_message(message) {
            if let Err(e) = events.try_send(event) {
                debug!("sensor event dropped: {e}");
            }
        }
    });
}

#[async_trait::async_trait]
impl GameLink for SerialGameLink {
    async fn push_frame(&self, source: &(dyn FrameSource + Sync)) {
        let mut writes = Vec::new();
        for (index, chain) in self.grid.chains().iter().enumerate() {
            let ChainTarget::Serial(name) = chain.target() else {
                continue;
            };
            let Some(session) = self.registry.get(&SessionKey::Port(name.clone())) else {
                continue;
            };
            let Some(permit) = session.gate().try_begin() else {
                debug!("chain {index} write in flight, frame dropped");
                continue;
            };
            let frame = chain.encode_rgb_frame(source);
            let writer = Arc::clone(&session.handle);
            writes.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let mut guard = writer.lock().expect("lock poisoned");
                if let Some(port) = guard.as_mut() {
                    if let Err(e) = port.write_all(&frame) {
                        warn!("serial frame write failed: {e}");
                    }
                }
            }));
        }
        for write in writes {
            let _ = write.await;
        }
    }

    fn all_connected(&self) -> bool {
        self.registry.all_connected()
    }

    async fn update_grid(&mut self, grid: Arc<ResolvedGrid>) -> Result<(), TransportError> {
        ensure_serial(&grid)?;
        self.grid = grid;
        self.sync_sessions().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.registry.shutdown().await;
    }
}

// ── Hardware side ─────────────────────────────────────────────────────────────

/// Hardware-/emulator-side serial link: sensor readings out, RGB frames in.
pub struct SerialHardwareLink {
    grid: Arc<ResolvedGrid>,
    factory: Arc<dyn SerialPortFactory>,
    registry: SessionRegistry<SerialWriter>,
    events_tx: mpsc::Sender<PixelEvent>,
}

impl SerialHardwareLink {
    /// Opens one session per serial chain; see [`SerialGameLink::open`] for
    /// the failure policy.
    pub async fn open(
        grid: Arc<ResolvedGrid>,
        factory: Arc<dyn SerialPortFactory>,
    ) -> Result<(Self, mpsc::Receiver<PixelEvent>), TransportError> {
        ensure_serial(&grid)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut link = Self {
            grid,
            factory,
            registry: SessionRegistry::new(),
            events_tx,
        };
        link.sync_sessions().await;
        Ok((link, events_rx))
    }

    async fn sync_sessions(&mut self) {
        let wanted = wanted_sessions(&self.grid);
        let grid = &self.grid;
        let factory = &self.factory;
        let events = &self.events_tx;
        self.registry
            .sync(&wanted, |key, chain_index, context| {
                let writer: SerialWriter = Arc::new(StdMutex::new(None));
                let port_name = key.to_string();
                let grid = Arc::clone(grid);
                let factory = Arc::clone(factory);
                let events = events.clone();
                let task_writer = Arc::clone(&writer);
                let task = tokio::task::spawn_blocking(move || {
                    run_hardware_session(
                        port_name,
                        chain_index,
                        grid,
                        factory,
                        task_writer,
                        context,
                        events,
                    );
                });
                (writer, task)
            })
            .await;
    }
}

fn run_hardware_session(
    port_name: String,
    chain_index: usize,
    grid: Arc<ResolvedGrid>,
    factory: Arc<dyn SerialPortFactory>,
    writer: SerialWriter,
    context: SessionContext,
    events: mpsc::Sender<PixelEvent>,
) {
    let Some(chain) = grid.chains().get(chain_index) else {
        return;
    };
    let Some(port) = open_session_port(factory.as_ref(), &port_name, &writer, &context) else {
        return;
    };
    let reader = StreamMessageReader::new(RGB_HEADER, chain.rgb_message_len());
    let mut inbound = InboundState::new(Arc::clone(&grid), chain_index);
    read_loop(port, reader, context.cancel.clone(), |message| {
        for event in inbound.apply_rgb_message(message) {
            if let Err(e) = events.try_send(event) {
                debug!("pixel event dropped: {e}");
            }
        }
    });
}

#[async_trait::async_trait]
impl HardwareLink for SerialHardwareLink {
    async fn push_sensor_data(&self, source: &(dyn SensorSource + Sync)) {
        let mut writes = Vec::new();
        for (index, chain) in self.grid.chains().iter().enumerate() {
            let ChainTarget::Serial(name) = chain.target() else {
                continue;
            };
            let Some(session) = self.registry.get(&SessionKey::Port(name.clone())) else {
                continue;
            };
            let Some(permit) = session.gate().try_begin() else {
                debug!("chain {index} write in flight, sensor data dropped");
                continue;
            };
            let frame = chain.encode_sensor_frame(source);
            let writer = Arc::clone(&session.handle);
            writes.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let mut guard = writer.lock().expect("lock poisoned");
                if let Some(port) = guard.as_mut() {
                    if let Err(e) = port.write_all(&frame) {
                        warn!("serial sensor write failed: {e}");
                    }
                }
            }));
        }
        for write in writes {
            let _ = write.await;
        }
    }

    async fn update_grid(&mut self, grid: Arc<ResolvedGrid>) -> Result<(), TransportError> {
        ensure_serial(&grid)?;
        self.grid = grid;
        self.sync_sessions().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.registry.shutdown().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
