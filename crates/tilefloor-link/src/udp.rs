//! UDP transport: connectionless on both sides.
//!
//! The game side shares one bound socket across all chains: frames go out
//! with `send_to`, inbound datagrams are demultiplexed by exact sender
//! address against the chain endpoints. Datagrams from unknown senders are
//! logged and dropped; datagrams whose header or length does not match the
//! chain are dropped silently — on a connectionless line, noise is not an
//! error.
//!
//! The hardware side binds one socket per chain output port and replies to
//! the most recent peer a valid frame arrived from. Sending to a peer that
//! is currently unreachable must never poison a later receive, so the
//! receive loops treat connection-reset style errors as transient line
//! noise: logged at debug level, loop continues.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tilefloor_core::{
    ChainTarget, FrameSource, ResolvedGrid, SensorSource, RGB_HEADER,
};

use crate::contract::{
    GameLink, HardwareLink, PixelEvent, SensorEvent, TransportError, EVENT_CHANNEL_CAPACITY,
};
use crate::dispatch::InboundState;
use crate::session::{cancelled, SessionContext, SessionKey, SessionRegistry, WriteGate};

/// `true` for receive errors caused by a previous send to an unreachable
/// peer. The OS reports these on some platforms; they must never end a
/// receive loop.
fn is_transient_recv_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

fn ensure_network(grid: &ResolvedGrid) -> Result<(), TransportError> {
    if grid.chains().is_empty() || !grid.is_serial() {
        Ok(())
    } else {
        Err(TransportError::WrongTarget { expected: "network" })
    }
}

// ── Game side ─────────────────────────────────────────────────────────────────

/// Game-side UDP link: one socket for all chains, frames out, sensor
/// readings in.
pub struct UdpGameLink {
    grid: Arc<ResolvedGrid>,
    local_addr: SocketAddr,
    registry: SessionRegistry<Arc<UdpSocket>>,
    /// Per-chain write gates; the chains share one socket but back-pressure
    /// stays per chain.
    gates: Vec<WriteGate>,
    events_tx: mpsc::Sender<SensorEvent>,
}

impl UdpGameLink {
    /// Binds the shared socket on `local_addr` and starts the receive
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the socket cannot be bound.
    pub async fn bind(
        grid: Arc<ResolvedGrid>,
        local_addr: SocketAddr,
    ) -> Result<(Self, mpsc::Receiver<SensorEvent>), TransportError> {
        ensure_network(&grid)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut link = Self {
            gates: (0..grid.chains().len()).map(|_| WriteGate::new()).collect(),
            grid,
            local_addr,
            registry: SessionRegistry::new(),
            events_tx,
        };
        link.sync_sessions().await?;
        Ok((link, events_rx))
    }

    async fn sync_sessions(&mut self) -> Result<(), TransportError> {
        let key = SessionKey::Endpoint(self.local_addr);
        let wanted = [(key.clone(), 0)];

        let mut pending = None;
        if !self.registry.contains(&key) {
            let socket = UdpSocket::bind(self.local_addr)
                .await
                .map_err(|source| TransportError::Bind {
                    addr: self.local_addr,
                    source,
                })?;
            pending = Some(Arc::new(socket));
        }

        let grid = &self.grid;
        let events = &self.events_tx;
        self.registry
            .sync(&wanted, |_key, _chain_index, context| {
                let socket = pending.take().expect("socket prebound for the new session");
                let task_socket = Arc::clone(&socket);
                let grid = Arc::clone(grid);
                let events = events.clone();
                let task = tokio::spawn(async move {
                    run_game_socket(task_socket, grid, context, events).await;
                });
                (socket, task)
            })
            .await;
        Ok(())
    }
}

/// Receive loop of the shared game-side socket.
async fn run_game_socket(
    socket: Arc<UdpSocket>,
    grid: Arc<ResolvedGrid>,
    context: SessionContext,
    events: mpsc::Sender<SensorEvent>,
) {
    // Connectionless: ready the moment the socket is bound.
    context.connected.store(true, Ordering::Release);

    // Sender address → chain index, captured once at session start.
    let mut demux: HashMap<SocketAddr, usize> = HashMap::new();
    for (index, chain) in grid.chains().iter().enumerate() {
        if let ChainTarget::Network(addr) = chain.target() {
            demux.entry(*addr).or_insert(index);
        }
    }
    let mut states: HashMap<usize, InboundState> = HashMap::new();

    let mut cancel = context.cancel;
    let mut buf = [0u8; 4096];
    loop {
        let received = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            result = socket.recv_from(&mut buf) => result,
        };
        match received {
            Ok((len, src)) => {
                let Some(&chain_index) = demux.get(&src) else {
                    debug!("datagram from unknown sender {src}, dropped");
                    continue;
                };
                let chain = &grid.chains()[chain_index];
                let datagram = &buf[..len];
                // Malformed datagrams are dropped without a word.
                if len != chain.sensor_message_len() || datagram[..2] != chain.sensor_header() {
                    continue;
                }
                let state = states
                    .entry(chain_index)
                    .or_insert_with(|| InboundState::new(Arc::clone(&grid), chain_index));
                for event in state.apply_sensor_message(datagram) {
                    if let Err(e) = events.try_send(event) {
                        debug!("sensor event dropped: {e}");
                    }
                }
            }
            Err(e) if is_transient_recv_error(&e) => {
                debug!("transient receive error, ignored: {e}");
            }
            Err(e) => warn!("udp receive error: {e}"),
        }
    }
}

#[async_trait::async_trait]
impl GameLink for UdpGameLink {
    async fn push_frame(&self, source: &(dyn FrameSource + Sync)) {
        let Some(session) = self.registry.get(&SessionKey::Endpoint(self.local_addr)) else {
            return;
        };
        let mut writes = Vec::new();
        for (index, chain) in self.grid.chains().iter().enumerate() {
            let ChainTarget::Network(addr) = chain.target() else {
                continue;
            };
            let Some(gate) = self.gates.get(index) else {
                continue;
            };
            let Some(permit) = gate.try_begin() else {
                debug!("chain {index} write in flight, frame dropped");
                continue;
            };
            let frame = chain.encode_rgb_frame(source);
            let socket = Arc::clone(&session.handle);
            let addr = *addr;
            writes.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = socket.send_to(&frame, addr).await {
                    warn!("frame send to {addr} failed: {e}");
                }
            }));
        }
        for write in writes {
            let _ = write.await;
        }
    }

    fn all_connected(&self) -> bool {
        // Connectionless: ready from the moment the socket exists.
        !self.registry.is_empty()
    }

    async fn update_grid(&mut self, grid: Arc<ResolvedGrid>) -> Result<(), TransportError> {
        ensure_network(&grid)?;
        self.gates = (0..grid.chains().len()).map(|_| WriteGate::new()).collect();
        self.grid = grid;
        self.sync_sessions().await
    }

    async fn shutdown(&mut self) {
        self.registry.shutdown().await;
    }
}

// ── Hardware side ─────────────────────────────────────────────────────────────

/// Write handle of a hardware-side session: the bound socket plus the most
/// recent peer a valid frame arrived from.
type UdpPeerHandle = (Arc<UdpSocket>, Arc<StdMutex<Option<SocketAddr>>>);

/// Hardware-/emulator-side UDP link: one socket per chain output port,
/// sensor readings out, frames in.
pub struct UdpHardwareLink {
    grid: Arc<ResolvedGrid>,
    registry: SessionRegistry<UdpPeerHandle>,
    events_tx: mpsc::Sender<PixelEvent>,
}

impl UdpHardwareLink {
    /// Binds every chain's socket and starts the receive sessions.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] as soon as any socket fails to bind.
    pub async fn bind(
        grid: Arc<ResolvedGrid>,
    ) -> Result<(Self, mpsc::Receiver<PixelEvent>), TransportError> {
        ensure_network(&grid)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut link = Self {
            grid,
            registry: SessionRegistry::new(),
            events_tx,
        };
        if let Err(e) = link.sync_sessions().await {
            link.registry.shutdown().await;
            return Err(e);
        }
        Ok((link, events_rx))
    }

    /// One socket per distinct port across the chain endpoints.
    fn wanted_sessions(grid: &ResolvedGrid) -> Vec<(SessionKey, usize)> {
        let mut seen = std::collections::HashSet::new();
        grid.chains()
            .iter()
            .enumerate()
            .filter_map(|(index, chain)| {
                let ChainTarget::Network(addr) = chain.target() else {
                    return None;
                };
                seen.insert(addr.port())
                    .then(|| (SessionKey::Endpoint(receive_addr(addr.port())), index))
            })
            .collect()
    }

    async fn sync_sessions(&mut self) -> Result<(), TransportError> {
        let wanted = Self::wanted_sessions(&self.grid);

        let mut pending: HashMap<SessionKey, Arc<UdpSocket>> = HashMap::new();
        for (key, _) in &wanted {
            if self.registry.contains(key) {
                continue;
            }
            let SessionKey::Endpoint(addr) = key else {
                continue;
            };
            let socket = UdpSocket::bind(addr)
                .await
                .map_err(|source| TransportError::Bind { addr: *addr, source })?;
            pending.insert(key.clone(), Arc::new(socket));
        }

        let grid = &self.grid;
        let events = &self.events_tx;
        self.registry
            .sync(&wanted, |key, chain_index, context| {
                let socket = pending
                    .remove(key)
                    .expect("socket prebound for every new session");
                let peer: Arc<StdMutex<Option<SocketAddr>>> = Arc::new(StdMutex::new(None));
                let task_socket = Arc::clone(&socket);
                let task_peer = Arc::clone(&peer);
                let grid = Arc::clone(grid);
                let events = events.clone();
                let task = tokio::spawn(async move {
                    run_hardware_socket(task_socket, chain_index, grid, task_peer, context, events)
                        .await;
                });
                ((socket, peer), task)
            })
            .await;
        Ok(())
    }
}

fn receive_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

/// Receive loop of one hardware-side chain socket.
async fn run_hardware_socket(
    socket: Arc<UdpSocket>,
    chain_index: usize,
    grid: Arc<ResolvedGrid>,
    peer: Arc<StdMutex<Option<SocketAddr>>>,
    context: SessionContext,
    events: mpsc::Sender<PixelEvent>,
) {
    let Some(chain) = grid.chains().get(chain_index) else {
        return;
    };
    context.connected.store(true, Ordering::Release);
    let expected_len = chain.rgb_message_len();
    let mut inbound = InboundState::new(Arc::clone(&grid), chain_index);

    let mut cancel = context.cancel;
    let mut buf = [0u8; 4096];
    loop {
        let received = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            result = socket.recv_from(&mut buf) => result,
        };
        match received {
            Ok((len, src)) => {
                let datagram = &buf[..len];
                if len != expected_len || datagram[..2] != RGB_HEADER {
                    continue;
                }
                // Sensor replies go to wherever valid frames come from.
                *peer.lock().expect("lock poisoned") = Some(src);
                for event in inbound.apply_rgb_message(datagram) {
                    if let Err(e) = events.try_send(event) {
                        debug!("pixel event dropped: {e}");
                    }
                }
            }
            Err(e) if is_transient_recv_error(&e) => {
                debug!("transient receive error, ignored: {e}");
            }
            Err(e) => warn!("udp receive error: {e}"),
        }
    }
}

#[async_trait::async_trait]
impl HardwareLink for UdpHardwareLink {
    async fn push_sensor_data(&self, source: &(dyn SensorSource + Sync)) {
        let mut writes = Vec::new();
        for (index, chain) in self.grid.chains().iter().enumerate() {
            let ChainTarget::Network(addr) = chain.target() else {
                continue;
            };
            let key = SessionKey::Endpoint(receive_addr(addr.port()));
            let Some(session) = self.registry.get(&key) else {
                continue;
            };
            let Some(permit) = session.gate().try_begin() else {
                debug!("chain {index} write in flight, sensor data dropped");
                continue;
            };
            let frame = chain.encode_sensor_frame(source);
            let (socket, peer) = (
                Arc::clone(&session.handle.0),
                Arc::clone(&session.handle.1),
            );
            writes.push(tokio::spawn(async move {
                let _permit = permit;
                let destination = *peer.lock().expect("lock poisoned");
                let Some(destination) = destination else {
                    // No frame has arrived yet, so the game's address is
                    // unknown; readings before first contact are dropped.
                    return;
                };
                if let Err(e) = socket.send_to(&frame, destination).await {
                    warn!("sensor send to {destination} failed: {e}");
                }
            }));
        }
        for write in writes {
            let _ = write.await;
        }
    }

    async fn update_grid(&mut self, grid: Arc<ResolvedGrid>) -> Result<(), TransportError> {
        ensure_network(&grid)?;
        self.grid = grid;
        self.sync_sessions().await
    }

    async fn shutdown(&mut self) {
        self.registry.shutdown().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
