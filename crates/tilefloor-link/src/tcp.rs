//! TCP transport: the game side dials one client connection per chain
//! endpoint, the hardware side listens on one port per chain.
//!
//! The game side never gives up on a chain: a failed or dropped connection
//! is retried forever with a fixed one-second delay, and readiness
//! ([`GameLink::all_connected`]) reflects the per-chain connection state.
//!
//! The hardware side accepts one client at a time per listener and simply
//! goes back to accepting when that client disconnects. Listener bind
//! failures are the one hard error on this transport: they surface from the
//! constructor instead of degrading, because a hardware emulator that
//! cannot listen is misconfigured rather than unlucky.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use tilefloor_core::{
    ChainTarget, FrameSource, ResolvedGrid, SensorSource, StreamMessageReader, RGB_HEADER,
};

use crate::contract::{
    GameLink, HardwareLink, PixelEvent, SensorEvent, TransportError, EVENT_CHANNEL_CAPACITY,
};
use crate::dispatch::InboundState;
use crate::session::{cancelled, SessionContext, SessionKey, SessionRegistry};

/// Fixed delay between reconnect attempts on the game side.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Pause after an accept error before listening again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Write half shared between a session's connection task (which installs and
/// clears it) and the push paths. `None` while disconnected; a push during
/// that window is a silent no-op.
type TcpWriter = Arc<Mutex<Option<OwnedWriteHalf>>>;

/// Reads a connected stream until EOF, error, or cancellation, turning the
/// byte stream back into messages and messages into events.
async fn drive_stream<E, F>(
    read_half: &mut OwnedReadHalf,
    cancel: &mut watch::Receiver<bool>,
    reader: &mut StreamMessageReader,
    inbound: &mut InboundState,
    mut apply: F,
    events: &mpsc::Sender<E>,
) where
    F: FnMut(&mut InboundState, &[u8]) -> Vec<E>,
{
    let mut buf = [0u8; 2048];
    loop {
        tokio::select! {
            _ = cancelled(cancel) => return,
            result = read_half.read(&mut buf) => match result {
                Ok(0) => {
                    debug!("peer closed the stream");
                    return;
                }
                Ok(n) => {
                    let mut messages: Vec<Vec<u8>> = Vec::new();
                    reader.feed(&buf[..n], &mut |message| messages.push(message.to_vec()));
                    for message in messages {
                        for event in apply(inbound, &message) {
                            if let Err(e) = events.try_send(event) {
                                debug!("event dropped: {e}");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("stream read error: {e}");
                    return;
                }
            }
        }
    }
}

fn ensure_network(grid: &ResolvedGrid) -> Result<(), TransportError> {
    if grid.chains().is_empty() || !grid.is_serial() {
        Ok(())
    } else {
        Err(TransportError::WrongTarget { expected: "network" })
    }
}

// ── Game side ─────────────────────────────────────────────────────────────────

/// Game-side TCP link: one client connection per chain endpoint, frames out,
/// sensor readings in.
pub struct TcpGameLink {
    grid: Arc<ResolvedGrid>,
    registry: SessionRegistry<TcpWriter>,
    events_tx: mpsc::Sender<SensorEvent>,
}

impl TcpGameLink {
    /// Starts one connection session per chain endpoint. Construction always
    /// succeeds for a network grid; connections are established (and
    /// re-established) in the background.
    pub async fn connect(
        grid: Arc<ResolvedGrid>,
    ) -> Result<(Self, mpsc::Receiver<SensorEvent>), TransportError> {
        ensure_network(&grid)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut link = Self {
            grid,
            registry: SessionRegistry::new(),
            events_tx,
        };
        link.sync_sessions().await;
        Ok((link, events_rx))
    }

    async fn sync_sessions(&mut self) {
        let mut seen = HashSet::new();
        let wanted: Vec<(SessionKey, usize)> = self
            .grid
            .chains()
            .iter()
            .enumerate()
            .filter_map(|(index, chain)| {
                let ChainTarget::Network(addr) = chain.target() else {
                    return None;
                };
                // The first chain on an endpoint owns the session.
                seen.insert(*addr)
                    .then(|| (SessionKey::Endpoint(*addr), index))
            })
            .collect();

        let grid = &self.grid;
        let events = &self.events_tx;
        self.registry
            .sync(&wanted, |key, chain_index, context| {
                let SessionKey::Endpoint(addr) = *key else {
                    unreachable!("game sessions are keyed by endpoint");
                };
                let writer: TcpWriter = Arc::new(Mutex::new(None));
                let task_writer = Arc::clone(&writer);
                let grid = Arc::clone(grid);
                let events = events.clone();
                let task = tokio::spawn(async move {
                    run_client_session(addr, chain_index, grid, task_writer, context, events).await;
                });
                (writer, task)
            })
            .await;
    }
}

/// Connect, read until the connection dies, wait, repeat — forever, until
/// cancelled.
async fn run_client_session(
    addr: SocketAddr,
    chain_index: usize,
    grid: Arc<ResolvedGrid>,
    writer: TcpWriter,
    context: SessionContext,
    events: mpsc::Sender<SensorEvent>,
) {
    let Some(chain) = grid.chains().get(chain_index) else {
        return;
    };
    let header = chain.sensor_header();
    let expected_len = chain.sensor_message_len();
    let mut cancel = context.cancel;

    loop {
        if *cancel.borrow() {
            return;
        }
        let connect = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            result = TcpStream::connect(addr) => result,
        };
        match connect {
            Ok(stream) => {
                info!("chain {chain_index} connected to {addr}");
                context.connected.store(true, Ordering::Release);
                let (mut read_half, write_half) = stream.into_split();
                *writer.lock().await = Some(write_half);

                let mut reader = StreamMessageReader::new(header, expected_len);
                let mut inbound = InboundState::new(Arc::clone(&grid), chain_index);
                drive_stream(
                    &mut read_half,
                    &mut cancel,
                    &mut reader,
                    &mut inbound,
                    InboundState::apply_sensor_message,
                    &events,
                )
                .await;

                *writer.lock().await = None;
                context.connected.store(false, Ordering::Release);
                info!("chain {chain_index} disconnected from {addr}");
            }
            Err(e) => warn!("chain {chain_index} could not connect to {addr}: {e}"),
        }

        tokio::select! {
            _ = cancelled(&mut cancel) => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

#[async_trait::async_trait]
impl GameLink for TcpGameLink {
    async fn push_frame(&self, source: &(dyn FrameSource + Sync)) {
        let mut writes = Vec::new();
        for (index, chain) in self.grid.chains().iter().enumerate() {
            let ChainTarget::Network(addr) = chain.target() else {
                continue;
            };
            let Some(session) = self.registry.get(&SessionKey::Endpoint(*addr)) else {
                continue;
            };
            let Some(permit) = session.gate().try_begin() else {
                debug!("chain {index} write in flight, frame dropped");
                continue;
            };
            let frame = chain.encode_rgb_frame(source);
            let writer = Arc::clone(&session.handle);
            writes.push(tokio::spawn(async move {
                let _permit = permit;
                let mut guard = writer.lock().await;
                if let Some(stream) = guard.as_mut() {
                    if let Err(e) = stream.write_all(&frame).await {
                        warn!("frame write failed: {e}");
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
        ensure_network(&grid)?;
        self.grid = grid;
        self.sync_sessions().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.registry.shutdown().await;
    }
}

// ── Hardware side ─────────────────────────────────────────────────────────────

/// Hardware-/emulator-side TCP link: one listener per distinct chain port,
/// sensor readings out, frames in.
pub struct TcpHardwareLink {
    grid: Arc<ResolvedGrid>,
    registry: SessionRegistry<TcpWriter>,
    events_tx: mpsc::Sender<PixelEvent>,
}

impl TcpHardwareLink {
    /// Binds every chain's listener and starts the accept sessions.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] as soon as any listener fails to
    /// bind; no sessions are left running in that case.
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

    /// One listener per distinct port across the chain endpoints.
    fn wanted_sessions(grid: &ResolvedGrid) -> Vec<(SessionKey, usize)> {
        let mut seen = HashSet::new();
        grid.chains()
            .iter()
            .enumerate()
            .filter_map(|(index, chain)| {
                let ChainTarget::Network(addr) = chain.target() else {
                    return None;
                };
                // The first chain on a port owns the listener session.
                seen.insert(addr.port())
                    .then(|| (SessionKey::Endpoint(listen_addr(addr.port())), index))
            })
            .collect()
    }

    async fn sync_sessions(&mut self) -> Result<(), TransportError> {
        let wanted = Self::wanted_sessions(&self.grid);

        // Bind listeners for the new sessions up front so failures surface
        // before any session state changes.
        let mut pending: HashMap<SessionKey, TcpListener> = HashMap::new();
        for (key, _) in &wanted {
            if self.registry.contains(key) {
                continue;
            }
            let SessionKey::Endpoint(addr) = key else {
                continue;
            };
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| TransportError::Bind { addr: *addr, source })?;
            pending.insert(key.clone(), listener);
        }

        let grid = &self.grid;
        let events = &self.events_tx;
        self.registry
            .sync(&wanted, |key, chain_index, context| {
                let listener = pending
                    .remove(key)
                    .expect("listener prebound for every new session");
                let writer: TcpWriter = Arc::new(Mutex::new(None));
                let task_writer = Arc::clone(&writer);
                let grid = Arc::clone(grid);
                let events = events.clone();
                let task = tokio::spawn(async move {
                    run_server_session(listener, chain_index, grid, task_writer, context, events)
                        .await;
                });
                (writer, task)
            })
            .await;
        Ok(())
    }
}

fn listen_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

/// Accept one client, read it until it drops, go back to accepting.
async fn run_server_session(
    listener: TcpListener,
    chain_index: usize,
    grid: Arc<ResolvedGrid>,
    writer: TcpWriter,
    context: SessionContext,
    events: mpsc::Sender<PixelEvent>,
) {
    let Some(chain) = grid.chains().get(chain_index) else {
        return;
    };
    let expected_len = chain.rgb_message_len();
    let mut cancel = context.cancel;

    loop {
        if *cancel.borrow() {
            return;
        }
        let accepted = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            result = listener.accept() => result,
        };
        match accepted {
            Ok((stream, peer)) => {
                info!("chain {chain_index} client {peer} connected");
                context.connected.store(true, Ordering::Release);
                let (mut read_half, write_half) = stream.into_split();
                *writer.lock().await = Some(write_half);

                let mut reader = StreamMessageReader::new(RGB_HEADER, expected_len);
                let mut inbound = InboundState::new(Arc::clone(&grid), chain_index);
                drive_stream(
                    &mut read_half,
                    &mut cancel,
                    &mut reader,
                    &mut inbound,
                    InboundState::apply_rgb_message,
                    &events,
                )
                .await;

                *writer.lock().await = None;
                context.connected.store(false, Ordering::Release);
                info!("chain {chain_index} client {peer} disconnected, accepting again");
            }
            Err(e) => {
                warn!("chain {chain_index} accept failed: {e}");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl HardwareLink for TcpHardwareLink {
    async fn push_sensor_data(&self, source: &(dyn SensorSource + Sync)) {
        let mut writes = Vec::new();
        for (index, chain) in self.grid.chains().iter().enumerate() {
            let ChainTarget::Network(addr) = chain.target() else {
                continue;
            };
            let key = SessionKey::Endpoint(listen_addr(addr.port()));
            let Some(session) = self.registry.get(&key) else {
                continue;
            };
            let Some(permit) = session.gate().try_begin() else {
                debug!("chain {index} write in flight, sensor data dropped");
                continue;
            };
            let frame = chain.encode_sensor_frame(source);
            let writer = Arc::clone(&session.handle);
            writes.push(tokio::spawn(async move {
                let _permit = permit;
                let mut guard = writer.lock().await;
                if let Some(stream) = guard.as_mut() {
                    if let Err(e) = stream.write_all(&frame).await {
                        warn!("sensor write failed: {e}");
                    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use tilefloor_core::{ChainDescriptor, GridDescription};

    fn network_grid(addrs: &[SocketAddr]) -> Arc<ResolvedGrid> {
        let chains = addrs
            .iter()
            .enumerate()
            .map(|(i, addr)| ChainDescriptor {
                target: ChainTarget::Network(*addr),
                connected_at_end: false,
                first_row: i as u32,
                last_row: i as u32,
            })
            .collect();
        let desc = GridDescription {
            width: 2,
            height: addrs.len() as u32,
            pixels_per_unit: 1,
            column_wise: false,
            chains,
        };
        Arc::new(ResolvedGrid::resolve(&desc).unwrap())
    }

    fn free_port() -> u16 {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        port
    }

    #[tokio::test]
    async fn test_connect_rejects_a_serial_grid() {
        let desc = GridDescription {
            width: 2,
            height: 1,
            pixels_per_unit: 1,
            column_wise: false,
            chains: vec![ChainDescriptor {
                target: ChainTarget::Serial("COM3".to_string()),
                connected_at_end: false,
                first_row: 0,
                last_row: 0,
            }],
        };
        let grid = Arc::new(ResolvedGrid::resolve(&desc).unwrap());

        let result = TcpGameLink::connect(grid).await;

        assert!(matches!(
            result,
            Err(TransportError::WrongTarget { expected: "network" })
        ));
    }

    #[tokio::test]
    async fn test_game_link_is_not_connected_while_no_server_listens() {
        // Nothing listens on this endpoint; the session keeps retrying.
        let grid = network_grid(&["127.0.0.1:1".parse().unwrap()]);

        let (mut link, _events) = TcpGameLink::connect(grid).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!link.all_connected());
        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_hardware_link_bind_failure_propagates() {
        let port = free_port();
        // Occupy the port so the link cannot bind it.
        let _occupier = TcpListener::bind(listen_addr(port)).await.unwrap();
        let grid = network_grid(&[format!("127.0.0.1:{port}").parse().unwrap()]);

        let result = TcpHardwareLink::bind(grid).await;

        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_hardware_link_shares_one_listener_across_same_port_chains() {
        let port = free_port();
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let grid = network_grid(&[addr, addr]);

        let (mut link, _events) = TcpHardwareLink::bind(grid).await.unwrap();

        assert_eq!(link.registry.len(), 1, "one listener per distinct port");
        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_grid_drops_sessions_for_removed_endpoints() {
        let a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let (mut link, _events) = TcpGameLink::connect(network_grid(&[a, b])).await.unwrap();
        assert_eq!(link.registry.len(), 2);

        link.update_grid(network_grid(&[a])).await.unwrap();

        assert_eq!(link.registry.len(), 1);
        assert!(link.registry.contains(&SessionKey::Endpoint(a)));
        link.shutdown().await;
    }
}
