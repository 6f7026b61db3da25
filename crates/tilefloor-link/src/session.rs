//! Session lifecycle: the registry of per-port/per-endpoint background
//! tasks and the per-chain write-in-flight gate.
//!
//! Every link owns one [`SessionRegistry`] — there is deliberately no
//! process-wide session table. A session is created the first time a grid
//! configuration references its port or endpoint, keeps running across
//! reconfigurations that still reference it, and is cancelled and awaited
//! when a reconfiguration drops it or the link shuts down.
//!
//! A surviving session keeps the chain index and resolved grid it captured
//! when it was spawned; [`SessionRegistry::sync`] never rebinds a running
//! session. A port that a later configuration assigns to a different chain
//! keeps translating inbound data through its original chain until it is
//! torn down and recreated.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Identifies the physical resource a session owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// A named serial port.
    Port(String),
    /// A network endpoint: the peer address for outbound connections, the
    /// local bind address for listeners and bound sockets.
    Endpoint(SocketAddr),
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Port(name) => write!(f, "{name}"),
            SessionKey::Endpoint(addr) => write!(f, "{addr}"),
        }
    }
}

/// Per-chain write-in-flight gate.
///
/// A write begins only if no other write on the same chain is in flight;
/// otherwise the frame is dropped on the spot — never queued, never
/// blocking the caller. The permit clears the gate when dropped, including
/// on a failed write, so a later frame can try again.
#[derive(Clone)]
pub struct WriteGate(Arc<AtomicBool>);

impl WriteGate {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Claims the gate. `None` means a write is already in flight and this
    /// one must be dropped.
    pub fn try_begin(&self) -> Option<WritePermit> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| WritePermit(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of an exclusive in-flight write; dropping it reopens the gate.
pub struct WritePermit(Arc<AtomicBool>);

impl Drop for WritePermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handles passed into a session's background task at spawn time.
pub struct SessionContext {
    /// Becomes `true` exactly once, on cancellation. Tasks must return
    /// promptly after observing it.
    pub cancel: watch::Receiver<bool>,
    /// Transport readiness flag, owned by the task.
    pub connected: Arc<AtomicBool>,
}

/// One running session: a background task plus the shared handles the write
/// path and readiness snapshots need.
pub struct Session<H> {
    chain_index: usize,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
    connected: Arc<AtomicBool>,
    gate: WriteGate,
    /// Transport-specific write handle (a locked write half, a shared
    /// socket, a cloned serial writer).
    pub handle: H,
}

impl<H> Session<H> {
    /// The chain index captured when the session was spawned. Not refreshed
    /// by later reconfigurations.
    pub fn chain_index(&self) -> usize {
        self.chain_index
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn gate(&self) -> &WriteGate {
        &self.gate
    }
}

/// The per-link session table, keyed by port/endpoint.
pub struct SessionRegistry<H> {
    sessions: HashMap<SessionKey, Session<H>>,
}

impl<H> SessionRegistry<H> {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Reconciles the running sessions against `wanted`.
    ///
    /// Sessions whose key is absent from `wanted` are cancelled and their
    /// tasks awaited; keys already present keep their session untouched;
    /// new keys get a session from `spawn`, which receives the key, the
    /// chain index to capture, and a [`SessionContext`], and returns the
    /// write handle plus the spawned task.
    pub async fn sync<F>(&mut self, wanted: &[(SessionKey, usize)], mut spawn: F)
    where
        F: FnMut(&SessionKey, usize, SessionContext) -> (H, JoinHandle<()>),
    {
        let wanted_keys: HashSet<&SessionKey> = wanted.iter().map(|(key, _)| key).collect();
        let dropped: Vec<SessionKey> = self
            .sessions
            .keys()
            .filter(|key| !wanted_keys.contains(key))
            .cloned()
            .collect();
        for key in dropped {
            if let Some(session) = self.sessions.remove(&key) {
                info!("closing session {key}");
                let _ = session.cancel.send(true);
                if let Err(e) = session.task.await {
                    debug!("session {key} task ended abnormally: {e}");
                }
            }
        }

        for (key, chain_index) in wanted {
            if self.sessions.contains_key(key) {
                continue;
            }
            info!("opening session {key} for chain {chain_index}");
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let connected = Arc::new(AtomicBool::new(false));
            let context = SessionContext {
                cancel: cancel_rx,
                connected: Arc::clone(&connected),
            };
            let (handle, task) = spawn(key, *chain_index, context);
            self.sessions.insert(
                key.clone(),
                Session {
                    chain_index: *chain_index,
                    cancel: cancel_tx,
                    task,
                    connected,
                    gate: WriteGate::new(),
                    handle,
                },
            );
        }
    }

    /// Cancels every session and waits for every task to finish.
    pub async fn shutdown(&mut self) {
        for (key, session) in self.sessions.drain() {
            let _ = session.cancel.send(true);
            if let Err(e) = session.task.await {
                debug!("session {key} task ended abnormally: {e}");
            }
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Session<H>> {
        self.sessions.get(key)
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// `true` when every session currently reports its transport ready.
    /// Vacuously `true` with no sessions.
    pub fn all_connected(&self) -> bool {
        self.sessions.values().all(Session::is_connected)
    }
}

impl<H> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits until the session is cancelled. Never returns otherwise.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // An Err means the sender side is gone, which only happens on teardown;
    // treat it as cancellation too.
    let _ = cancel.wait_for(|flag| *flag).await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
