//! The two public link contracts and the events they emit.
//!
//! A game-side link pushes frames and reports sensor readings; a
//! hardware-side link pushes sensor readings and reports frames. Both are
//! object-safe async traits so the surrounding application can hold
//! `Box<dyn GameLink>` and swap transports through configuration alone.
//!
//! Inbound traffic is delivered as plain event structs over a
//! `tokio::sync::mpsc` channel whose receiver is handed out by each link's
//! constructor. A link never blocks on a slow consumer: events a full
//! channel cannot take are dropped, matching the link's general stance that
//! a lost reading is preferable to backpressure on the wire.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use tilefloor_core::{FrameSource, ResolvedGrid, Rgb, SensorSource};

/// Capacity of the event channels handed out by link constructors.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Errors surfaced by link constructors and `update_grid`.
///
/// Everything that can go wrong *after* construction — lost connections,
/// failed writes, line noise — degrades gracefully inside the sessions and
/// is logged rather than returned.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A listener or socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A serial port could not be opened.
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// The resolved grid's chains do not use the transport this link speaks.
    #[error("grid chains are not {expected} targets")]
    WrongTarget { expected: &'static str },
}

/// One sensor reading, already translated from chain offset to grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorEvent {
    pub x: u32,
    pub y: u32,
    /// Raw wire byte: `0x0A` pressed, `0x05` unpressed, anything else passed
    /// through uninterpreted.
    pub value: u8,
}

/// One pixel color update, already translated from chain offset to grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelEvent {
    pub x: u32,
    pub y: u32,
    pub color: Rgb,
}

/// Game-side contract: frames out, sensor readings in.
#[async_trait]
pub trait GameLink: Send {
    /// Reads one color per grid cell from `source`, reorders each chain's
    /// cells into wire order, and writes every chain's frame message
    /// concurrently. Returns once every write has been attempted; a chain
    /// whose previous write is still in flight skips this frame silently.
    async fn push_frame(&self, source: &(dyn FrameSource + Sync));

    /// Snapshot of transport readiness. Semantics are per-transport: serial
    /// means every referenced port opened, TCP means every chain's client is
    /// currently connected, UDP is always ready once bound.
    fn all_connected(&self) -> bool;

    /// Switches to a new grid configuration. Sessions for ports/endpoints no
    /// longer referenced are cancelled; sessions for newly referenced ones
    /// are created; surviving sessions keep running untouched, including the
    /// chain binding they captured when they were first created.
    async fn update_grid(&mut self, grid: Arc<ResolvedGrid>) -> Result<(), TransportError>;

    /// Cancels every session and waits for all background tasks to finish.
    /// No I/O is in flight once this returns.
    async fn shutdown(&mut self);
}

/// Hardware-/emulator-side contract: sensor readings out, frames in.
#[async_trait]
pub trait HardwareLink: Send {
    /// Reads one sensor byte per grid cell from `source` and writes every
    /// chain's sensor message concurrently, subject to the same
    /// write-in-flight rule as [`GameLink::push_frame`].
    async fn push_sensor_data(&self, source: &(dyn SensorSource + Sync));

    /// See [`GameLink::update_grid`].
    async fn update_grid(&mut self, grid: Arc<ResolvedGrid>) -> Result<(), TransportError>;

    /// See [`GameLink::shutdown`].
    async fn shutdown(&mut self);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
