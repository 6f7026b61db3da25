//! # tilefloor-link
//!
//! Concurrent transport sessions linking the uniform grid abstraction of
//! [`tilefloor_core`] to the physical tile chains, over serial lines, TCP
//! sockets, or UDP sockets.
//!
//! Six link variants exist, one per direction × transport pair:
//!
//! | direction | serial | TCP | UDP |
//! |---|---|---|---|
//! | game → hardware | [`SerialGameLink`] | [`TcpGameLink`] | [`UdpGameLink`] |
//! | hardware → game | [`SerialHardwareLink`] | [`TcpHardwareLink`] | [`UdpHardwareLink`] |
//!
//! The game side pushes RGB frames out and receives sensor readings; the
//! hardware/emulator side is the mirror image. All variants share the same
//! skeleton: an immutable `Arc<ResolvedGrid>` of address tables, a
//! [`session::SessionRegistry`] owning one cancellable background task per
//! port or endpoint in use, a per-chain write-in-flight gate that drops a
//! frame rather than queue it, and a `StreamMessageReader` turning the
//! inbound byte stream back into messages.
//!
//! Inbound readings surface as [`SensorEvent`]s / [`PixelEvent`]s on a
//! `tokio::sync::mpsc` channel handed out at construction; the rendering and
//! emulator layers on either side of this crate stay entirely outside it,
//! reached only through the [`FrameSource`] and [`SensorSource`] seams.

pub mod contract;
pub mod dispatch;
pub mod serial;
pub mod session;
pub mod tcp;
pub mod udp;

pub use contract::{GameLink, HardwareLink, PixelEvent, SensorEvent, TransportError};
pub use serial::{
    loopback_pair, SerialConnection, SerialGameLink, SerialHardwareLink, SerialPortFactory,
    SystemPortFactory,
};
pub use tcp::{TcpGameLink, TcpHardwareLink};
pub use udp::{UdpGameLink, UdpHardwareLink};

// Re-export the core seams so dependents need only this crate.
pub use tilefloor_core::{FrameSource, ResolvedGrid, Rgb, SensorSource};
