//! # tilefloor-core
//!
//! Shared library for the tilefloor link layer containing the grid address
//! resolver, the wire-message constants, and the stream framing parser.
//!
//! This crate is used by both sides of the hardware link: the game side
//! (frames out, sensor readings in) and the hardware/emulator side (frames
//! in, sensor readings out). It has zero dependencies on OS APIs, network
//! sockets, or serial ports.
//!
//! # Architecture overview
//!
//! A tile floor presents itself to application code as one uniform 2-D grid,
//! but physically it is wired as several independent serpentine chains of
//! tiles, each reached over its own serial port or network endpoint. This
//! crate owns the translation between the two views:
//!
//! - **`domain`** – `GridDescription` (the declarative wiring description
//!   supplied by external configuration) and `ResolvedGrid` (the validated,
//!   immutable forward/backward address tables plus the per-chain wire
//!   headers and message lengths derived from them).
//!
//! - **`protocol`** – How bytes travel over the wire. Messages are a fixed
//!   two-byte header followed by one (sensor) or three (RGB) bytes per chain
//!   pixel; `StreamMessageReader` extracts them from a continuous byte
//!   stream, tolerating torn reads and resynchronizing after line noise.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `tilefloor_core::ResolvedGrid` instead of the full module path.
pub use domain::grid::{
    ChainAddress, ChainDescriptor, ChainTarget, ConfigError, FrameSource, GridDescription,
    ResolvedChain, ResolvedGrid, SensorSource,
};
pub use protocol::framing::StreamMessageReader;
pub use protocol::messages::{
    is_pressed, sensor_header, Rgb, HEADER_LEN, RGB_HEADER, SENSOR_HEADER_MARKER, SENSOR_PRESSED,
    SENSOR_RELEASED,
};
