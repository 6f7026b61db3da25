//! Inbound message fan-out: chain-relative payload bytes to grid-cell
//! events.
//!
//! Each session owns one [`InboundState`], created with the resolved grid
//! and chain index captured at session spawn time. Decoded messages pass
//! through it; it translates every payload byte's chain offset into the
//! grid cell via the backward address table and reports readings as events.
//!
//! Only *new* readings become events: the first message after session start
//! reports every cell, later messages report only the cells whose bytes
//! changed. A tile held down therefore produces one event when pressed and
//! one when released, not one per polling cycle.

use std::sync::Arc;

use tilefloor_core::{ResolvedGrid, Rgb, HEADER_LEN};
use tracing::debug;

use crate::contract::{PixelEvent, SensorEvent};

/// Per-session inbound translation state.
pub struct InboundState {
    grid: Arc<ResolvedGrid>,
    chain_index: usize,
    /// Payload of the previously decoded message, for change detection.
    prev: Option<Vec<u8>>,
}

impl InboundState {
    /// Binds the state to the chain a session was spawned for. The grid
    /// reference is the one current at spawn time; reconfigurations do not
    /// reach into running sessions.
    pub fn new(grid: Arc<ResolvedGrid>, chain_index: usize) -> Self {
        Self {
            grid,
            chain_index,
            prev: None,
        }
    }

    /// Translates one decoded sensor message into events for the cells with
    /// new readings.
    pub fn apply_sensor_message(&mut self, message: &[u8]) -> Vec<SensorEvent> {
        let Some(chain) = self.grid.chains().get(self.chain_index) else {
            debug!("message for unknown chain {}, dropped", self.chain_index);
            return Vec::new();
        };

        let payload = &message[HEADER_LEN.min(message.len())..];
        let mut events = Vec::new();
        for (offset, &value) in payload.iter().enumerate().take(chain.chain_len()) {
            if !self.changed(offset, 1, &[value]) {
                continue;
            }
            if let Some((x, y)) = chain.cell_at(offset) {
                events.push(SensorEvent { x, y, value });
            }
        }
        self.prev = Some(payload.to_vec());
        events
    }

    /// Translates one decoded RGB frame message into events for the pixels
    /// with new colors.
    pub fn apply_rgb_message(&mut self, message: &[u8]) -> Vec<PixelEvent> {
        let Some(chain) = self.grid.chains().get(self.chain_index) else {
            debug!("message for unknown chain {}, dropped", self.chain_index);
            return Vec::new();
        };

        let payload = &message[HEADER_LEN.min(message.len())..];
        let mut events = Vec::new();
        for offset in 0..chain.chain_len() {
            let Some(triple) = payload.get(3 * offset..3 * offset + 3) else {
                break; // short message: trailing pixels unchanged
            };
            if !self.changed(3 * offset, 3, triple) {
                continue;
            }
            if let Some((x, y)) = chain.cell_at(offset) {
                events.push(PixelEvent {
                    x,
                    y,
                    color: Rgb::new(triple[0], triple[1], triple[2]),
                });
            }
        }
        self.prev = Some(payload.to_vec());
        events
    }

    /// `true` when `bytes` differ from the previous payload at `start`, or
    /// when no previous payload exists.
    fn changed(&self, start: usize, len: usize, bytes: &[u8]) -> bool {
        match &self.prev {
            None => true,
            Some(prev) => prev.get(start..start + len) != Some(bytes),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
