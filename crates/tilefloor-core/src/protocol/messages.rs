//! Wire message constants shared by every transport in both directions.
//!
//! Wire format:
//! ```text
//! RGB frame:      [0xFF 0xFF] [R G B] × chain_len
//! Sensor frame:   [0xFC len%256] [value] × chain_len
//! ```
//! Pixel order within a message is the chain's physical traversal order (see
//! [`crate::domain::grid`]), not grid row order. There is no trailing
//! checksum or terminator; framing relies entirely on the header bytes and
//! the receiver's knowledge of the chain length.

/// Length of every message header, both RGB and sensor.
pub const HEADER_LEN: usize = 2;

/// Header that opens an RGB frame message. Shared by all chains.
pub const RGB_HEADER: [u8; 2] = [0xFF, 0xFF];

/// First byte of a sensor message header. The second byte carries the chain
/// length modulo 256 (see [`sensor_header`]).
pub const SENSOR_HEADER_MARKER: u8 = 0xFC;

/// Sensor byte reported by a tile that is currently being pressed.
pub const SENSOR_PRESSED: u8 = 0x0A;

/// Sensor byte reported by an idle tile.
pub const SENSOR_RELEASED: u8 = 0x05;

/// Builds the per-chain sensor message header.
///
/// Unlike [`RGB_HEADER`] the sensor header encodes the chain length, so two
/// chains of different lengths produce distinct headers.
pub fn sensor_header(chain_len: usize) -> [u8; 2] {
    [SENSOR_HEADER_MARKER, (chain_len % 256) as u8]
}

/// Returns `true` for the pressed sensor byte.
///
/// Values other than [`SENSOR_PRESSED`] and [`SENSOR_RELEASED`] are passed
/// through the link uninterpreted; this helper only recognizes the pressed
/// value.
pub fn is_pressed(value: u8) -> bool {
    value == SENSOR_PRESSED
}

/// One pixel color as sent on the wire, three bytes per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(0xFF, 0xFF, 0xFF);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_header_encodes_chain_length() {
        assert_eq!(sensor_header(8), [0xFC, 8]);
    }

    #[test]
    fn test_sensor_header_wraps_length_at_256() {
        assert_eq!(sensor_header(300), [0xFC, 44]);
        assert_eq!(sensor_header(256), [0xFC, 0]);
    }

    #[test]
    fn test_is_pressed_recognizes_only_the_pressed_byte() {
        assert!(is_pressed(SENSOR_PRESSED));
        assert!(!is_pressed(SENSOR_RELEASED));
        assert!(!is_pressed(0x00));
    }

    #[test]
    fn test_rgb_white_is_all_ff() {
        assert_eq!(Rgb::WHITE, Rgb::new(0xFF, 0xFF, 0xFF));
    }
}
