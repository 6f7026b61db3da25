//! Grid description and address resolution.
//!
//! A [`GridDescription`] is the declarative wiring description supplied by
//! external configuration: the grid dimensions and one [`ChainDescriptor`]
//! per physical chain of tiles. [`ResolvedGrid::resolve`] validates the
//! description and derives the immutable lookup tables used by every link:
//!
//! - forward: grid cell `(x, y)` → [`ChainAddress`] (chain index + offset)
//! - backward: chain index + offset → grid cell
//! - per chain: wire message lengths and the sensor header
//!
//! Chains are wired serpentine (boustrophedon): the first row of a chain is
//! traversed in one x-direction, the next row in the opposite direction, so
//! the physical cable never jumps at a row boundary.
//!
//! All validation is fatal and happens here, synchronously, before any
//! transport session exists. Resolution never partially succeeds.

use std::collections::HashSet;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::messages::{sensor_header, Rgb, HEADER_LEN, RGB_HEADER};

/// Errors produced while resolving a [`GridDescription`].
///
/// Every variant is a configuration mistake: the caller must fix the
/// description and resolve again. Nothing here is recoverable at runtime.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Width or height is zero.
    #[error("grid dimensions must be at least 1×1, got {width}×{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// `pixels_per_unit` is zero.
    #[error("pixels_per_unit must be at least 1")]
    InvalidPixelScale,

    /// Column-major chain layout is declared but not implemented.
    #[error("column-wise chain layout is not implemented")]
    ColumnWiseUnimplemented,

    /// More than one pixel per tile is declared but not implemented.
    #[error("{pixels_per_unit} pixels per unit is not implemented; only 1 is supported")]
    PixelScaleUnimplemented { pixels_per_unit: u32 },

    /// The chains do not all use the same transport kind.
    #[error("all chains must use one transport kind; chain {index} differs from chain 0")]
    MixedTransports { index: usize },

    /// Two serial chains name the same port.
    #[error("duplicate serial port: {0}")]
    DuplicatePort(String),

    /// A chain's row range reaches outside the grid.
    #[error("chain {index} rows {first_row}..={last_row} fall outside grid height {height}")]
    RowOutOfRange {
        index: usize,
        first_row: u32,
        last_row: u32,
        height: u32,
    },

    /// More chains than a one-byte chain index can address.
    #[error("at most 256 chains are addressable, got {0}")]
    TooManyChains(usize),

    /// A single chain covers more pixels than a chain offset can address.
    #[error("chain {index} covers {len} pixels, more than a chain offset can address")]
    ChainTooLong { index: usize, len: usize },
}

/// Where a chain's bytes physically go: exactly one transport target.
///
/// The whole description must be uniform — all chains network or all chains
/// serial; [`ResolvedGrid::resolve`] rejects mixtures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChainTarget {
    /// A TCP or UDP endpoint, e.g. `"192.168.4.21:7755"`.
    Network(SocketAddr),
    /// A serial port name, e.g. `"/dev/ttyUSB0"` or `"COM5"`.
    Serial(String),
}

impl ChainTarget {
    fn is_serial(&self) -> bool {
        matches!(self, ChainTarget::Serial(_))
    }
}

/// Physical wiring parameters of one chain of tiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDescriptor {
    /// Transport target the chain is reached over.
    pub target: ChainTarget,
    /// `true` when the chain's first tile sits at the far x-edge of the grid
    /// (the cable enters from the right), so traversal starts at
    /// `x = width - 1` moving left.
    pub connected_at_end: bool,
    /// First grid row the chain covers, inclusive.
    pub first_row: u32,
    /// Last grid row the chain covers, inclusive. May be smaller than
    /// `first_row`; the chain then runs bottom-up.
    pub last_row: u32,
}

/// Declarative description of the whole floor. Pure data, created once per
/// process from external configuration (JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridDescription {
    pub width: u32,
    pub height: u32,
    /// Output pixels per tile. Only `1` is implemented.
    pub pixels_per_unit: u32,
    /// Column-major wiring. Only `false` is implemented.
    pub column_wise: bool,
    /// Ordered chain list; the position in this list is the chain index.
    pub chains: Vec<ChainDescriptor>,
}

/// A cell's position within the chain wiring: which chain reaches it and at
/// which offset along that chain's traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainAddress {
    pub chain: u8,
    pub offset: u16,
}

/// Supplies one color per grid cell; implemented by the rendering layer.
pub trait FrameSource {
    fn color_at(&self, x: u32, y: u32) -> Rgb;
}

/// Supplies one sensor byte per grid cell; implemented by the emulator layer.
pub trait SensorSource {
    fn sensor_at(&self, x: u32, y: u32) -> u8;
}

/// One chain of a resolved grid: its transport target, its traversal order,
/// and the wire parameters derived from its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChain {
    target: ChainTarget,
    /// Grid cells in chain traversal order; `cells[offset] == (x, y)`.
    cells: Vec<(u32, u32)>,
    sensor_header: [u8; 2],
}

impl ResolvedChain {
    /// The transport target this chain is reached over.
    pub fn target(&self) -> &ChainTarget {
        &self.target
    }

    /// Number of pixels on the chain.
    pub fn chain_len(&self) -> usize {
        self.cells.len()
    }

    /// Grid cells in chain traversal order, indexable by chain offset.
    pub fn cells(&self) -> &[(u32, u32)] {
        &self.cells
    }

    /// Grid cell at a chain offset, if the offset is on the chain.
    pub fn cell_at(&self, offset: usize) -> Option<(u32, u32)> {
        self.cells.get(offset).copied()
    }

    /// Total length of an RGB frame message for this chain: header plus three
    /// bytes per pixel.
    pub fn rgb_message_len(&self) -> usize {
        HEADER_LEN + 3 * self.cells.len()
    }

    /// Total length of a sensor message for this chain: header plus one byte
    /// per pixel.
    pub fn sensor_message_len(&self) -> usize {
        HEADER_LEN + self.cells.len()
    }

    /// The chain's sensor message header, `[0xFC, chain_len % 256]`.
    pub fn sensor_header(&self) -> [u8; 2] {
        self.sensor_header
    }

    /// Encodes a complete RGB frame message for this chain, reading one color
    /// per cell from `source` and reordering grid cells into chain traversal
    /// order.
    pub fn encode_rgb_frame(&self, source: &dyn FrameSource) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.rgb_message_len());
        buf.extend_from_slice(&RGB_HEADER);
        for &(x, y) in &self.cells {
            let color = source.color_at(x, y);
            buf.push(color.r);
            buf.push(color.g);
            buf.push(color.b);
        }
        buf
    }

    /// Encodes a complete sensor message for this chain.
    pub fn encode_sensor_frame(&self, source: &dyn SensorSource) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.sensor_message_len());
        buf.extend_from_slice(&self.sensor_header);
        for &(x, y) in &self.cells {
            buf.push(source.sensor_at(x, y));
        }
        buf
    }
}

/// The validated, immutable address tables for one grid configuration.
///
/// Owned by the caller and shared read-only (`Arc`) by every transport
/// session for the lifetime of the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGrid {
    width: u32,
    height: u32,
    chains: Vec<ResolvedChain>,
    /// Row-major forward table, `width × height` entries. Cells no chain
    /// covers stay `None`; when chains overlap the later chain wins.
    cell_table: Vec<Option<ChainAddress>>,
}

impl ResolvedGrid {
    /// Validates `desc` and builds the bidirectional address tables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first configuration mistake
    /// found. No partially-built grid is ever returned.
    pub fn resolve(desc: &GridDescription) -> Result<Self, ConfigError> {
        if desc.width < 1 || desc.height < 1 {
            return Err(ConfigError::InvalidDimensions {
                width: desc.width,
                height: desc.height,
            });
        }
        if desc.pixels_per_unit < 1 {
            return Err(ConfigError::InvalidPixelScale);
        }
        if !desc.chains.is_empty() {
            if desc.column_wise {
                return Err(ConfigError::ColumnWiseUnimplemented);
            }
            if desc.pixels_per_unit != 1 {
                return Err(ConfigError::PixelScaleUnimplemented {
                    pixels_per_unit: desc.pixels_per_unit,
                });
            }
        }
        if desc.chains.len() > 256 {
            return Err(ConfigError::TooManyChains(desc.chains.len()));
        }

        let mut seen_ports = HashSet::new();
        for (index, chain) in desc.chains.iter().enumerate() {
            if chain.target.is_serial() != desc.chains[0].target.is_serial() {
                return Err(ConfigError::MixedTransports { index });
            }
            if let ChainTarget::Serial(port) = &chain.target {
                if !seen_ports.insert(port.as_str()) {
                    return Err(ConfigError::DuplicatePort(port.clone()));
                }
            }
            if chain.first_row >= desc.height || chain.last_row >= desc.height {
                return Err(ConfigError::RowOutOfRange {
                    index,
                    first_row: chain.first_row,
                    last_row: chain.last_row,
                    height: desc.height,
                });
            }
            let rows = chain.first_row.abs_diff(chain.last_row) as usize + 1;
            let len = rows * desc.width as usize;
            if len > u16::MAX as usize + 1 {
                return Err(ConfigError::ChainTooLong { index, len });
            }
        }

        let mut cell_table = vec![None; (desc.width * desc.height) as usize];
        let mut chains = Vec::with_capacity(desc.chains.len());
        for (index, chain) in desc.chains.iter().enumerate() {
            let cells = trace_chain(desc.width, chain);
            for (offset, &(x, y)) in cells.iter().enumerate() {
                cell_table[(y * desc.width + x) as usize] = Some(ChainAddress {
                    chain: index as u8,
                    offset: offset as u16,
                });
            }
            let sensor_header = sensor_header(cells.len());
            chains.push(ResolvedChain {
                target: chain.target.clone(),
                cells,
                sensor_header,
            });
        }

        Ok(Self {
            width: desc.width,
            height: desc.height,
            chains,
            cell_table,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The resolved chains, indexable by chain index.
    pub fn chains(&self) -> &[ResolvedChain] {
        &self.chains
    }

    /// The chain address of a grid cell, or `None` when the cell is outside
    /// the grid or no chain covers it.
    pub fn chain_of_cell(&self, x: u32, y: u32) -> Option<ChainAddress> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cell_table[(y * self.width + x) as usize]
    }

    /// `true` when every chain uses a serial target. A grid with no chains
    /// counts as serial and network alike.
    pub fn is_serial(&self) -> bool {
        self.chains.iter().all(|c| c.target.is_serial())
    }
}

/// Walks one chain's serpentine path and returns the grid cells in traversal
/// order.
///
/// The path starts at the near or far x-edge depending on `connected_at_end`,
/// crosses each covered row completely, and flips x-direction between rows so
/// the path is continuous: after finishing a row the x cursor steps once in
/// the new direction, landing directly below (or above) the row's last cell.
fn trace_chain(width: u32, chain: &ChainDescriptor) -> Vec<(u32, u32)> {
    let mut x: i64 = if chain.connected_at_end {
        width as i64 - 1
    } else {
        0
    };
    let mut x_dir: i64 = if chain.connected_at_end { -1 } else { 1 };
    let y_dir: i64 = if chain.last_row >= chain.first_row {
        1
    } else {
        -1
    };

    let rows = chain.first_row.abs_diff(chain.last_row) as usize + 1;
    let mut cells = Vec::with_capacity(rows * width as usize);
    let mut y = chain.first_row as i64;
    loop {
        for _ in 0..width {
            cells.push((x as u32, y as u32));
            x += x_dir;
        }
        if y == chain.last_row as i64 {
            break;
        }
        x_dir = -x_dir;
        x += x_dir;
        y += y_dir;
    }
    cells
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{SENSOR_PRESSED, SENSOR_RELEASED};

    fn network_chain(port: u16, connected_at_end: bool, first_row: u32, last_row: u32) -> ChainDescriptor {
        ChainDescriptor {
            target: ChainTarget::Network(format!("127.0.0.1:{port}").parse().unwrap()),
            connected_at_end,
            first_row,
            last_row,
        }
    }

    fn serial_chain(port: &str, connected_at_end: bool, first_row: u32, last_row: u32) -> ChainDescriptor {
        ChainDescriptor {
            target: ChainTarget::Serial(port.to_string()),
            connected_at_end,
            first_row,
            last_row,
        }
    }

    fn description(width: u32, height: u32, chains: Vec<ChainDescriptor>) -> GridDescription {
        GridDescription {
            width,
            height,
            pixels_per_unit: 1,
            column_wise: false,
            chains,
        }
    }

    struct SolidFrame(Rgb);

    impl FrameSource for SolidFrame {
        fn color_at(&self, _x: u32, _y: u32) -> Rgb {
            self.0
        }
    }

    struct PositionColors;

    impl FrameSource for PositionColors {
        fn color_at(&self, x: u32, y: u32) -> Rgb {
            Rgb::new(x as u8, y as u8, 0x10)
        }
    }

    struct OnePressed {
        x: u32,
        y: u32,
    }

    impl SensorSource for OnePressed {
        fn sensor_at(&self, x: u32, y: u32) -> u8 {
            if (x, y) == (self.x, self.y) {
                SENSOR_PRESSED
            } else {
                SENSOR_RELEASED
            }
        }
    }

    // ── Serpentine shape ──────────────────────────────────────────────────────

    #[test]
    fn test_serpentine_shape_two_rows_from_near_edge() {
        let grid = ResolvedGrid::resolve(&description(4, 2, vec![network_chain(9000, false, 0, 1)]))
            .unwrap();

        let expected = [
            (0, 0),
            (1, 0),
            (2, 0),
            (3, 0),
            (3, 1),
            (2, 1),
            (1, 1),
            (0, 1),
        ];
        assert_eq!(grid.chains()[0].cells(), &expected);
    }

    #[test]
    fn test_serpentine_starts_at_far_edge_when_connected_at_end() {
        let grid = ResolvedGrid::resolve(&description(4, 2, vec![network_chain(9000, true, 0, 1)]))
            .unwrap();

        let expected = [
            (3, 0),
            (2, 0),
            (1, 0),
            (0, 0),
            (0, 1),
            (1, 1),
            (2, 1),
            (3, 1),
        ];
        assert_eq!(grid.chains()[0].cells(), &expected);
    }

    #[test]
    fn test_serpentine_runs_bottom_up_when_last_row_precedes_first() {
        let grid = ResolvedGrid::resolve(&description(2, 3, vec![network_chain(9000, false, 2, 0)]))
            .unwrap();

        let expected = [(0, 2), (1, 2), (1, 1), (0, 1), (0, 0), (1, 0)];
        assert_eq!(grid.chains()[0].cells(), &expected);
    }

    #[test]
    fn test_single_row_chain_executes_one_pass() {
        let grid = ResolvedGrid::resolve(&description(3, 1, vec![network_chain(9000, false, 0, 0)]))
            .unwrap();

        assert_eq!(grid.chains()[0].cells(), &[(0, 0), (1, 0), (2, 0)]);
    }

    // ── Bijection ─────────────────────────────────────────────────────────────

    #[test]
    fn test_forward_and_backward_tables_agree_for_every_cell() {
        let grid = ResolvedGrid::resolve(&description(
            4,
            3,
            vec![network_chain(9000, true, 0, 1), network_chain(9001, false, 2, 2)],
        ))
        .unwrap();

        let mut addressed = 0;
        for y in 0..3 {
            for x in 0..4 {
                let addr = grid.chain_of_cell(x, y).expect("every cell is covered");
                let cell = grid.chains()[addr.chain as usize]
                    .cell_at(addr.offset as usize)
                    .expect("offset is on the chain");
                assert_eq!(cell, (x, y), "round trip through both tables");
                addressed += 1;
            }
        }
        assert_eq!(addressed, 12, "chains tile the whole 4×3 grid");
    }

    #[test]
    fn test_chain_of_cell_is_none_outside_the_grid() {
        let grid = ResolvedGrid::resolve(&description(4, 2, vec![network_chain(9000, false, 0, 1)]))
            .unwrap();

        assert_eq!(grid.chain_of_cell(4, 0), None);
        assert_eq!(grid.chain_of_cell(0, 2), None);
    }

    #[test]
    fn test_chain_of_cell_is_none_for_uncovered_rows() {
        // Chain covers only row 0 of a 2-row grid.
        let grid = ResolvedGrid::resolve(&description(4, 2, vec![network_chain(9000, false, 0, 0)]))
            .unwrap();

        assert!(grid.chain_of_cell(0, 0).is_some());
        assert_eq!(grid.chain_of_cell(0, 1), None);
    }

    // ── Wire parameters ───────────────────────────────────────────────────────

    #[test]
    fn test_message_lengths_follow_chain_length() {
        let grid = ResolvedGrid::resolve(&description(4, 2, vec![network_chain(9000, false, 0, 1)]))
            .unwrap();
        let chain = &grid.chains()[0];

        assert_eq!(chain.chain_len(), 8);
        assert_eq!(chain.rgb_message_len(), 2 + 3 * 8);
        assert_eq!(chain.sensor_message_len(), 2 + 8);
        assert_eq!(chain.sensor_header(), [0xFC, 8]);
    }

    #[test]
    fn test_scenario_all_white_frame_on_two_chain_grid() {
        // Grid 4×3: chain 0 covers rows 0–1 connected at the far edge, chain 1
        // covers row 2 from the near edge.
        let grid = ResolvedGrid::resolve(&description(
            4,
            3,
            vec![network_chain(7001, true, 0, 1), network_chain(7002, false, 2, 2)],
        ))
        .unwrap();

        let frame = grid.chains()[0].encode_rgb_frame(&SolidFrame(Rgb::WHITE));

        assert_eq!(frame.len(), 26, "2 + 3×8 bytes");
        assert_eq!(&frame[..2], &[0xFF, 0xFF]);
        assert!(frame[2..].iter().all(|&b| b == 0xFF), "8 white pixel triples");
        assert_eq!(
            grid.chains()[0].cells()[0],
            (3, 0),
            "traversal starts at x=3, y=0"
        );
    }

    #[test]
    fn test_encode_rgb_frame_reorders_grid_cells_into_chain_order() {
        let grid = ResolvedGrid::resolve(&description(2, 2, vec![network_chain(9000, false, 0, 1)]))
            .unwrap();

        let frame = grid.chains()[0].encode_rgb_frame(&PositionColors);

        // Chain order: (0,0) (1,0) (1,1) (0,1).
        let expected = [
            0xFF, 0xFF, //
            0, 0, 0x10, //
            1, 0, 0x10, //
            1, 1, 0x10, //
            0, 1, 0x10,
        ];
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_encode_sensor_frame_carries_header_and_per_cell_bytes() {
        let grid = ResolvedGrid::resolve(&description(2, 2, vec![network_chain(9000, false, 0, 1)]))
            .unwrap();

        let frame = grid.chains()[0].encode_sensor_frame(&OnePressed { x: 1, y: 1 });

        // (1,1) is chain offset 2.
        assert_eq!(
            frame,
            [
                0xFC,
                4,
                SENSOR_RELEASED,
                SENSOR_RELEASED,
                SENSOR_PRESSED,
                SENSOR_RELEASED
            ]
        );
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_resolve_rejects_zero_dimensions() {
        let result = ResolvedGrid::resolve(&description(0, 3, vec![]));
        assert_eq!(
            result.unwrap_err(),
            ConfigError::InvalidDimensions { width: 0, height: 3 }
        );
    }

    #[test]
    fn test_resolve_rejects_zero_pixel_scale() {
        let mut desc = description(4, 3, vec![]);
        desc.pixels_per_unit = 0;
        assert_eq!(ResolvedGrid::resolve(&desc).unwrap_err(), ConfigError::InvalidPixelScale);
    }

    #[test]
    fn test_resolve_rejects_column_wise_layout_when_chains_exist() {
        let mut desc = description(4, 2, vec![network_chain(9000, false, 0, 1)]);
        desc.column_wise = true;
        assert_eq!(
            ResolvedGrid::resolve(&desc).unwrap_err(),
            ConfigError::ColumnWiseUnimplemented
        );
    }

    #[test]
    fn test_resolve_allows_unimplemented_flags_on_chainless_grid() {
        // With no chains the unimplemented features are never exercised, so a
        // bare description resolves.
        let mut desc = description(4, 2, vec![]);
        desc.column_wise = true;
        desc.pixels_per_unit = 4;
        assert!(ResolvedGrid::resolve(&desc).is_ok());
    }

    #[test]
    fn test_resolve_rejects_multi_pixel_tiles_when_chains_exist() {
        let mut desc = description(4, 2, vec![network_chain(9000, false, 0, 1)]);
        desc.pixels_per_unit = 3;
        assert_eq!(
            ResolvedGrid::resolve(&desc).unwrap_err(),
            ConfigError::PixelScaleUnimplemented { pixels_per_unit: 3 }
        );
    }

    #[test]
    fn test_resolve_rejects_mixed_transport_kinds() {
        let result = ResolvedGrid::resolve(&description(
            4,
            3,
            vec![network_chain(9000, false, 0, 1), serial_chain("/dev/ttyUSB0", false, 2, 2)],
        ));
        assert_eq!(result.unwrap_err(), ConfigError::MixedTransports { index: 1 });
    }

    #[test]
    fn test_resolve_rejects_duplicate_serial_ports() {
        let result = ResolvedGrid::resolve(&description(
            4,
            3,
            vec![
                serial_chain("/dev/ttyUSB0", false, 0, 1),
                serial_chain("/dev/ttyUSB0", false, 2, 2),
            ],
        ));
        assert_eq!(
            result.unwrap_err(),
            ConfigError::DuplicatePort("/dev/ttyUSB0".to_string())
        );
    }

    #[test]
    fn test_resolve_rejects_rows_outside_the_grid() {
        let result = ResolvedGrid::resolve(&description(4, 2, vec![network_chain(9000, false, 0, 2)]));
        assert_eq!(
            result.unwrap_err(),
            ConfigError::RowOutOfRange {
                index: 0,
                first_row: 0,
                last_row: 2,
                height: 2
            }
        );
    }

    #[test]
    fn test_is_serial_reflects_the_uniform_transport_kind() {
        let serial = ResolvedGrid::resolve(&description(2, 1, vec![serial_chain("COM3", false, 0, 0)]))
            .unwrap();
        let network =
            ResolvedGrid::resolve(&description(2, 1, vec![network_chain(9000, false, 0, 0)])).unwrap();

        assert!(serial.is_serial());
        assert!(!network.is_serial());
    }

    // ── External JSON shape ───────────────────────────────────────────────────

    #[test]
    fn test_grid_description_deserializes_from_configuration_json() {
        let json = r#"{
            "width": 4,
            "height": 3,
            "pixelsPerUnit": 1,
            "columnWise": false,
            "chains": [
                {
                    "target": { "network": "192.168.4.21:7755" },
                    "connectedAtEnd": true,
                    "firstRow": 0,
                    "lastRow": 1
                },
                {
                    "target": { "network": "192.168.4.22:7755" },
                    "connectedAtEnd": false,
                    "firstRow": 2,
                    "lastRow": 2
                }
            ]
        }"#;

        let desc: GridDescription = serde_json::from_str(json).expect("valid description");
        assert_eq!(desc.chains.len(), 2);
        assert!(desc.chains[0].connected_at_end);

        let grid = ResolvedGrid::resolve(&desc).expect("resolvable description");
        assert_eq!(grid.chains()[0].chain_len(), 8);
        assert_eq!(grid.chains()[1].chain_len(), 4);
    }
}
