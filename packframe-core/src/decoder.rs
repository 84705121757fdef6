//! Bit-layout frame decoder.
//!
//! Turns an opaque frame buffer into typed events under a configurable
//! pixel/bit/channel layout. All layout-dependent arithmetic is precomputed
//! into lookup tables at construction time; the decode itself is a pure
//! function of (buffer, frame number) and is deterministic and order-stable.
//!
//! Frames are expected to be sparse: the vast majority of bytes carry no
//! event, so both decode paths skip zero bytes outright before touching any
//! table.

use crate::config::{BitOrder, ChannelOrder, FrameEncoding, LayoutConfig, PlanarLayout, ScanOrder};
use crate::types::{Event, EventBatch};
use tracing::{trace, warn};

/// Set-bit offsets of one byte value, in intra-byte pixel order.
#[derive(Debug, Clone, Copy)]
struct SetBits {
    len: u8,
    offsets: [u8; 8],
}

/// Precomputed lookup tables, one variant per encoding.
#[derive(Debug)]
enum DecodeTables {
    /// PackedDualValue: base pixel index per byte (4 pixels/byte).
    Packed { byte_base: Vec<u32> },
    /// PlanarBit: per-byte-value set-bit offsets honouring the configured
    /// bit order, plus base (x, y) per plane byte honouring the scan order.
    Planar {
        layout: PlanarLayout,
        bits: Box<[SetBits; 256]>,
        byte_base: Vec<(u32, u32)>,
    },
}

/// Configuration-driven frame decoder.
///
/// Constructed once per pipeline run from a validated [`LayoutConfig`];
/// holds no mutable state, so a single instance may be shared freely if the
/// pipeline is ever parallelized.
#[derive(Debug)]
pub struct FrameDecoder {
    width: u32,
    height: u32,
    pixels: u32,
    frame_bytes: usize,
    frame_interval_us: i64,
    tables: DecodeTables,
}

impl FrameDecoder {
    /// Creates a decoder, precomputing the lookup tables for the layout.
    pub fn new(layout: &LayoutConfig) -> Self {
        let frame_bytes = layout.frame_byte_size();

        let tables = match layout.encoding {
            FrameEncoding::PackedDualValue => DecodeTables::Packed {
                // 4 pixels per byte; trivial arithmetic kept as a table for
                // uniformity with the planar path
                byte_base: (0..frame_bytes).map(|i| (i * 4) as u32).collect(),
            },
            FrameEncoding::PlanarBit(planar) => {
                let plane_bytes = layout.plane_byte_size();
                DecodeTables::Planar {
                    layout: planar,
                    bits: build_bit_table(planar.bit_order),
                    byte_base: build_plane_base(
                        layout.width,
                        layout.height,
                        plane_bytes,
                        planar.scan_order,
                    ),
                }
            }
        };

        Self {
            width: layout.width,
            height: layout.height,
            pixels: layout.pixels_per_frame(),
            frame_bytes,
            frame_interval_us: layout.frame_interval_us,
            tables,
        }
    }

    /// Expected frame payload size in bytes.
    #[inline]
    pub fn frame_byte_size(&self) -> usize {
        self.frame_bytes
    }

    /// Decodes one frame into `out`, clearing it first. Returns the number
    /// of decoded events.
    ///
    /// A buffer shorter than the layout's frame size yields an empty batch
    /// and a diagnostic; the decode never reads past the buffer bound. Bytes
    /// beyond the expected frame size are ignored.
    pub fn decode_frame(&self, data: &[u8], frame_number: u64, out: &mut EventBatch) -> usize {
        out.clear();

        if data.len() < self.frame_bytes {
            warn!(
                got = data.len(),
                expected = self.frame_bytes,
                frame = frame_number,
                "frame buffer smaller than expected, dropping"
            );
            return 0;
        }

        // No sub-frame timing exists in the source data; every event of the
        // frame shares one synthesized timestamp.
        let timestamp = frame_number as i64 * self.frame_interval_us;

        match &self.tables {
            DecodeTables::Packed { byte_base } => {
                self.decode_packed(&data[..self.frame_bytes], byte_base, timestamp, out);
            }
            DecodeTables::Planar {
                layout,
                bits,
                byte_base,
            } => {
                let plane = self.frame_bytes / 2;
                let (first_polarity, second_polarity) = match layout.channel_order {
                    ChannelOrder::PositiveFirst => (true, false),
                    ChannelOrder::NegativeFirst => (false, true),
                };
                let scan = layout.scan_order;
                self.decode_plane(&data[..plane], bits, byte_base, scan, first_polarity, timestamp, out);
                self.decode_plane(
                    &data[plane..self.frame_bytes],
                    bits,
                    byte_base,
                    scan,
                    second_polarity,
                    timestamp,
                    out,
                );
            }
        }

        trace!(frame = frame_number, events = out.len(), "decoded frame");
        out.len()
    }

    /// Convenience wrapper returning a freshly allocated batch.
    pub fn decode(&self, data: &[u8], frame_number: u64) -> EventBatch {
        let mut out = EventBatch::new();
        self.decode_frame(data, frame_number, &mut out);
        out
    }

    /// PackedDualValue path: 4 pixels per byte, MSB pair first.
    /// `01` = positive, `10` = negative, `00`/`11` = no event.
    fn decode_packed(&self, data: &[u8], byte_base: &[u32], timestamp: i64, out: &mut EventBatch) {
        for (byte_idx, &byte_val) in data.iter().enumerate() {
            // Sparse-data optimization: no events in this byte
            if byte_val == 0 {
                continue;
            }

            let base_pixel = byte_base[byte_idx];

            for slot in 0..4u32 {
                let shift = 6 - slot * 2;
                let pixel_val = (byte_val >> shift) & 0x03;

                if pixel_val == 0 || pixel_val == 3 {
                    continue;
                }

                let pixel_idx = base_pixel + slot;

                // Final-byte padding
                if pixel_idx >= self.pixels {
                    continue;
                }

                let x = (pixel_idx % self.width) as u16;
                let y = (pixel_idx / self.width) as u16;
                out.push(Event::new(x, y, pixel_val == 1, timestamp));
            }
        }
    }

    /// PlanarBit path for one polarity plane: table-driven set-bit
    /// enumeration, no per-bit branching on the bit order.
    #[allow(clippy::too_many_arguments)]
    fn decode_plane(
        &self,
        plane: &[u8],
        bits: &[SetBits; 256],
        byte_base: &[(u32, u32)],
        scan: ScanOrder,
        polarity: bool,
        timestamp: i64,
        out: &mut EventBatch,
    ) {
        for (byte_idx, &byte_val) in plane.iter().enumerate() {
            if byte_val == 0 {
                continue;
            }

            let (base_x, base_y) = byte_base[byte_idx];
            let set = &bits[byte_val as usize];

            for &offset in &set.offsets[..set.len as usize] {
                match scan {
                    ScanOrder::RowMajor => {
                        let px = base_x + offset as u32;
                        let y = base_y + px / self.width;
                        let x = px % self.width;
                        // Past the last row: final-byte padding
                        if y >= self.height {
                            continue;
                        }
                        out.push(Event::new(x as u16, y as u16, polarity, timestamp));
                    }
                    ScanOrder::ColumnMajor => {
                        let py = base_y + offset as u32;
                        let x = base_x + py / self.height;
                        let y = py % self.height;
                        if x >= self.width {
                            continue;
                        }
                        out.push(Event::new(x as u16, y as u16, polarity, timestamp));
                    }
                }
            }
        }
    }
}

/// Builds the 256-entry byte-value -> set-bit-offsets table for one bit
/// order. Offsets are intra-byte pixel offsets in ascending pixel order.
fn build_bit_table(bit_order: BitOrder) -> Box<[SetBits; 256]> {
    let mut table = Box::new(
        [SetBits {
            len: 0,
            offsets: [0; 8],
        }; 256],
    );

    for (value, entry) in table.iter_mut().enumerate() {
        for offset in 0..8u8 {
            let bit = match bit_order {
                BitOrder::LsbFirst => offset,
                BitOrder::MsbFirst => 7 - offset,
            };
            if value & (1usize << bit) != 0 {
                entry.offsets[entry.len as usize] = offset;
                entry.len += 1;
            }
        }
    }

    table
}

/// Builds the per-byte base (x, y) table for one plane, honouring the scan
/// order. Byte `i` covers pixels `i*8 .. i*8+8` of the scan sequence.
fn build_plane_base(
    width: u32,
    height: u32,
    plane_bytes: usize,
    scan: ScanOrder,
) -> Vec<(u32, u32)> {
    (0..plane_bytes)
        .map(|byte_idx| {
            let pixel = (byte_idx * 8) as u32;
            match scan {
                ScanOrder::RowMajor => (pixel % width, pixel / width),
                ScanOrder::ColumnMajor => (pixel / height, pixel % height),
            }
        })
        .collect()
}
