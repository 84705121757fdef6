//! Pipeline configuration: sensor geometry, on-wire bit layout and transport.
//!
//! All configuration is resolved once at startup, validated, and then passed
//! by reference to each component's constructor. Nothing here changes during
//! a pipeline run.

use std::net::SocketAddr;
use thiserror::Error;

/// Default socket receive buffer (50 MB) - large enough to absorb bursts
/// from a sensor streaming megapixel frames at high rate.
pub const DEFAULT_RECV_BUFFER_BYTES: usize = 50 * 1024 * 1024;

/// Default maximum datagram payload accepted by the UDP source.
pub const DEFAULT_MAX_DATAGRAM_BYTES: usize = 64 * 1024;

/// Default nominal inter-frame time (2000 us = 500 FPS).
pub const DEFAULT_FRAME_INTERVAL_US: i64 = 2000;

/// Errors raised by construction-time configuration validation.
///
/// These are fatal at startup and can never be triggered mid-run.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid resolution {width}x{height}: both sides must be in 1..=65535")]
    InvalidResolution { width: u32, height: u32 },

    #[error("invalid length header width {0}: must be in 1..=8 bytes")]
    InvalidHeaderWidth(usize),

    #[error("invalid frame interval {0} us: must be positive")]
    InvalidFrameInterval(i64),
}

/// Bit order within each byte of a planar bit plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    /// Bit 0 is the first pixel of the byte
    #[default]
    LsbFirst,
    /// Bit 7 is the first pixel of the byte
    MsbFirst,
}

/// Order of the two polarity planes within a planar frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    /// `[positive plane][negative plane]`
    #[default]
    PositiveFirst,
    /// `[negative plane][positive plane]`
    NegativeFirst,
}

/// Pixel scan order within a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOrder {
    /// Pixels advance left-to-right, then to the next row
    #[default]
    RowMajor,
    /// Pixels advance top-to-bottom, then to the next column
    ColumnMajor,
}

/// Sub-flags of the planar 1-bit-per-pixel encoding.
///
/// These exist because sensor gateware revisions disagree on how bits are
/// packed; flipping them is the first thing to try when the image looks
/// wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanarLayout {
    pub bit_order: BitOrder,
    pub channel_order: ChannelOrder,
    pub scan_order: ScanOrder,
}

/// On-wire frame encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEncoding {
    /// 2 bits per pixel, single plane: `00` none, `01` positive, `10`
    /// negative, `11` unused. Four pixels per byte, MSB pair first.
    PackedDualValue,
    /// 1 bit per pixel per polarity, two separate bit planes.
    PlanarBit(PlanarLayout),
}

/// Immutable layout configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Sensor width in pixels
    pub width: u32,
    /// Sensor height in pixels
    pub height: u32,
    /// On-wire frame encoding
    pub encoding: FrameEncoding,
    /// Whether each frame is prefixed with a little-endian length field
    pub has_length_header: bool,
    /// Width of the length field in bytes (only used if `has_length_header`)
    pub header_byte_width: usize,
    /// Nominal inter-frame time in microseconds, used for timestamp synthesis
    pub frame_interval_us: i64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            width: 2048,
            height: 2048,
            encoding: FrameEncoding::PlanarBit(PlanarLayout::default()),
            has_length_header: false,
            header_byte_width: 4,
            frame_interval_us: DEFAULT_FRAME_INTERVAL_US,
        }
    }
}

impl LayoutConfig {
    /// Total number of pixels per frame.
    #[inline]
    pub fn pixels_per_frame(&self) -> u32 {
        self.width * self.height
    }

    /// Payload size of one frame in bytes, derived from the encoding.
    pub fn frame_byte_size(&self) -> usize {
        let pixels = self.pixels_per_frame() as usize;
        match self.encoding {
            FrameEncoding::PackedDualValue => pixels.div_ceil(4),
            FrameEncoding::PlanarBit(_) => 2 * pixels.div_ceil(8),
        }
    }

    /// Size of one polarity plane in bytes (planar encoding only).
    pub fn plane_byte_size(&self) -> usize {
        (self.pixels_per_frame() as usize).div_ceil(8)
    }

    /// Validates the configuration. Called once at startup; a failure here
    /// aborts before any component is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 || self.width > 65535 || self.height > 65535 {
            return Err(ConfigError::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }
        if self.has_length_header && !(1..=8).contains(&self.header_byte_width) {
            return Err(ConfigError::InvalidHeaderWidth(self.header_byte_width));
        }
        if self.frame_interval_us <= 0 {
            return Err(ConfigError::InvalidFrameInterval(self.frame_interval_us));
        }
        Ok(())
    }
}

/// TCP transport settings. The receiver acts as the accepting side; the
/// sensor connects to us.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Local address to bind and listen on
    pub listen_addr: SocketAddr,
    /// SO_RCVBUF size requested for the accepted connection
    pub recv_buffer_bytes: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".parse().unwrap(),
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
        }
    }
}

/// UDP transport settings. The receiver binds locally and accepts datagrams
/// from any sender.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Local address to bind
    pub bind_addr: SocketAddr,
    /// SO_RCVBUF size requested for the bound socket
    pub recv_buffer_bytes: usize,
    /// Largest datagram payload accepted per receive call
    pub max_datagram_bytes: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".parse().unwrap(),
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
            max_datagram_bytes: DEFAULT_MAX_DATAGRAM_BYTES,
        }
    }
}

/// Transport selection, resolved once at startup.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Tcp(TcpConfig),
    Udp(UdpConfig),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_byte_size_packed() {
        let layout = LayoutConfig {
            width: 3,
            height: 3,
            encoding: FrameEncoding::PackedDualValue,
            ..Default::default()
        };
        // 9 pixels at 4 pixels/byte -> 3 bytes with padding
        assert_eq!(layout.frame_byte_size(), 3);

        let layout = LayoutConfig {
            width: 2048,
            height: 2048,
            encoding: FrameEncoding::PackedDualValue,
            ..Default::default()
        };
        assert_eq!(layout.frame_byte_size(), 2048 * 2048 / 4);
    }

    #[test]
    fn test_frame_byte_size_planar() {
        let layout = LayoutConfig {
            width: 8,
            height: 8,
            encoding: FrameEncoding::PlanarBit(PlanarLayout::default()),
            ..Default::default()
        };
        // 64 pixels -> 8 bytes per plane, two planes
        assert_eq!(layout.plane_byte_size(), 8);
        assert_eq!(layout.frame_byte_size(), 16);

        let layout = LayoutConfig {
            width: 3,
            height: 3,
            encoding: FrameEncoding::PlanarBit(PlanarLayout::default()),
            ..Default::default()
        };
        // 9 pixels -> 2 bytes per plane with padding
        assert_eq!(layout.frame_byte_size(), 4);
    }

    #[test]
    fn test_validate_rejects_zero_resolution() {
        let layout = LayoutConfig {
            width: 0,
            height: 2048,
            ..Default::default()
        };
        assert!(matches!(
            layout.validate(),
            Err(ConfigError::InvalidResolution { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_header_width() {
        let layout = LayoutConfig {
            has_length_header: true,
            header_byte_width: 0,
            ..Default::default()
        };
        assert!(matches!(
            layout.validate(),
            Err(ConfigError::InvalidHeaderWidth(0))
        ));

        let layout = LayoutConfig {
            has_length_header: true,
            header_byte_width: 9,
            ..Default::default()
        };
        assert!(layout.validate().is_err());

        // Header width is ignored when no header is configured
        let layout = LayoutConfig {
            has_length_header: false,
            header_byte_width: 0,
            ..Default::default()
        };
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_positive_interval() {
        let layout = LayoutConfig {
            frame_interval_us: 0,
            ..Default::default()
        };
        assert!(matches!(
            layout.validate(),
            Err(ConfigError::InvalidFrameInterval(0))
        ));
    }

    #[test]
    fn test_defaults_match_sensor_bringup() {
        let layout = LayoutConfig::default();
        assert_eq!(layout.width, 2048);
        assert_eq!(layout.height, 2048);
        assert_eq!(
            layout.encoding,
            FrameEncoding::PlanarBit(PlanarLayout::default())
        );
        assert!(!layout.has_length_header);
        assert_eq!(layout.frame_interval_us, 2000);
        assert!(layout.validate().is_ok());
    }
}
