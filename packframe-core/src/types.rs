//! Core types for decoded sensor events.
//!
//! The sensor transmits whole frames, not individual events; every event
//! decoded from one frame therefore carries the same synthesized timestamp.

/// A single decoded sensor event.
///
/// Represents one triggered pixel: coordinates, polarity (direction of the
/// brightness change) and the frame-granular timestamp in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Event {
    /// X coordinate of the pixel, in `[0, width)`
    pub x: u16,
    /// Y coordinate of the pixel, in `[0, height)`
    pub y: u16,
    /// Event polarity: `true` = brightness increase, `false` = decrease
    pub polarity: bool,
    /// Timestamp in microseconds, shared by all events of one frame
    pub timestamp: i64,
}

impl Event {
    /// Creates a new event.
    #[inline]
    pub fn new(x: u16, y: u16, polarity: bool, timestamp: i64) -> Self {
        Self {
            x,
            y,
            polarity,
            timestamp,
        }
    }
}

/// Ordered sequence of events decoded from exactly one frame.
///
/// Order is scan order of the decode: byte-ascending, then intra-byte pixel
/// order. Consumers may rely on this ordering for reproducibility.
pub type EventBatch = Vec<Event>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = Event::new(100, 200, true, 12345);
        assert_eq!(event.x, 100);
        assert_eq!(event.y, 200);
        assert!(event.polarity);
        assert_eq!(event.timestamp, 12345);
    }
}
