//! Event batch sinks.
//!
//! The pipeline hands each non-empty batch to an [`EventSink`]; the sink
//! owns any onward encoding or transport. The hand-off is one-way and
//! fire-and-forget, so sinks deal with their own failures (the file sinks
//! here log the first write error and go quiet).

use crate::config::LayoutConfig;
use crate::types::Event;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::error;

/// Errors raised while constructing a sink or finishing its output.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// Receives decoded event batches, one call per frame.
pub trait EventSink {
    /// Hands over the batch decoded from frame `frame_number`. One-way: the
    /// driver neither expects nor handles a result.
    fn submit(&mut self, events: &[Event], frame_number: u64);
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn submit(&mut self, events: &[Event], frame_number: u64) {
        (**self).submit(events, frame_number)
    }
}

/// Discards events, keeping counts only. Useful for throughput measurement.
#[derive(Debug, Default)]
pub struct NullSink {
    events: u64,
    batches: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_seen(&self) -> u64 {
        self.events
    }

    pub fn batches_seen(&self) -> u64 {
        self.batches
    }
}

impl EventSink for NullSink {
    fn submit(&mut self, events: &[Event], _frame_number: u64) {
        self.events += events.len() as u64;
        self.batches += 1;
    }
}

/// Field ordering for CSV output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldOrder {
    /// x, y, p, t (default)
    #[default]
    XYPT,
    /// t, x, y, p
    TXYP,
    /// x, y, t, p
    XYTP,
    /// Custom order specified by indices
    Custom([usize; 4]),
}

impl std::str::FromStr for FieldOrder {
    type Err = SinkError;

    /// Parses a field order from a format string like "x,y,p,t" or "t,x,y,p".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<String> = s.split(',').map(|p| p.trim().to_lowercase()).collect();

        if parts.len() != 4 {
            return Err(SinkError::InvalidFormat(
                "format must have exactly 4 fields: x, y, p, t".to_string(),
            ));
        }

        // Map field names to indices: x=0, y=1, p=2, t=3
        let mut indices = [0usize; 4];
        let mut used = [false; 4];

        for (i, part) in parts.iter().enumerate() {
            let field_idx = match part.as_str() {
                "x" => 0,
                "y" => 1,
                "p" | "pol" | "polarity" => 2,
                "t" | "time" | "timestamp" => 3,
                _ => {
                    return Err(SinkError::InvalidFormat(format!(
                        "unknown field: {}. Use x, y, p, t",
                        part
                    )))
                }
            };

            if used[field_idx] {
                return Err(SinkError::InvalidFormat(format!(
                    "duplicate field: {}",
                    part
                )));
            }

            indices[i] = field_idx;
            used[field_idx] = true;
        }

        if indices == [0, 1, 2, 3] {
            Ok(Self::XYPT)
        } else if indices == [3, 0, 1, 2] {
            Ok(Self::TXYP)
        } else if indices == [0, 1, 3, 2] {
            Ok(Self::XYTP)
        } else {
            Ok(Self::Custom(indices))
        }
    }
}

/// Streaming CSV sink.
pub struct CsvSink<W: Write> {
    writer: BufWriter<W>,
    field_order: FieldOrder,
    failed: bool,
}

impl CsvSink<File> {
    /// Creates a CSV sink writing to `path`, with a `%geometry:` header
    /// line taken from the layout.
    pub fn create<P: AsRef<Path>>(
        path: P,
        layout: &LayoutConfig,
        field_order: FieldOrder,
    ) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        let mut sink = Self::new(file, field_order);
        sink.write_geometry(layout)?;
        Ok(sink)
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W, field_order: FieldOrder) -> Self {
        Self {
            writer: BufWriter::new(writer),
            field_order,
            failed: false,
        }
    }

    /// Writes the geometry header line.
    pub fn write_geometry(&mut self, layout: &LayoutConfig) -> Result<(), SinkError> {
        writeln!(self.writer, "%geometry:{},{}", layout.width, layout.height)?;
        Ok(())
    }

    fn write_events(&mut self, events: &[Event]) -> Result<(), SinkError> {
        for event in events {
            self.write_event(event)?;
        }
        Ok(())
    }

    #[inline]
    fn write_event(&mut self, event: &Event) -> Result<(), SinkError> {
        let p = event.polarity as u8;
        match self.field_order {
            FieldOrder::XYPT => {
                writeln!(
                    self.writer,
                    "{},{},{},{}",
                    event.x, event.y, p, event.timestamp
                )?;
            }
            FieldOrder::TXYP => {
                writeln!(
                    self.writer,
                    "{},{},{},{}",
                    event.timestamp, event.x, event.y, p
                )?;
            }
            FieldOrder::XYTP => {
                writeln!(
                    self.writer,
                    "{},{},{},{}",
                    event.x, event.y, event.timestamp, p
                )?;
            }
            FieldOrder::Custom(indices) => {
                let values = [
                    event.x as i64,
                    event.y as i64,
                    p as i64,
                    event.timestamp,
                ];
                writeln!(
                    self.writer,
                    "{},{},{},{}",
                    values[indices[0]], values[indices[1]], values[indices[2]], values[indices[3]]
                )?;
            }
        }
        Ok(())
    }

    /// Flushes buffered output.
    pub fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> EventSink for CsvSink<W> {
    fn submit(&mut self, events: &[Event], frame_number: u64) {
        if self.failed {
            return;
        }
        if let Err(err) = self.write_events(events) {
            error!("csv sink write failed on frame {frame_number}: {err}");
            self.failed = true;
        }
    }
}

/// Streaming binary sink.
///
/// Header: magic `PACKFRM\0`, version (u32 LE), sensor width (u32 LE),
/// sensor height (u32 LE). Each event is a packed 14-byte little-endian
/// record: x (u16), y (u16), polarity (u8), padding (u8), timestamp (i64).
pub struct BinarySink<W: Write> {
    writer: BufWriter<W>,
    failed: bool,
}

impl BinarySink<File> {
    /// Creates a binary sink writing to `path`, header included.
    pub fn create<P: AsRef<Path>>(path: P, layout: &LayoutConfig) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        let mut sink = Self::new(file);
        sink.write_header(layout)?;
        Ok(sink)
    }
}

impl<W: Write> BinarySink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            failed: false,
        }
    }

    /// Writes the file header.
    pub fn write_header(&mut self, layout: &LayoutConfig) -> Result<(), SinkError> {
        self.writer.write_all(b"PACKFRM\0")?;
        self.writer.write_all(&1u32.to_le_bytes())?;
        self.writer.write_all(&layout.width.to_le_bytes())?;
        self.writer.write_all(&layout.height.to_le_bytes())?;
        Ok(())
    }

    fn write_events(&mut self, events: &[Event]) -> Result<(), SinkError> {
        for event in events {
            self.writer.write_all(&event.x.to_le_bytes())?;
            self.writer.write_all(&event.y.to_le_bytes())?;
            self.writer.write_all(&[event.polarity as u8, 0])?; // polarity + padding
            self.writer.write_all(&event.timestamp.to_le_bytes())?;
        }
        Ok(())
    }

    /// Flushes buffered output.
    pub fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> EventSink for BinarySink<W> {
    fn submit(&mut self, events: &[Event], frame_number: u64) {
        if self.failed {
            return;
        }
        if let Err(err) = self.write_events(events) {
            error!("binary sink write failed on frame {frame_number}: {err}");
            self.failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_field_order_parsing() {
        assert_eq!(FieldOrder::from_str("x,y,p,t").unwrap(), FieldOrder::XYPT);
        assert_eq!(FieldOrder::from_str("t,x,y,p").unwrap(), FieldOrder::TXYP);
        assert_eq!(FieldOrder::from_str("x,y,t,p").unwrap(), FieldOrder::XYTP);
        assert_eq!(
            FieldOrder::from_str("X, Y, P, T").unwrap(),
            FieldOrder::XYPT
        );
        assert_eq!(
            FieldOrder::from_str("y,x,p,t").unwrap(),
            FieldOrder::Custom([1, 0, 2, 3])
        );
    }

    #[test]
    fn test_field_order_invalid() {
        assert!(FieldOrder::from_str("x,y,z,t").is_err());
        assert!(FieldOrder::from_str("x,y,p").is_err());
        assert!(FieldOrder::from_str("x,x,y,t").is_err());
    }

    #[test]
    fn test_null_sink_counts() {
        let mut sink = NullSink::new();
        sink.submit(&[Event::new(1, 2, true, 0)], 0);
        sink.submit(&[Event::new(3, 4, false, 2000), Event::new(5, 6, true, 2000)], 1);
        assert_eq!(sink.batches_seen(), 2);
        assert_eq!(sink.events_seen(), 3);
    }

    #[test]
    fn test_csv_sink_output() {
        let mut output = Vec::new();
        {
            let mut sink = CsvSink::new(&mut output, FieldOrder::XYPT);
            sink.write_geometry(&LayoutConfig {
                width: 640,
                height: 480,
                ..Default::default()
            })
            .unwrap();
            sink.submit(
                &[
                    Event::new(100, 200, true, 12345),
                    Event::new(101, 201, false, 12345),
                ],
                0,
            );
            sink.finish().unwrap();
        }

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.contains("%geometry:640,480"));
        assert!(output_str.contains("100,200,1,12345"));
        assert!(output_str.contains("101,201,0,12345"));
    }

    #[test]
    fn test_csv_sink_txyp_order() {
        let mut output = Vec::new();
        {
            let mut sink = CsvSink::new(&mut output, FieldOrder::TXYP);
            sink.submit(&[Event::new(100, 200, true, 12345)], 0);
            sink.finish().unwrap();
        }

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.contains("12345,100,200,1"));
    }

    #[test]
    fn test_csv_sink_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let layout = LayoutConfig {
            width: 320,
            height: 240,
            ..Default::default()
        };

        let mut sink = CsvSink::create(&path, &layout, FieldOrder::XYPT).unwrap();
        sink.submit(&[Event::new(1, 2, true, 2000)], 0);
        sink.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("%geometry:320,240"));
        assert!(contents.contains("1,2,1,2000"));
    }

    #[test]
    fn test_binary_sink_layout() {
        let mut output = Vec::new();
        {
            let mut sink = BinarySink::new(&mut output);
            sink.write_header(&LayoutConfig {
                width: 640,
                height: 480,
                ..Default::default()
            })
            .unwrap();
            sink.submit(&[Event::new(7, 9, true, 2000)], 1);
            sink.finish().unwrap();
        }

        assert_eq!(&output[..8], b"PACKFRM\0");
        assert_eq!(&output[8..12], &1u32.to_le_bytes());
        assert_eq!(&output[12..16], &640u32.to_le_bytes());
        assert_eq!(&output[16..20], &480u32.to_le_bytes());

        let record = &output[20..];
        assert_eq!(record.len(), 14);
        assert_eq!(&record[..2], &7u16.to_le_bytes());
        assert_eq!(&record[2..4], &9u16.to_le_bytes());
        assert_eq!(record[4], 1);
        assert_eq!(&record[6..14], &2000i64.to_le_bytes());
    }
}
