//! Frame acquisition and decoding pipeline for bit-packed event sensors.
//!
//! This crate receives raw, densely bit-packed frames from a custom
//! image/event sensor over TCP or UDP and decodes each frame into discrete
//! spatial events (x, y, timestamp, polarity). Framing is guaranteed over
//! both transports despite partial reads, datagram fragmentation and
//! optional length-prefix headers; the decoder supports several
//! incompatible on-wire bit layouts behind one configuration type and skips
//! zero bytes to stay fast on sparse data.
//!
//! # Example
//!
//! ```no_run
//! use packframe_core::config::{LayoutConfig, TcpConfig, TransportConfig};
//! use packframe_core::decoder::FrameDecoder;
//! use packframe_core::pipeline::PipelineDriver;
//! use packframe_core::sink::NullSink;
//! use packframe_core::source::make_source;
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! let layout = LayoutConfig::default();
//! layout.validate().unwrap();
//!
//! let transport = TransportConfig::Tcp(TcpConfig::default());
//! let cancel = Arc::new(AtomicBool::new(false));
//!
//! let mut driver = PipelineDriver::new(
//!     make_source(&transport, &layout),
//!     FrameDecoder::new(&layout),
//!     NullSink::new(),
//!     cancel,
//! );
//! let stats = driver.run().unwrap();
//! println!("decoded {} events from {} frames", stats.events, stats.frames);
//! ```

pub mod config;
pub mod decoder;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use config::{
    BitOrder, ChannelOrder, ConfigError, FrameEncoding, LayoutConfig, PlanarLayout, ScanOrder,
    TcpConfig, TransportConfig, UdpConfig,
};
pub use decoder::FrameDecoder;
pub use pipeline::{PipelineDriver, PipelineError, PipelineStats};
pub use sink::{BinarySink, CsvSink, EventSink, FieldOrder, NullSink, SinkError};
pub use source::{make_source, FrameSource, SourceError, TcpFrameSource, UdpFrameSource};
pub use types::{Event, EventBatch};
