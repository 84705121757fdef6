//! Sensor frame bridge CLI.
//!
//! Listens for bit-packed frames from a custom event sensor over TCP or
//! UDP, decodes them to (x, y, timestamp, polarity) events and optionally
//! streams the events to a CSV or binary file.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use packframe_core::{
    make_source, BinarySink, BitOrder, ChannelOrder, CsvSink, EventSink, FieldOrder, FrameDecoder,
    FrameEncoding, LayoutConfig, NullSink, PipelineDriver, PlanarLayout, ScanOrder, TcpConfig,
    TransportConfig, UdpConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EncodingArg {
    /// 2 bits per pixel, single plane (none/positive/negative/unused)
    Packed,
    /// 1 bit per pixel per polarity, two bit planes
    Planar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    /// Accept one TCP connection from the sensor
    Tcp,
    /// Bind a UDP endpoint and reassemble frames from datagrams
    Udp,
}

/// Receives bit-packed sensor frames and decodes them to an event stream.
///
/// The sensor connects to this tool (TCP) or sends datagrams to it (UDP).
/// If the decoded image looks wrong, try flipping the bit unpacking flags.
#[derive(Parser, Debug)]
#[command(name = "packframe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Frame width in pixels
    #[arg(long, default_value_t = 2048)]
    width: u32,

    /// Frame height in pixels
    #[arg(long, default_value_t = 2048)]
    height: u32,

    /// On-wire frame encoding
    #[arg(long, value_enum, default_value_t = EncodingArg::Planar)]
    encoding: EncodingArg,

    /// Planar only: bit 7 is the first pixel of each byte (default: bit 0)
    #[arg(long)]
    msb_first: bool,

    /// Planar only: negative plane comes first (default: positive first)
    #[arg(long)]
    negative_first: bool,

    /// Planar only: pixels advance top-to-bottom first (default: row-major)
    #[arg(long)]
    column_major: bool,

    /// Transport to receive frames over
    #[arg(long, value_enum, default_value_t = TransportArg::Tcp)]
    transport: TransportArg,

    /// Local address to bind (TCP listen / UDP bind)
    #[arg(long, default_value = "0.0.0.0:5000")]
    listen: SocketAddr,

    /// Socket receive buffer size in bytes
    #[arg(long, default_value_t = 50 * 1024 * 1024)]
    recv_buffer_bytes: usize,

    /// Maximum accepted datagram payload (UDP only)
    #[arg(long, default_value_t = 64 * 1024)]
    max_datagram_bytes: usize,

    /// Each frame is prefixed with a little-endian length field
    #[arg(long)]
    header: bool,

    /// Width of the length field in bytes
    #[arg(long, default_value_t = 4)]
    header_bytes: usize,

    /// Microseconds between frames, for timestamp generation
    /// (2000 us = 500 FPS)
    #[arg(long, default_value_t = 2000)]
    frame_interval_us: i64,

    /// Emit statistics every N frames (0 = disable)
    #[arg(long, default_value_t = 100)]
    stats_interval: u64,

    /// Write decoded events to this file (.csv or .bin); omit to discard
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Field order for CSV output (comma-separated: x, y, p, t)
    #[arg(short, long, default_value = "x,y,p,t")]
    format: String,

    /// Print verbose debug messages
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

fn layout_from_args(args: &Args) -> LayoutConfig {
    let encoding = match args.encoding {
        EncodingArg::Packed => FrameEncoding::PackedDualValue,
        EncodingArg::Planar => FrameEncoding::PlanarBit(PlanarLayout {
            bit_order: if args.msb_first {
                BitOrder::MsbFirst
            } else {
                BitOrder::LsbFirst
            },
            channel_order: if args.negative_first {
                ChannelOrder::NegativeFirst
            } else {
                ChannelOrder::PositiveFirst
            },
            scan_order: if args.column_major {
                ScanOrder::ColumnMajor
            } else {
                ScanOrder::RowMajor
            },
        }),
    };

    LayoutConfig {
        width: args.width,
        height: args.height,
        encoding,
        has_length_header: args.header,
        header_byte_width: args.header_bytes,
        frame_interval_us: args.frame_interval_us,
    }
}

fn transport_from_args(args: &Args) -> TransportConfig {
    match args.transport {
        TransportArg::Tcp => TransportConfig::Tcp(TcpConfig {
            listen_addr: args.listen,
            recv_buffer_bytes: args.recv_buffer_bytes,
        }),
        TransportArg::Udp => TransportConfig::Udp(UdpConfig {
            bind_addr: args.listen,
            recv_buffer_bytes: args.recv_buffer_bytes,
            max_datagram_bytes: args.max_datagram_bytes,
        }),
    }
}

/// Sink selected by the output file extension.
enum OutputSink {
    Null(NullSink),
    Csv(CsvSink<std::fs::File>),
    Binary(BinarySink<std::fs::File>),
}

impl OutputSink {
    fn create(args: &Args, layout: &LayoutConfig) -> Result<Self> {
        let Some(path) = &args.output else {
            return Ok(Self::Null(NullSink::new()));
        };

        let field_order = FieldOrder::from_str(&args.format)
            .context("invalid field format. Use comma-separated: x,y,p,t")?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("csv")
            .to_lowercase();

        match ext.as_str() {
            "csv" => Ok(Self::Csv(
                CsvSink::create(path, layout, field_order)
                    .context("failed to create CSV output")?,
            )),
            "bin" => Ok(Self::Binary(
                BinarySink::create(path, layout).context("failed to create binary output")?,
            )),
            _ => bail!("unsupported output format: .{ext}. Use .csv or .bin"),
        }
    }

    fn finish(&mut self) -> Result<()> {
        match self {
            Self::Null(_) => Ok(()),
            Self::Csv(sink) => sink.finish().context("failed to flush CSV output"),
            Self::Binary(sink) => sink.finish().context("failed to flush binary output"),
        }
    }
}

impl EventSink for OutputSink {
    fn submit(&mut self, events: &[packframe_core::Event], frame_number: u64) {
        match self {
            Self::Null(sink) => sink.submit(events, frame_number),
            Self::Csv(sink) => sink.submit(events, frame_number),
            Self::Binary(sink) => sink.submit(events, frame_number),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let layout = layout_from_args(&args);
    layout.validate().context("invalid configuration")?;
    let transport = transport_from_args(&args);

    info!("configuration:");
    info!("  frame size: {} x {}", layout.width, layout.height);
    info!("  frame data size: {} bytes", layout.frame_byte_size());
    info!("  encoding: {:?}", layout.encoding);
    info!("  transport: {:?} on {}", args.transport, args.listen);
    info!("  frame interval: {} us", layout.frame_interval_us);
    info!(
        "  has header: {}",
        if layout.has_length_header { "yes" } else { "no" }
    );

    // Cooperative shutdown: flag is polled once per pipeline iteration
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_handler = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        eprintln!("\ninterrupt received, shutting down...");
        cancel_handler.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl-C handler")?;

    let sink = OutputSink::create(&args, &layout)?;

    let mut driver = PipelineDriver::new(
        make_source(&transport, &layout),
        FrameDecoder::new(&layout),
        sink,
        cancel,
    )
    .stats_interval(args.stats_interval);

    let stats = driver.run().context("pipeline terminated with an error")?;

    let mut sink = driver.into_sink();
    sink.finish()?;

    info!(
        "done: {} frames, {} events in {:.2}s",
        stats.frames,
        stats.events,
        stats.elapsed.as_secs_f64()
    );
    Ok(())
}
