//! Transport-level frame acquisition.
//!
//! A [`FrameSource`] delivers exactly one complete, correctly-sized frame
//! buffer per call, hiding partial reads, datagram fragmentation and the
//! optional length-prefix header. Two implementations exist: a TCP source
//! that acts as the accepting side (the sensor connects to us) and a UDP
//! source that binds locally and reassembles frames from datagrams.
//!
//! Neither source retries on its own; reconnect policy belongs to the
//! pipeline driver.

use crate::config::{LayoutConfig, TcpConfig, TransportConfig, UdpConfig};
use byteorder::{ByteOrder, LittleEndian};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Header-declared frame lengths at or above this are treated as garbage
/// and replaced with the nominal configured frame size.
pub const HEADER_SANITY_CEILING: u64 = 100_000_000;

/// Errors surfaced by a frame source. All of them are expected control flow
/// for the driver (disconnect + reconnect), never panics.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by sensor")]
    PeerClosed,

    #[error("source is not connected")]
    NotConnected,
}

/// Polymorphic frame transport.
///
/// State machine: `Disconnected -> Binding/Listening -> Connected ->
/// {Connected | Disconnected-on-error}`; [`FrameSource::disconnect`] forces
/// `Disconnected` from any state.
pub trait FrameSource: Send {
    /// Establishes the transport. Blocks until a sensor is reachable
    /// (accepted peer for TCP, bound endpoint for UDP). Idempotent: calling
    /// while connected is a no-op.
    fn connect(&mut self) -> Result<(), SourceError>;

    /// Releases all transport resources. Safe to call repeatedly.
    fn disconnect(&mut self);

    /// Whether the source currently considers itself connected.
    fn is_connected(&self) -> bool;

    /// Receives exactly one complete frame into `buffer`, resizing it to
    /// the frame length. On error the source marks itself disconnected and
    /// the buffer contents are unspecified.
    fn receive_frame(&mut self, buffer: &mut Vec<u8>) -> Result<(), SourceError>;

    /// Total payload bytes received since the last successful connect.
    fn total_bytes_received(&self) -> u64;

    /// Total frames received since the last successful connect.
    fn total_frames_received(&self) -> u64;

    /// Local address of the bound transport, if any.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Constructs the frame source selected by the transport configuration.
pub fn make_source(transport: &TransportConfig, layout: &LayoutConfig) -> Box<dyn FrameSource> {
    match transport {
        TransportConfig::Tcp(cfg) => Box::new(TcpFrameSource::new(cfg.clone(), layout.clone())),
        TransportConfig::Udp(cfg) => Box::new(UdpFrameSource::new(cfg.clone(), layout.clone())),
    }
}

/// Stream-oriented frame source (accepting role).
///
/// Binds, listens with a backlog of 1 and blocks until the sensor connects.
/// `receive_frame` loops until the exact frame length has been read,
/// handling partial reads and the optional little-endian length header.
#[derive(Debug)]
pub struct TcpFrameSource {
    cfg: TcpConfig,
    layout: LayoutConfig,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    connected: bool,
    total_bytes: u64,
    total_frames: u64,
}

impl TcpFrameSource {
    pub fn new(cfg: TcpConfig, layout: LayoutConfig) -> Self {
        Self {
            cfg,
            layout,
            listener: None,
            stream: None,
            connected: false,
            total_bytes: 0,
            total_frames: 0,
        }
    }

    fn bind_and_accept(&mut self) -> Result<(), SourceError> {
        let addr = self.cfg.listen_addr;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

        // Helps with quick restarts
        if let Err(err) = socket.set_reuse_address(true) {
            warn!("failed to set SO_REUSEADDR: {err}");
        }

        socket.bind(&addr.into())?;
        socket.listen(1)?;
        let listener: TcpListener = socket.into();

        info!(
            addr = %listener.local_addr()?,
            "listening, waiting for sensor to connect"
        );

        let (stream, peer) = listener.accept()?;

        if let Err(err) = SockRef::from(&stream).set_recv_buffer_size(self.cfg.recv_buffer_bytes) {
            warn!("failed to set receive buffer size: {err}");
        }
        // Disable Nagle's algorithm for lower latency
        if let Err(err) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {err}");
        }

        info!(%peer, "sensor connected");

        self.listener = Some(listener);
        self.stream = Some(stream);
        self.connected = true;
        self.total_bytes = 0;
        self.total_frames = 0;
        Ok(())
    }

    /// Reads exactly `buf.len()` bytes, looping over partial reads. EOF or
    /// an I/O error marks the source disconnected.
    fn receive_exact(&mut self, buf: &mut [u8]) -> Result<(), SourceError> {
        let stream = self.stream.as_mut().ok_or(SourceError::NotConnected)?;
        let mut received = 0;

        while received < buf.len() {
            match stream.read(&mut buf[received..]) {
                Ok(0) => {
                    self.connected = false;
                    return Err(SourceError::PeerClosed);
                }
                Ok(n) => {
                    received += n;
                    self.total_bytes += n as u64;
                }
                Err(err) => {
                    self.connected = false;
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }
}

impl FrameSource for TcpFrameSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        if self.connected {
            debug!("already connected");
            return Ok(());
        }
        self.disconnect();

        match self.bind_and_accept() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.disconnect();
                Err(err)
            }
        }
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.listener = None;
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn receive_frame(&mut self, buffer: &mut Vec<u8>) -> Result<(), SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }

        let mut frame_len = self.layout.frame_byte_size();

        if self.layout.has_length_header {
            let width = self.layout.header_byte_width;
            let mut header = [0u8; 8];
            self.receive_exact(&mut header[..width])?;

            let declared = LittleEndian::read_uint(&header[..width], width);
            if declared > 0 && declared < HEADER_SANITY_CEILING {
                // The header value governs this frame only
                frame_len = declared as usize;
            } else {
                debug!(
                    declared,
                    nominal = frame_len,
                    "header length outside sanity bounds, using nominal frame size"
                );
            }
        }

        buffer.resize(frame_len, 0);
        self.receive_exact(buffer.as_mut_slice())?;

        self.total_frames += 1;
        trace!(frame = self.total_frames, bytes = frame_len, "received frame");
        Ok(())
    }

    fn total_bytes_received(&self) -> u64 {
        self.total_bytes
    }

    fn total_frames_received(&self) -> u64 {
        self.total_frames
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

/// Datagram-oriented frame source.
///
/// Binds a local endpoint and accepts packets from any sender. Datagrams
/// need not align to frame boundaries: payloads accumulate in a carry-over
/// buffer, and once at least one nominal frame's worth of bytes is present
/// exactly one frame is sliced off, the remainder staying for the next
/// call. No header support.
#[derive(Debug)]
pub struct UdpFrameSource {
    cfg: UdpConfig,
    layout: LayoutConfig,
    socket: Option<UdpSocket>,
    connected: bool,
    carry: Vec<u8>,
    scratch: Vec<u8>,
    total_bytes: u64,
    total_frames: u64,
}

impl UdpFrameSource {
    pub fn new(cfg: UdpConfig, layout: LayoutConfig) -> Self {
        let scratch = vec![0u8; cfg.max_datagram_bytes];
        Self {
            cfg,
            layout,
            socket: None,
            connected: false,
            carry: Vec::new(),
            scratch,
            total_bytes: 0,
            total_frames: 0,
        }
    }
}

impl FrameSource for UdpFrameSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        if self.connected {
            debug!("already bound");
            return Ok(());
        }
        self.disconnect();

        let socket = UdpSocket::bind(self.cfg.bind_addr)?;
        if let Err(err) = SockRef::from(&socket).set_recv_buffer_size(self.cfg.recv_buffer_bytes) {
            warn!("failed to set receive buffer size: {err}");
        }

        info!(addr = %socket.local_addr()?, "bound datagram endpoint");

        self.socket = Some(socket);
        self.connected = true;
        self.carry.clear();
        self.total_bytes = 0;
        self.total_frames = 0;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.socket = None;
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn receive_frame(&mut self, buffer: &mut Vec<u8>) -> Result<(), SourceError> {
        let socket = self.socket.as_ref().ok_or(SourceError::NotConnected)?;
        let frame_len = self.layout.frame_byte_size();

        while self.carry.len() < frame_len {
            match socket.recv(&mut self.scratch) {
                Ok(n) => {
                    self.carry.extend_from_slice(&self.scratch[..n]);
                    self.total_bytes += n as u64;
                }
                Err(err) => {
                    self.connected = false;
                    return Err(err.into());
                }
            }
        }

        buffer.clear();
        buffer.extend_from_slice(&self.carry[..frame_len]);
        self.carry.drain(..frame_len);

        self.total_frames += 1;
        trace!(
            frame = self.total_frames,
            bytes = frame_len,
            carry = self.carry.len(),
            "assembled frame from datagrams"
        );
        Ok(())
    }

    fn total_bytes_received(&self) -> u64 {
        self.total_bytes
    }

    fn total_frames_received(&self) -> u64 {
        self.total_frames
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}
