//! Integration tests over real loopback sockets.
//!
//! Covers transport-level framing: reassembly of frames from partial TCP
//! writes, the length-header fallback, disconnect detection and the
//! driver's reconnect path.

use packframe_core::{
    Event, EventSink, FrameDecoder, FrameEncoding, FrameSource, LayoutConfig, PipelineDriver,
    PlanarLayout, SourceError, TcpConfig, TcpFrameSource,
};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Picks a free loopback port by binding an ephemeral listener and
/// immediately releasing it.
fn free_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Connects to `addr`, retrying until the accepting side is up.
fn connect_with_retry(addr: SocketAddr) -> TcpStream {
    for _ in 0..200 {
        if let Ok(stream) = TcpStream::connect(addr) {
            return stream;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("could not connect to test source at {addr}");
}

fn planar_layout(width: u32, height: u32) -> LayoutConfig {
    LayoutConfig {
        width,
        height,
        encoding: FrameEncoding::PlanarBit(PlanarLayout::default()),
        ..Default::default()
    }
}

fn tcp_source(addr: SocketAddr, layout: LayoutConfig) -> TcpFrameSource {
    TcpFrameSource::new(
        TcpConfig {
            listen_addr: addr,
            recv_buffer_bytes: 1 << 20,
        },
        layout,
    )
}

/// A 230,400-byte frame delivered across three arbitrarily sized partial
/// writes must arrive as one bit-for-bit identical buffer.
#[test]
fn test_stream_reassembly_across_partial_writes() {
    // 960x960 planar: 2 * 921600 / 8 = 230400 bytes
    let layout = planar_layout(960, 960);
    let frame_size = layout.frame_byte_size();
    assert_eq!(frame_size, 230_400);

    let addr = free_port();
    let mut source = tcp_source(addr, layout);

    let receiver = thread::spawn(move || {
        source.connect().expect("connect failed");
        let mut buffer = Vec::new();
        source.receive_frame(&mut buffer).expect("receive failed");
        (buffer, source.total_bytes_received(), source.total_frames_received())
    });

    let frame: Vec<u8> = (0..frame_size).map(|i| (i % 251) as u8).collect();
    let mut sensor = connect_with_retry(addr);
    for chunk in [&frame[..100], &frame[100..50_100], &frame[50_100..]] {
        sensor.write_all(chunk).unwrap();
        sensor.flush().unwrap();
        thread::sleep(Duration::from_millis(5));
    }

    let (buffer, bytes, frames) = receiver.join().unwrap();
    assert_eq!(buffer, frame);
    assert_eq!(bytes, frame_size as u64);
    assert_eq!(frames, 1);
}

/// Header values of zero or above the sanity ceiling fall back to the
/// nominal frame size for that read; valid values govern the read.
#[test]
fn test_header_fallback_and_valid_header() {
    let layout = LayoutConfig {
        has_length_header: true,
        header_byte_width: 4,
        ..planar_layout(8, 8)
    };
    let nominal = layout.frame_byte_size();
    assert_eq!(nominal, 16);

    let addr = free_port();
    let mut source = tcp_source(addr, layout);

    let receiver = thread::spawn(move || {
        source.connect().expect("connect failed");
        let mut frames = Vec::new();
        for _ in 0..3 {
            let mut buffer = Vec::new();
            source.receive_frame(&mut buffer).expect("receive failed");
            frames.push(buffer);
        }
        frames
    });

    let mut sensor = connect_with_retry(addr);
    // Zero header: nominal size used
    sensor.write_all(&0u32.to_le_bytes()).unwrap();
    sensor.write_all(&[0xAA; 16]).unwrap();
    // Header above the 100 MB sanity ceiling: nominal size used
    sensor.write_all(&200_000_000u32.to_le_bytes()).unwrap();
    sensor.write_all(&[0xBB; 16]).unwrap();
    // Valid header: declared size governs this frame only
    sensor.write_all(&8u32.to_le_bytes()).unwrap();
    sensor.write_all(&[0xCC; 8]).unwrap();
    sensor.flush().unwrap();

    let frames = receiver.join().unwrap();
    assert_eq!(frames[0], vec![0xAA; 16]);
    assert_eq!(frames[1], vec![0xBB; 16]);
    assert_eq!(frames[2], vec![0xCC; 8]);
}

/// A peer close mid-frame aborts the call without partial output and marks
/// the source disconnected.
#[test]
fn test_peer_close_marks_disconnected() {
    let layout = planar_layout(8, 8);
    let addr = free_port();
    let mut source = tcp_source(addr, layout);

    let receiver = thread::spawn(move || {
        source.connect().expect("connect failed");
        let mut buffer = Vec::new();
        let result = source.receive_frame(&mut buffer);
        (result, source.is_connected())
    });

    let mut sensor = connect_with_retry(addr);
    sensor.write_all(&[1, 2, 3, 4, 5]).unwrap();
    sensor.flush().unwrap();
    drop(sensor);

    let (result, connected) = receiver.join().unwrap();
    assert!(matches!(result, Err(SourceError::PeerClosed)));
    assert!(!connected);
}

struct CollectingSink {
    batches: Vec<(u64, Vec<Event>)>,
    cancel: Arc<AtomicBool>,
    stop_after: usize,
}

impl EventSink for CollectingSink {
    fn submit(&mut self, events: &[Event], frame_number: u64) {
        self.batches.push((frame_number, events.to_vec()));
        if self.batches.len() >= self.stop_after {
            self.cancel.store(true, Ordering::Relaxed);
        }
    }
}

/// End-to-end: the driver survives a sensor disconnect by re-listening and
/// accepting a new connection, and frame numbering continues across the
/// reconnect.
#[test]
fn test_pipeline_reconnects_after_sensor_disconnect() {
    let layout = planar_layout(8, 8);
    let addr = free_port();
    let source = tcp_source(addr, layout.clone());

    let cancel = Arc::new(AtomicBool::new(false));
    let sink = CollectingSink {
        batches: Vec::new(),
        cancel: Arc::clone(&cancel),
        stop_after: 2,
    };

    let mut driver = PipelineDriver::new(
        Box::new(source),
        FrameDecoder::new(&layout),
        sink,
        cancel,
    )
    .stats_interval(0)
    .reconnect_delay(Duration::from_millis(50));

    let driver_thread = thread::spawn(move || {
        let stats = driver.run().expect("pipeline failed");
        (stats, driver.into_sink())
    });

    // First connection: one frame with pixel 0 positive, then close
    let mut frame = vec![0u8; 16];
    frame[0] = 0b0000_0001;
    let mut sensor = connect_with_retry(addr);
    sensor.write_all(&frame).unwrap();
    sensor.flush().unwrap();
    drop(sensor);

    // Second connection after the driver re-listens
    let mut sensor = connect_with_retry(addr);
    sensor.write_all(&frame).unwrap();
    sensor.flush().unwrap();

    let (stats, sink) = driver_thread.join().unwrap();
    drop(sensor);

    assert_eq!(stats.frames, 2);
    assert_eq!(stats.events, 2);
    assert_eq!(sink.batches.len(), 2);
    // Frame numbers keep increasing across the reconnect
    assert_eq!(sink.batches[0].0, 0);
    assert_eq!(sink.batches[1].0, 1);
    assert_eq!(
        sink.batches[1].1[0],
        Event::new(0, 0, true, layout.frame_interval_us)
    );
}
