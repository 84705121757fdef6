//! Sequential pipeline driver.
//!
//! Acquire one frame, decode it, hand the batch to the sink, repeat until
//! cancelled. One frame in flight at a time; the only blocking operation is
//! the transport receive. The driver owns all reconnect decisions - the
//! sources never retry on their own.

use crate::decoder::FrameDecoder;
use crate::sink::EventSink;
use crate::source::{FrameSource, SourceError};
use crate::types::EventBatch;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Delay between a failed receive and the reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Fatal pipeline failures. Anything else (short reads, peer close) is
/// handled inside the loop by reconnecting.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("initial connect failed: {0}")]
    Connect(SourceError),

    #[error("reconnect failed: {0}")]
    Reconnect(SourceError),
}

/// Running totals for one pipeline run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    /// Frames decoded
    pub frames: u64,
    /// Events emitted across all frames
    pub events: u64,
    /// Payload bytes received, accumulated across reconnects
    pub bytes: u64,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// Sequential orchestrator: one source, one decoder, one sink.
///
/// Cancellation is cooperative: the flag is polled once per iteration, so a
/// receive already blocking on the transport is not interrupted and
/// shutdown latency is bounded by that call, not immediate.
pub struct PipelineDriver<S: EventSink> {
    source: Box<dyn FrameSource>,
    decoder: FrameDecoder,
    sink: S,
    cancel: Arc<AtomicBool>,
    stats_interval: u64,
    reconnect_delay: Duration,
}

impl<S: EventSink> PipelineDriver<S> {
    pub fn new(
        source: Box<dyn FrameSource>,
        decoder: FrameDecoder,
        sink: S,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            decoder,
            sink,
            cancel,
            stats_interval: 100,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Emit a statistics snapshot every `frames` decoded frames (0 disables).
    pub fn stats_interval(mut self, frames: u64) -> Self {
        self.stats_interval = frames;
        self
    }

    /// Delay between disconnect and reconnect after a receive failure.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Consumes the driver, returning the sink (to flush or inspect).
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Runs the acquisition loop until cancelled or a fatal error occurs.
    ///
    /// Receive failures trigger disconnect + delayed reconnect; a failed
    /// reconnect is fatal. Final statistics are logged on every exit path.
    pub fn run(&mut self) -> Result<PipelineStats, PipelineError> {
        self.source.connect().map_err(PipelineError::Connect)?;

        let start = Instant::now();
        let mut frame_buffer: Vec<u8> = Vec::with_capacity(self.decoder.frame_byte_size());
        let mut events = EventBatch::new();
        let mut frame_number: u64 = 0;
        let mut total_events: u64 = 0;
        // Source counters reset on reconnect; carry the running total here
        let mut bytes_base: u64 = 0;

        let result = loop {
            if self.cancel.load(Ordering::Relaxed) {
                info!("cancellation requested, stopping pipeline");
                break Ok(());
            }

            if let Err(err) = self.source.receive_frame(&mut frame_buffer) {
                if self.cancel.load(Ordering::Relaxed) {
                    break Ok(());
                }
                warn!("frame receive failed ({err}), reconnecting");
                bytes_base += self.source.total_bytes_received();
                self.source.disconnect();
                thread::sleep(self.reconnect_delay);

                if let Err(err) = self.source.connect() {
                    error!("reconnect failed: {err}");
                    break Err(PipelineError::Reconnect(err));
                }
                continue;
            }

            let count = self.decoder.decode_frame(&frame_buffer, frame_number, &mut events);
            if count > 0 {
                self.sink.submit(&events, frame_number);
            }

            frame_number += 1;
            total_events += count as u64;

            if self.stats_interval > 0 && frame_number % self.stats_interval == 0 {
                let stats = PipelineStats {
                    frames: frame_number,
                    events: total_events,
                    bytes: bytes_base + self.source.total_bytes_received(),
                    elapsed: start.elapsed(),
                };
                log_stats(&stats);
            }
        };

        let stats = PipelineStats {
            frames: frame_number,
            events: total_events,
            bytes: bytes_base + self.source.total_bytes_received(),
            elapsed: start.elapsed(),
        };
        info!("pipeline finished");
        log_stats(&stats);

        result.map(|()| stats)
    }
}

/// Logs frames/sec, million events/sec and Mbit/s for a snapshot.
fn log_stats(stats: &PipelineStats) {
    let elapsed = stats.elapsed.as_secs_f64();
    if elapsed <= 0.0 {
        return;
    }
    let fps = stats.frames as f64 / elapsed;
    let meps = stats.events as f64 / (elapsed * 1_000_000.0);
    let mbps = (stats.bytes as f64 * 8.0) / (elapsed * 1_000_000.0);
    info!(
        "stats: frames={} | fps={:.1} | events={} | MEv/s={:.2} | throughput={:.1} Mbps",
        stats.frames, fps, stats.events, meps, mbps
    );
}
