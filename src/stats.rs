/// Shard decoding statistics
///
/// Tracks frames, messages and capture bytes processed by one shard worker,
/// plus sequence gaps, and reports throughput when the shard is done.

use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ShardStats {
    start_time: Option<Instant>,
    total_frames: u64,
    total_messages: u64,
    /// Capture bytes consumed, record headers included
    total_bytes: u64,
    total_gaps: u64,
    gap_events: u64,
}

impl ShardStats {
    pub fn new() -> Self {
        ShardStats {
            start_time: None,
            total_frames: 0,
            total_messages: 0,
            total_bytes: 0,
            total_gaps: 0,
            gap_events: 0,
        }
    }

    /// Record one decoded frame
    pub fn record_frame(&mut self, capture_bytes: u64, messages: u64) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
        self.total_frames += 1;
        self.total_messages += messages;
        self.total_bytes += capture_bytes;
    }

    /// Record a gap event
    pub fn record_gap(&mut self, gap_size: u64) {
        self.total_gaps += gap_size;
        self.gap_events += 1;
    }

    fn per_sec(&self, count: u64) -> f64 {
        match self.start_time {
            None => 0.0,
            Some(start) => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    count as f64 / elapsed
                } else {
                    0.0
                }
            }
        }
    }

    pub fn messages_per_sec(&self) -> f64 {
        self.per_sec(self.total_messages)
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.per_sec(self.total_bytes)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.start_time.map(|st| st.elapsed())
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_gaps(&self) -> u64 {
        self.total_gaps
    }

    pub fn gap_events(&self) -> u64 {
        self.gap_events
    }

    /// Fraction of `shard_size` consumed so far, as a percentage
    pub fn percent_of(&self, shard_size: u64) -> f64 {
        if shard_size == 0 {
            return 100.0;
        }
        (100.0 * self.total_bytes as f64 / shard_size as f64).min(100.0)
    }

    /// Log the statistics summary for `shard`
    pub fn log_summary(&self, shard: usize) {
        info!(
            shard,
            frames = self.total_frames,
            messages = self.total_messages,
            bytes = self.total_bytes,
            elapsed_ms = self.elapsed().map_or(0, |d| d.as_millis() as u64),
            messages_per_sec = self.messages_per_sec().round() as u64,
            mb_per_sec = (self.bytes_per_sec() / 1e4).round() / 100.0,
            gaps = self.total_gaps,
            gap_events = self.gap_events,
            "shard decoded"
        );
    }
}

impl Default for ShardStats {
    fn default() -> Self {
        Self::new()
    }
}
