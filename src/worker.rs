/// Shard worker
///
/// Decodes every captured payload of one shard, in file order, and writes one
/// JSON line per message to the shard's output file. The first malformed
/// payload aborts the shard.

use crate::capture::{CaptureError, CaptureReader};
use crate::decoder::{DecodeError, FrameDecoder};
use crate::gap_detector::GapDetector;
use crate::protocol::ProtocolVersion;
use crate::record::DecodedRecord;
use crate::stats::ShardStats;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const WRITE_BUFFER_SIZE: usize = 1 << 20;

/// Payloads between two progress reports
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// One unit of work: decode `input` into `output`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardJob {
    pub index: usize,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl ShardJob {
    /// Job writing next to its shard as `<shard>.json`
    pub fn new(index: usize, input: PathBuf) -> Self {
        let mut output = input.clone().into_os_string();
        output.push(".json");
        ShardJob {
            index,
            input,
            output: PathBuf::from(output),
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("shard {}: payload {payload_index}: {source}", .shard.display())]
    Decode {
        shard: PathBuf,
        payload_index: u64,
        source: DecodeError,
    },

    #[error("shard {}: {source}", .shard.display())]
    Capture { shard: PathBuf, source: CaptureError },

    #[error("shard {}: cannot write {}: {source}", .shard.display(), .output.display())]
    Output {
        shard: PathBuf,
        output: PathBuf,
        source: io::Error,
    },

    #[error("shard {}: cannot serialize record: {source}", .shard.display())]
    Serialize {
        shard: PathBuf,
        source: serde_json::Error,
    },
}

impl WorkerError {
    /// Shard file the failure belongs to
    pub fn shard(&self) -> &Path {
        match self {
            WorkerError::Decode { shard, .. }
            | WorkerError::Capture { shard, .. }
            | WorkerError::Output { shard, .. }
            | WorkerError::Serialize { shard, .. } => shard,
        }
    }
}

/// Counters for one successfully decoded shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSummary {
    pub index: usize,
    pub frames: u64,
    pub messages: u64,
    pub bytes: u64,
    pub gaps: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ShardWorker {
    decoder: FrameDecoder,
    progress_interval: u64,
}

impl ShardWorker {
    pub fn new(version: ProtocolVersion) -> Self {
        ShardWorker {
            decoder: FrameDecoder::new(version),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Report progress every `interval` payloads; 0 disables reports
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn run(&self, job: &ShardJob) -> Result<ShardSummary, WorkerError> {
        let capture_err = |source: CaptureError| WorkerError::Capture {
            shard: job.input.clone(),
            source,
        };
        let output_err = |source: io::Error| WorkerError::Output {
            shard: job.input.clone(),
            output: job.output.clone(),
            source,
        };

        let shard_size = fs::metadata(&job.input)
            .map_err(|e| capture_err(e.into()))?
            .len();
        let mut reader = CaptureReader::open(&job.input).map_err(capture_err)?;
        let file = File::create(&job.output).map_err(output_err)?;
        let mut out = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        debug!(
            shard = job.index,
            input = %job.input.display(),
            bytes = shard_size,
            "shard started"
        );

        let mut stats = ShardStats::new();
        let mut gaps = GapDetector::new();

        while let Some(next) = reader.next_payload() {
            let payload = next.map_err(capture_err)?;
            let frame = self
                .decoder
                .decode_frame(&payload.data)
                .map_err(|source| WorkerError::Decode {
                    shard: job.input.clone(),
                    payload_index: payload.index,
                    source,
                })?;

            for msg in &frame.messages {
                serde_json::to_writer(&mut out, &DecodedRecord::new(msg)).map_err(|source| {
                    WorkerError::Serialize {
                        shard: job.input.clone(),
                        source,
                    }
                })?;
                out.write_all(b"\n").map_err(output_err)?;
            }

            let header = &frame.header;
            let gap = gaps.process(header.first_sequence_number, header.message_count);
            if let Some((start, end)) = gap {
                stats.record_gap(end - start + 1);
                warn!(shard = job.index, start, end, "sequence gap");
            }
            stats.record_frame(payload.record_len, frame.messages.len() as u64);

            if self.progress_interval > 0 && payload.index % self.progress_interval == 0 {
                info!(
                    shard = job.index,
                    percent = (stats.percent_of(shard_size) * 100.0).round() / 100.0,
                    "decoding"
                );
            }
        }

        out.flush().map_err(output_err)?;
        stats.log_summary(job.index);

        Ok(ShardSummary {
            index: job.index,
            frames: stats.total_frames(),
            messages: stats.total_messages(),
            bytes: stats.total_bytes(),
            gaps: stats.total_gaps(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ethernet_header, CaptureWriter};
    use crate::encoder::{ethernet_udp, system_event_message, trade_message, FrameBuilder};
    use std::time::Duration;

    #[test]
    fn test_decodes_shard_to_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let job = ShardJob::new(0, dir.path().join("split0000"));
        let frames = [
            FrameBuilder::new(1, 1, 0)
                .message(&system_event_message(b'O', 5))
                .message(&trade_message(0, 6, "IBM", 10, 1_500_000, 1))
                .build(),
            // sequences 3 and 4 are missing
            FrameBuilder::new(1, 5, 0)
                .message(&trade_message(0x80, 7, "IBM", 20, 1_500_100, 2))
                .build(),
        ];
        let mut writer = CaptureWriter::create(&job.input, ethernet_header()).unwrap();
        for frame in &frames {
            writer
                .write_packet(Duration::ZERO, &ethernet_udp(frame).unwrap())
                .unwrap();
        }
        writer.finish().unwrap();

        let summary = ShardWorker::new(ProtocolVersion::V2)
            .with_progress_interval(1)
            .run(&job)
            .unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.messages, 3);
        assert_eq!(summary.gaps, 2);
        assert_eq!(summary.bytes, fs::metadata(&job.input).unwrap().len() - 24);

        let text = fs::read_to_string(&job.output).unwrap();
        let types: Vec<String> = text
            .lines()
            .map(|line| {
                let v: serde_json::Value = serde_json::from_str(line).unwrap();
                v["messageType"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(types, ["S", "T", "T"]);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_job_output_name() {
        let job = ShardJob::new(3, PathBuf::from("/tmp/ws/split0003"));
        assert_eq!(job.output, PathBuf::from("/tmp/ws/split0003.json"));
        assert_eq!(job.index, 3);
    }

    #[test]
    fn test_missing_shard_is_capture_error() {
        let dir = tempfile::tempdir().unwrap();
        let job = ShardJob::new(0, dir.path().join("split0000"));
        let err = ShardWorker::new(ProtocolVersion::V2).run(&job).unwrap_err();
        assert!(matches!(err, WorkerError::Capture { .. }));
        assert_eq!(err.shard(), job.input.as_path());
    }
}
