/// TOPS Feed - IEX-TP / TOPS capture decoder
///
/// Converts packet captures of IEX TOPS market data into newline-delimited
/// JSON, one object per message. Features include:
/// - Table-driven message layouts for TOPS 1.5 and TOPS 1.6
/// - Per-version flag byte decoding
/// - Transport frame decoding with count and length validation
/// - Parallel split / decode / ordered merge over a private workspace
/// - Sequence gap detection and per-shard throughput statistics

pub mod protocol;
pub mod schema;
pub mod flags;
pub mod decoder;
pub mod record;
pub mod encoder;
pub mod capture;
pub mod gap_detector;
pub mod stats;
pub mod worker;
pub mod split;
pub mod pipeline;

pub use protocol::{MessageType, ProtocolVersion, TransportHeader, HEADER_SIZE};
pub use schema::{FieldKind, FieldSpec, FlagBit, MessageLayout, Schema};
pub use flags::{decode_flags, FlagSet};
pub use decoder::{DecodeError, FieldValue, FrameDecoder, Message, MessageDecoder, TransportFrame};
pub use record::{format_timestamp, DecodedRecord};
pub use capture::{CaptureError, CaptureReader, CaptureWriter};
pub use gap_detector::GapDetector;
pub use stats::ShardStats;
pub use worker::{ShardJob, ShardSummary, ShardWorker, WorkerError};
pub use split::{CaptureSplitter, PcapSplitter, SplitError, SplitterKind, TcpdumpSplitter};
pub use pipeline::{
    merge_outputs, Pipeline, PipelineConfig, PipelineError, PipelineSummary, WorkspaceRegistry,
};
