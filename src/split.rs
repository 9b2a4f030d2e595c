/// Capture splitting
///
/// A splitter cuts one capture into shard files holding only whole packets,
/// each at most `max_shard_bytes` long unless a single packet is larger.
/// Shards are named `<prefix>NNNN` so that sorting by file name restores
/// capture order.

use crate::capture::{CaptureError, CaptureWriter, PCAP_FILE_HEADER_SIZE, PCAP_RECORD_HEADER_SIZE};
use pcap_file::pcap::PcapReader;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Minimum digits in a shard suffix
const SUFFIX_WIDTH: usize = 4;

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("cannot run {}: {source}", .program.display())]
    Spawn { program: PathBuf, source: io::Error },

    #[error("{} exited with {status}: {stderr}", .program.display())]
    Failed {
        program: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[error("split I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot split capture: {0}")]
    Capture(#[from] CaptureError),
}

pub trait CaptureSplitter: Send + Sync {
    /// Split `input` into shards named after `output_prefix`.
    /// Returns the shard paths in capture order.
    fn split(
        &self,
        input: &Path,
        output_prefix: &Path,
        max_shard_bytes: u64,
    ) -> Result<Vec<PathBuf>, SplitError>;
}

fn shard_path(prefix: &Path, index: usize, width: usize) -> PathBuf {
    let mut name: OsString = prefix.as_os_str().to_owned();
    name.push(format!("{index:0width$}"));
    PathBuf::from(name)
}

/// Runs `tcpdump -r <input> -w <prefix> -C <MB>` and renames its output
/// (`prefix`, `prefix1`, `prefix2`, ...) to zero-padded names.
#[derive(Debug, Clone)]
pub struct TcpdumpSplitter {
    program: PathBuf,
}

impl TcpdumpSplitter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        TcpdumpSplitter {
            program: program.into(),
        }
    }

    /// Rotation size in tcpdump's -C unit (millions of bytes), rounded up
    pub fn rotation_size(max_shard_bytes: u64) -> u64 {
        max_shard_bytes / 1_000_000 + 1
    }

    fn normalize_names(prefix: &Path) -> Result<Vec<PathBuf>, SplitError> {
        let dir = match prefix.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = prefix
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut numbered = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let Some(suffix) = name.strip_prefix(&stem) else {
                continue;
            };
            let number = if suffix.is_empty() {
                Some(0)
            } else if suffix.bytes().all(|b| b.is_ascii_digit()) {
                suffix.parse::<usize>().ok()
            } else {
                None
            };
            if let Some(n) = number {
                numbered.push((n, dir.join(&name)));
            }
        }
        numbered.sort();

        let width = numbered
            .last()
            .map_or(SUFFIX_WIDTH, |(n, _)| n.to_string().len().max(SUFFIX_WIDTH));
        let mut shards = Vec::with_capacity(numbered.len());
        for (n, path) in numbered {
            let target = shard_path(prefix, n, width);
            if target != path {
                fs::rename(&path, &target)?;
            }
            shards.push(target);
        }
        Ok(shards)
    }
}

impl Default for TcpdumpSplitter {
    fn default() -> Self {
        TcpdumpSplitter::new("tcpdump")
    }
}

impl CaptureSplitter for TcpdumpSplitter {
    fn split(
        &self,
        input: &Path,
        output_prefix: &Path,
        max_shard_bytes: u64,
    ) -> Result<Vec<PathBuf>, SplitError> {
        let size = Self::rotation_size(max_shard_bytes);
        debug!(program = %self.program.display(), size_mb = size, "running splitter");

        let output = Command::new(&self.program)
            .arg("-r")
            .arg(input)
            .arg("-w")
            .arg(output_prefix)
            .arg("-C")
            .arg(size.to_string())
            // keep write access to the workspace when started as root
            .arg("-Z")
            .arg("root")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| SplitError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SplitError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Self::normalize_names(output_prefix)
    }
}

/// In-process splitter with the same contract as `TcpdumpSplitter`
#[derive(Debug, Clone, Copy, Default)]
pub struct PcapSplitter;

impl CaptureSplitter for PcapSplitter {
    fn split(
        &self,
        input: &Path,
        output_prefix: &Path,
        max_shard_bytes: u64,
    ) -> Result<Vec<PathBuf>, SplitError> {
        let file = BufReader::with_capacity(1 << 20, File::open(input)?);
        let mut reader = PcapReader::new(file).map_err(CaptureError::from)?;
        let header = reader.header();

        let mut shards = Vec::new();
        let mut writer: Option<CaptureWriter<_>> = None;

        while let Some(packet) = reader.next_packet() {
            let packet = packet.map_err(CaptureError::from)?;
            let record_len = (PCAP_RECORD_HEADER_SIZE + packet.data.len()) as u64;

            let full = match &writer {
                None => true,
                Some(w) => {
                    w.bytes_written() > PCAP_FILE_HEADER_SIZE as u64
                        && w.bytes_written() + record_len > max_shard_bytes
                }
            };
            if full {
                if let Some(done) = writer.take() {
                    done.finish()?;
                }
                let path = shard_path(output_prefix, shards.len(), SUFFIX_WIDTH);
                writer = Some(CaptureWriter::create(&path, header)?);
                shards.push(path);
            }

            if let Some(w) = writer.as_mut() {
                w.copy_packet(&packet)?;
            }
        }

        if let Some(done) = writer.take() {
            done.finish()?;
        }
        Ok(shards)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitterKind {
    #[default]
    Tcpdump,
    Native,
}

impl fmt::Display for SplitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitterKind::Tcpdump => f.write_str("tcpdump"),
            SplitterKind::Native => f.write_str("native"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown splitter {0:?} (expected tcpdump or native)")]
pub struct UnknownSplitter(pub String);

impl FromStr for SplitterKind {
    type Err = UnknownSplitter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcpdump" => Ok(SplitterKind::Tcpdump),
            "native" | "pcap" => Ok(SplitterKind::Native),
            _ => Err(UnknownSplitter(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ethernet_header, CaptureReader};
    use crate::encoder::ethernet_udp;
    use std::time::Duration;

    fn write_capture(path: &Path, packets: usize, payload_len: usize) {
        let mut writer = CaptureWriter::create(path, ethernet_header()).unwrap();
        for i in 0..packets {
            let payload = vec![i as u8; payload_len];
            writer
                .write_packet(Duration::from_micros(i as u64), &ethernet_udp(&payload).unwrap())
                .unwrap();
        }
        writer.finish().unwrap();
    }

    fn payload_tags(path: &Path) -> Vec<u8> {
        let mut reader = CaptureReader::open(path).unwrap();
        let mut tags = Vec::new();
        while let Some(payload) = reader.next_payload() {
            tags.push(payload.unwrap().data[0]);
        }
        tags
    }

    #[test]
    fn test_pcap_splitter_keeps_whole_packets_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pcap");
        // each record: 16 + 14 + 20 + 8 + 58 = 116 bytes
        write_capture(&input, 10, 58);

        let shards = PcapSplitter
            .split(&input, &dir.path().join("split"), 24 + 3 * 116)
            .unwrap();

        let names: Vec<_> = shards
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["split0000", "split0001", "split0002", "split0003"]);

        let tags: Vec<u8> = shards.iter().flat_map(|p| payload_tags(p)).collect();
        assert_eq!(tags, (0..10).collect::<Vec<u8>>());
        assert_eq!(payload_tags(&shards[0]), [0, 1, 2]);
        assert_eq!(payload_tags(&shards[3]), [9]);
    }

    #[test]
    fn test_oversized_packet_gets_own_shard() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pcap");
        write_capture(&input, 3, 500);

        let shards = PcapSplitter.split(&input, &dir.path().join("split"), 100).unwrap();
        assert_eq!(shards.len(), 3);
    }

    #[test]
    fn test_empty_capture_has_no_shards() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pcap");
        write_capture(&input, 0, 0);
        let shards = PcapSplitter.split(&input, &dir.path().join("split"), 1000).unwrap();
        assert!(shards.is_empty());
    }

    #[test]
    fn test_tcpdump_names_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["split", "split1", "split2", "split10", "other", "split.json"] {
            fs::write(dir.path().join(name), name).unwrap();
        }

        let shards = TcpdumpSplitter::normalize_names(&dir.path().join("split")).unwrap();
        let names: Vec<_> = shards
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["split0000", "split0001", "split0002", "split0010"]);
        assert_eq!(fs::read_to_string(&shards[3]).unwrap(), "split10");
        assert!(dir.path().join("other").exists());
    }

    #[test]
    fn test_rotation_size() {
        assert_eq!(TcpdumpSplitter::rotation_size(0), 1);
        assert_eq!(TcpdumpSplitter::rotation_size(2_500_000), 3);
    }

    #[test]
    fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let splitter = TcpdumpSplitter::new(dir.path().join("no-such-tcpdump"));
        let err = splitter
            .split(&dir.path().join("in.pcap"), &dir.path().join("split"), 1000)
            .unwrap_err();
        assert!(matches!(err, SplitError::Spawn { .. }));
    }

    #[test]
    fn test_splitter_kind_parse() {
        assert_eq!("native".parse::<SplitterKind>(), Ok(SplitterKind::Native));
        assert_eq!("TCPDUMP".parse::<SplitterKind>(), Ok(SplitterKind::Tcpdump));
        assert!("scapy".parse::<SplitterKind>().is_err());
    }
}
