/// Capture file access
///
/// `CaptureReader` walks a classic pcap file in order and yields the
/// application-layer payload of each packet, with link, IP and UDP/TCP headers
/// stripped. `CaptureWriter` writes whole packets back out, keeping the source
/// file's global header.

use etherparse::{SlicedPacket, TransportSlice};
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapReader, PcapWriter};
use pcap_file::{DataLink, PcapError, TsResolution};
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const READ_BUFFER_SIZE: usize = 1 << 20;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed capture: {0}")]
    Pcap(#[from] PcapError),

    #[error("unsupported link type {0:?}")]
    UnsupportedLinkType(DataLink),

    #[error("packet {index}: cannot slice headers: {reason}")]
    Headers { index: u64, reason: String },

    #[error("packet {index}: no UDP or TCP payload")]
    NoTransportPayload { index: u64 },
}

/// Application payload of one captured packet
#[derive(Debug)]
pub struct Payload<'a> {
    /// Position of the packet in the capture, starting at 0
    pub index: u64,
    pub timestamp: Duration,
    /// Bytes the packet occupies in the capture file (record header included)
    pub record_len: u64,
    pub data: Cow<'a, [u8]>,
}

pub struct CaptureReader<R: Read> {
    inner: PcapReader<R>,
    datalink: DataLink,
    next_index: u64,
}

impl CaptureReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let file = File::open(path)?;
        CaptureReader::new(BufReader::with_capacity(READ_BUFFER_SIZE, file))
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(reader: R) -> Result<Self, CaptureError> {
        let inner = PcapReader::new(reader)?;
        let datalink = inner.header().datalink;
        match datalink {
            DataLink::ETHERNET | DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => {}
            other => return Err(CaptureError::UnsupportedLinkType(other)),
        }
        Ok(CaptureReader {
            inner,
            datalink,
            next_index: 0,
        })
    }

    pub fn header(&self) -> PcapHeader {
        self.inner.header()
    }

    /// Next payload in file order; `None` at end of file
    pub fn next_payload(&mut self) -> Option<Result<Payload<'_>, CaptureError>> {
        let index = self.next_index;
        let datalink = self.datalink;
        let packet = match self.inner.next_packet()? {
            Ok(packet) => packet,
            Err(e) => return Some(Err(e.into())),
        };
        self.next_index += 1;

        let PcapPacket { timestamp, data, .. } = packet;
        let record_len = (PCAP_RECORD_HEADER_SIZE + data.len()) as u64;
        let data = match data {
            Cow::Borrowed(frame) => transport_payload(datalink, index, frame).map(Cow::Borrowed),
            Cow::Owned(frame) => {
                transport_payload(datalink, index, &frame).map(|p| Cow::Owned(p.to_vec()))
            }
        };

        Some(data.map(|data| Payload {
            index,
            timestamp,
            record_len,
            data,
        }))
    }
}

/// Per-packet record header size in a classic pcap file
pub const PCAP_RECORD_HEADER_SIZE: usize = 16;

/// Global header size of a classic pcap file
pub const PCAP_FILE_HEADER_SIZE: usize = 24;

fn transport_payload(datalink: DataLink, index: u64, frame: &[u8]) -> Result<&[u8], CaptureError> {
    let sliced = match datalink {
        DataLink::ETHERNET => SlicedPacket::from_ethernet(frame).map_err(|e| e.to_string()),
        _ => SlicedPacket::from_ip(frame).map_err(|e| e.to_string()),
    }
    .map_err(|reason| CaptureError::Headers { index, reason })?;

    match sliced.transport {
        Some(TransportSlice::Udp(udp)) => Ok(udp.payload()),
        Some(TransportSlice::Tcp(tcp)) => Ok(tcp.payload()),
        _ => Err(CaptureError::NoTransportPayload { index }),
    }
}

/// Global header for Ethernet captures with nanosecond timestamps
pub fn ethernet_header() -> PcapHeader {
    PcapHeader {
        datalink: DataLink::ETHERNET,
        ts_resolution: TsResolution::NanoSecond,
        ..PcapHeader::default()
    }
}

/// Writes raw packets to a pcap file
pub struct CaptureWriter<W: Write> {
    inner: PcapWriter<W>,
    written: u64,
}

impl CaptureWriter<BufWriter<File>> {
    pub fn create(path: &Path, header: PcapHeader) -> Result<Self, CaptureError> {
        let file = File::create(path)?;
        CaptureWriter::new(BufWriter::with_capacity(READ_BUFFER_SIZE, file), header)
    }
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(writer: W, header: PcapHeader) -> Result<Self, CaptureError> {
        let inner = PcapWriter::with_header(writer, header)?;
        Ok(CaptureWriter {
            inner,
            written: PCAP_FILE_HEADER_SIZE as u64,
        })
    }

    pub fn write_packet(&mut self, timestamp: Duration, frame: &[u8]) -> Result<(), CaptureError> {
        let packet = PcapPacket::new(timestamp, frame.len() as u32, frame);
        self.inner.write_packet(&packet)?;
        self.written += (PCAP_RECORD_HEADER_SIZE + frame.len()) as u64;
        Ok(())
    }

    /// Copy a packet read from another capture, keeping its original length
    pub fn copy_packet(&mut self, packet: &PcapPacket<'_>) -> Result<(), CaptureError> {
        self.inner.write_packet(packet)?;
        self.written += (PCAP_RECORD_HEADER_SIZE + packet.data.len()) as u64;
        Ok(())
    }

    /// Bytes written so far, file header included
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn finish(self) -> Result<(), CaptureError> {
        let mut writer = self.inner.into_writer();
        writer.flush()?;
        Ok(())
    }
}
