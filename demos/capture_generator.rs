/// Synthetic TOPS capture generator
///
/// Writes a pcap of Ethernet/IPv4/UDP packets carrying TOPS 1.6 frames with
/// random quotes, trades and the occasional system event. Useful for testing
/// and benchmarking the converter.
///
/// Usage: capture_generator [OUTPUT] [FRAMES]

use rand::Rng;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tops_feed::capture::{ethernet_header, CaptureWriter};
use tops_feed::encoder::{
    ethernet_udp, quote_message, system_event_message, trade_message, FrameBuilder,
};

const SYMBOLS: &[&str] = &["AAPL", "MSFT", "IBM", "SPY", "QQQ", "ZIEXT"];

/// 2019-01-02T14:30:00Z
const START_NANOS: u64 = 1_546_439_400_000_000_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let output_path = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp/tops_sample.pcap"));
    let frame_count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10_000);

    let mut writer = CaptureWriter::create(&output_path, ethernet_header())?;
    let mut rng = rand::thread_rng();
    let mut sequence = 1u64;
    let mut stream_offset = 0u64;
    let mut clock = START_NANOS;
    let mut trade_id = 1u64;

    println!("Generating {} frames to {}", frame_count, output_path.display());

    for i in 0..frame_count {
        clock += rng.gen_range(1_000u64..5_000_000);
        let mut frame =
            FrameBuilder::new(0x4200_0001, sequence, clock).stream_offset(stream_offset);

        // Zero-message frames act as heartbeats
        let messages = if rng.gen_bool(0.05) { 0 } else { rng.gen_range(1..=4) };
        for _ in 0..messages {
            let symbol = SYMBOLS[rng.gen_range(0..SYMBOLS.len())];
            let mid = rng.gen_range(50_0000u64..500_0000) * 100;
            let block = match rng.gen_range(0..100) {
                0 => system_event_message(b'R', clock),
                1..=70 => {
                    let flags = if rng.gen_bool(0.1) { 0x40 } else { 0 };
                    quote_message(
                        flags,
                        clock,
                        symbol,
                        rng.gen_range(1..10) * 100,
                        mid - 100,
                        mid + 100,
                        rng.gen_range(1..10) * 100,
                    )
                }
                _ => {
                    trade_id += 1;
                    let flags = if rng.gen_bool(0.2) { 0x08 } else { 0 };
                    trade_message(flags, clock, symbol, rng.gen_range(1..500), mid, trade_id)
                }
            };
            stream_offset += block.len() as u64;
            frame = frame.message(&block);
        }
        sequence += messages;

        let packet = ethernet_udp(&frame.build())?;
        writer.write_packet(Duration::from_nanos(clock), &packet)?;

        if i % 1000 == 0 && i > 0 {
            println!("Generated {} frames", i);
        }
    }

    let bytes = writer.bytes_written();
    writer.finish()?;

    println!("Capture generation complete: {} frames, {} messages", frame_count, sequence - 1);
    println!("File size: {} bytes", bytes);

    Ok(())
}
