/// Decode throughput and latency benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tops_feed::encoder::{quote_message, system_event_message, trade_message, FrameBuilder};
use tops_feed::{DecodedRecord, FrameDecoder, MessageDecoder, ProtocolVersion};

const TS: u64 = 1_600_000_000_000_000_000;

/// Frames of `per_frame` alternating quotes and trades
fn create_frames(frame_count: usize, per_frame: usize) -> Vec<Vec<u8>> {
    let mut seq = 1u64;
    (0..frame_count)
        .map(|f| {
            let mut builder = FrameBuilder::new(1, seq, TS + f as u64);
            for m in 0..per_frame {
                let ts = TS + seq;
                let block = if m % 2 == 0 {
                    quote_message(0x80, ts, "AAPL", 100, 1_500_000, 1_500_100, 200)
                } else {
                    trade_message(0x08, ts, "AAPL", 50, 1_500_050, seq)
                };
                builder = builder.message(&block);
                seq += 1;
            }
            builder.build()
        })
        .collect()
}

fn bench_frame_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_throughput");
    let decoder = FrameDecoder::new(ProtocolVersion::V2);

    for per_frame in [1usize, 8, 32].iter() {
        let frames = black_box(create_frames(1000, *per_frame));
        group.throughput(Throughput::Elements((1000 * per_frame) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(per_frame), per_frame, |b, _| {
            b.iter(|| {
                let mut count = 0;
                for frame in &frames {
                    if let Ok(header) = decoder.decode_messages(frame, |_| count += 1) {
                        black_box(header);
                    }
                }
                count
            });
        });
    }
    group.finish();
}

fn bench_decode_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_latency");
    let decoder = MessageDecoder::new(ProtocolVersion::V2);

    let quote = quote_message(0xC0, TS, "AAPL", 100, 1_234_500, 1_235_000, 200);
    let trade = trade_message(0x80, TS, "IBM", 100, 1_500_000, 7);
    let event = system_event_message(b'R', TS);

    group.bench_function("quote", |b| b.iter(|| decoder.decode_message(black_box(&quote), 0)));
    group.bench_function("trade", |b| b.iter(|| decoder.decode_message(black_box(&trade), 0)));
    group.bench_function("system_event", |b| {
        b.iter(|| decoder.decode_message(black_box(&event), 0))
    });

    group.finish();
}

fn bench_json_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_lines");
    let frames = create_frames(100, 8);
    let decoder = FrameDecoder::new(ProtocolVersion::V2);
    group.throughput(Throughput::Elements(800));

    group.bench_function("decode_and_serialize", |b| {
        let mut out = Vec::with_capacity(1 << 20);
        b.iter(|| {
            out.clear();
            for frame in &frames {
                let _ = decoder.decode_messages(frame, |msg| {
                    let _ = serde_json::to_writer(&mut out, &DecodedRecord::new(&msg));
                    out.push(b'\n');
                });
            }
            out.len()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_frame_throughput, bench_decode_latency, bench_json_lines);
criterion_main!(benches);
