//! Codec benchmarks for parley-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{codec, Frame};

fn bench_encode_send(c: &mut Criterion) {
    let frame = Frame::send("lobby", "a".repeat(64));

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("send_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_send(c: &mut Criterion) {
    let frame = Frame::send("lobby", "a".repeat(64));
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("send_64B", |b| b.iter(|| codec::decode(black_box(&encoded))));
    group.finish();
}

fn bench_roundtrip_presence(c: &mut Criterion) {
    let online: Vec<String> = (0..100).map(|i| format!("user-{i}")).collect();
    let frame = Frame::presence(online);

    c.bench_function("roundtrip_presence_100", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_send,
    bench_decode_send,
    bench_roundtrip_presence
);
criterion_main!(benches);
