/// Benchmarks for inbound frame decoding, the per-message hot path of the connection
/// manager.
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use socket_relay::ws::codec::{decode_text, decode_value};
use socket_relay::ws::{FrameCodec as _, JsonCodec, MessageEnvelope};

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/decode");

    let typed = r#"{"type":"ticker","symbol":"BTC-USD","price":100,"volume":"12.5"}"#;
    group.throughput(Throughput::Bytes(typed.len() as u64));
    group.bench_function("typed_json", |b| {
        b.iter(|| decode_text(std::hint::black_box(typed)));
    });

    let untyped = r#"{"symbol":"BTC-USD","bids":[["100.0","1"]],"asks":[["100.5","2"]]}"#;
    group.throughput(Throughput::Bytes(untyped.len() as u64));
    group.bench_function("untyped_json", |b| {
        b.iter(|| decode_text(std::hint::black_box(untyped)));
    });

    let plain = "hello from the echo server";
    group.throughput(Throughput::Bytes(plain.len() as u64));
    group.bench_function("plain_text", |b| {
        b.iter(|| decode_text(std::hint::black_box(plain)));
    });

    let value = json!({ "type": "status", "ok": true });
    group.bench_function("structured_value", |b| {
        b.iter(|| decode_value(std::hint::black_box(value.clone())));
    });

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/encode");
    let envelope = MessageEnvelope::new(
        "subscribe",
        json!({ "channels": ["ticker", "trades"], "symbols": ["BTC-USD", "ETH-USD"] }),
    );

    let codec = JsonCodec::default();
    group.bench_function("envelope", |b| {
        b.iter(|| {
            codec
                .encode(std::hint::black_box(&envelope))
                .expect("Serialization should succeed")
        });
    });

    let codec = JsonCodec::payload_only();
    group.bench_function("payload_only", |b| {
        b.iter(|| {
            codec
                .encode(std::hint::black_box(&envelope))
                .expect("Serialization should succeed")
        });
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
