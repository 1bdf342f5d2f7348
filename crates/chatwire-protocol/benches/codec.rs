//! Codec benchmarks for chatwire-protocol.

use bytes::BytesMut;
use chatwire_protocol::{codec, ChatMessage, Envelope, OutboundEvent};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn sample_chat() -> OutboundEvent {
    OutboundEvent::chat(ChatMessage {
        id: 1,
        sender_id: 1,
        recipient_id: 2,
        content: "x".repeat(64),
        is_read: false,
        created_at: chrono::Utc::now(),
    })
}

fn bench_decode_inbound(c: &mut Criterion) {
    let raw = br#"{"type":"chat","content":"hello there","recipient":2,"timestamp":"2024-05-01T10:00:00Z"}"#;

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(raw.len() as u64));
    group.bench_function("inbound_chat", |b| {
        b.iter(|| codec::decode_inbound(black_box(raw)))
    });
    group.finish();
}

fn bench_encode_outbound(c: &mut Criterion) {
    let event = sample_chat();

    c.bench_function("encode_outbound_chat", |b| {
        b.iter(|| codec::encode_outbound(black_box(&event)))
    });
}

fn bench_envelope_roundtrip(c: &mut Criterion) {
    let payload = codec::encode_outbound(&sample_chat()).unwrap();
    let envelope = Envelope::new(2, payload);

    c.bench_function("envelope_roundtrip", |b| {
        b.iter(|| {
            let encoded = codec::encode_envelope(black_box(&envelope)).unwrap();
            codec::decode_envelope(black_box(&encoded)).unwrap()
        })
    });
}

fn bench_coalesce(c: &mut Criterion) {
    let payload = codec::encode_outbound(&OutboundEvent::typing(1)).unwrap();

    c.bench_function("coalesce_32", |b| {
        b.iter(|| {
            let mut buf = BytesMut::new();
            for _ in 0..32 {
                codec::append_to_batch(&mut buf, black_box(&payload));
            }
            buf
        })
    });
}

criterion_group!(
    benches,
    bench_decode_inbound,
    bench_encode_outbound,
    bench_envelope_roundtrip,
    bench_coalesce
);
criterion_main!(benches);
