//! Benchmarks verifying the wire codec's documented performance
//! characteristic: `JB` should stay cheap for payloads dominated by a
//! single large embedded blob, since the blob is appended raw rather than
//! base64-inflated into the JSON body.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use indexmap::IndexMap;

use portal_runtime::wire::{self, Envelope, Value};

fn make_value(blob_len: usize) -> Value {
    let mut map = IndexMap::new();
    map.insert("actorType".to_string(), Value::Str("OrderActor".to_string()));
    map.insert("id".to_string(), Value::List(vec![Value::Str("order-42".to_string())]));
    map.insert("payload".to_string(), Value::Bytes(bytes::Bytes::from(vec![0x41u8; blob_len])));
    Value::Map(map)
}

fn bench_jb_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("jb_envelope_roundtrip");
    for blob_len in [32usize, 1024, 64 * 1024] {
        group.bench_function(format!("encode_decode_{blob_len}_bytes"), |b| {
            b.iter_batched(
                || make_value(blob_len),
                |value| {
                    let encoded = wire::serialize(&value, Envelope::Jb, 64).unwrap();
                    wire::deserialize(&encoded, false).unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_envelope_detect(c: &mut Criterion) {
    let encoded = wire::serialize(&make_value(256), Envelope::Jb, 64).unwrap();
    c.bench_function("detect_jb_envelope", |b| b.iter(|| wire::detect(&encoded).unwrap()));
}

criterion_group!(benches, bench_jb_roundtrip, bench_envelope_detect);
criterion_main!(benches);
