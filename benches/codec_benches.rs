//! Benchmarks for the hot paths of a sampling cycle.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use s7_archiver::{build_read_request, parse_address, ReadItem, Value, ValueType, MAX_VARS};

const TAGS: [(&str, ValueType); 6] = [
    ("DB1.DBX2.3", ValueType::Bool),
    ("DB10.DBW4", ValueType::Int16),
    ("DB100.DBD120", ValueType::Float),
    ("MW6", ValueType::UInt16),
    ("IB0", ValueType::Byte),
    ("T5", ValueType::UInt16),
];

fn bench_parse_address(c: &mut Criterion) {
    c.bench_function("parse_address", |b| {
        b.iter(|| {
            for (address, _) in TAGS {
                black_box(parse_address(black_box(address)).ok());
            }
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let bytes = [0x41, 0x20, 0x00, 0x00];
    for ty in [ValueType::Bool, ValueType::Int16, ValueType::UInt32, ValueType::Float] {
        group.bench_function(ty.name(), |b| {
            b.iter(|| Value::decode(black_box(ty), black_box(&bytes)))
        });
    }
    group.finish();
}

fn bench_read_request(c: &mut Criterion) {
    let items: Vec<ReadItem> = TAGS
        .iter()
        .cycle()
        .take(MAX_VARS)
        .filter_map(|&(address, ty)| parse_address(address).ok()?.to_wire(ty).ok())
        .map(|wire| ReadItem::from_wire(&wire))
        .collect();

    c.bench_function("build_read_request", |b| {
        b.iter(|| build_read_request(black_box(&items), 480))
    });
}

criterion_group!(benches, bench_parse_address, bench_decode, bench_read_request);
criterion_main!(benches);
