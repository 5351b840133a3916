//! Benchmarks for value encoding and decoding.

#![allow(clippy::unwrap_used, missing_docs)]

use bytes::BytesMut;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use tds_types::{Numeric, SqlValue, TypeId, TypeInfo, decode_value, encode_value};

fn encoded(value: &SqlValue, info: &TypeInfo) -> bytes::Bytes {
    let mut buf = BytesMut::new();
    encode_value(value, info, &mut buf).unwrap();
    buf.freeze()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let cases = [
        ("int", SqlValue::Int(123_456), TypeInfo::int_n(4)),
        (
            "nvarchar_short",
            SqlValue::from("typical column value"),
            TypeInfo::nvarchar(100),
        ),
        (
            "nvarchar_max",
            SqlValue::from("x".repeat(16_000)),
            TypeInfo::nvarchar_max(),
        ),
        (
            "decimal",
            SqlValue::Decimal("12345678901234567890.123456".parse::<Numeric>().unwrap()),
            TypeInfo::numeric(38, 6),
        ),
        (
            "datetime2",
            SqlValue::DateTime(
                chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
                    .unwrap()
                    .and_hms_nano_opt(10, 30, 0, 123_456_700)
                    .unwrap(),
            ),
            TypeInfo::with_scale(TypeId::DateTime2, 7),
        ),
    ];

    for (name, value, info) in cases {
        let wire = encoded(&value, &info);
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut src = wire.clone();
                black_box(decode_value(&mut src, black_box(&info)).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    let text = SqlValue::from("Lorem ipsum dolor sit amet, consectetur adipiscing elit");
    let info = TypeInfo::for_value(&text);
    group.bench_function("nvarchar", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(256);
            encode_value(black_box(&text), &info, &mut buf).unwrap();
            black_box(buf)
        })
    });

    let uuid = SqlValue::Uuid(uuid::Uuid::new_v4());
    let info = TypeInfo::guid();
    group.bench_function("guid", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(32);
            encode_value(black_box(&uuid), &info, &mut buf).unwrap();
            black_box(buf)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
