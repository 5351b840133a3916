//! Benchmarks for bulk row encoding.

#![allow(missing_docs, clippy::unwrap_used)]

use std::hint::black_box;

use bytes::BytesMut;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use tds_engine::{BulkColumn, BulkEncoder, BulkOptions, SqlValue, TypeInfo};

fn encoder() -> BulkEncoder {
    let columns = vec![
        BulkColumn::new("id", TypeInfo::int_n(8)).with_nullable(false),
        BulkColumn::new("name", TypeInfo::nvarchar(200)),
        BulkColumn::new("payload", TypeInfo::varbinary_max()),
    ];
    BulkEncoder::new(&columns, BulkOptions::new()).unwrap()
}

fn bench_encode_rows(c: &mut Criterion) {
    let encoder = encoder();
    let rows: Vec<Vec<SqlValue>> = (0..1000i64)
        .map(|i| {
            vec![
                SqlValue::BigInt(i),
                SqlValue::from(format!("customer {i}")),
                SqlValue::from(vec![(i % 251) as u8; 64]),
            ]
        })
        .collect();

    let mut group = c.benchmark_group("bulk");
    group.throughput(Throughput::Elements(rows.len() as u64));
    group.bench_function("encode_1000_rows", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(128 * 1024);
            for row in &rows {
                encoder.encode_row(row, &mut buf).unwrap();
            }
            black_box(buf)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_encode_rows);
criterion_main!(benches);
