//! Benchmarks for TDS protocol encoding and decoding.

#![allow(clippy::unwrap_used, missing_docs)]

use bytes::{Bytes, BytesMut};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use tds_protocol::{
    encode_sql_batch,
    packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType},
    prelogin::{EncryptionLevel, PreLogin},
    token::{ColMetaData, Column, Done, DoneStatus, TokenDecoder, encode_row},
};
use tds_types::{SqlValue, TypeInfo};

fn bench_packet_header(c: &mut Criterion) {
    let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 1000);
    let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
    header.encode(&mut buf);
    let encoded = buf.freeze();

    c.bench_function("packet_header_encode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
            header.encode(&mut buf);
            black_box(buf)
        })
    });
    c.bench_function("packet_header_decode", |b| {
        b.iter(|| {
            let mut cursor = encoded.clone();
            black_box(PacketHeader::decode(&mut cursor).unwrap())
        })
    });
}

fn bench_prelogin(c: &mut Criterion) {
    let prelogin = PreLogin::new(EncryptionLevel::On).with_instance("SQLEXPRESS");
    let encoded = prelogin.encode();

    c.bench_function("prelogin_encode", |b| b.iter(|| black_box(prelogin.encode())));
    c.bench_function("prelogin_decode", |b| {
        b.iter(|| black_box(PreLogin::decode(&encoded).unwrap()))
    });
}

fn bench_sql_batch_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_batch_encode");

    let simple = "SELECT 1";
    group.throughput(Throughput::Bytes(simple.len() as u64));
    group.bench_function("simple", |b| {
        b.iter(|| black_box(encode_sql_batch(black_box(simple), 0)))
    });

    let large = "SELECT u.id, u.name, o.id AS order_id, o.total \
        FROM users u INNER JOIN orders o ON u.id = o.user_id \
        WHERE u.organization_id = 12345 AND o.status IN ('pending', 'shipped') \
        ORDER BY o.created_at DESC, u.name ASC";
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.bench_function("large", |b| {
        b.iter(|| black_box(encode_sql_batch(black_box(large), 0)))
    });

    group.finish();
}

fn bench_token_decode(c: &mut Criterion) {
    let metadata = ColMetaData::new(vec![
        Column::new("id", TypeInfo::int_n(8)),
        Column::new("name", TypeInfo::nvarchar(100)),
        Column::new("score", TypeInfo::float_n(8)),
    ]);
    let mut buf = BytesMut::new();
    metadata.encode(&mut buf).unwrap();
    for i in 0..1000i64 {
        let row = [
            SqlValue::BigInt(i),
            SqlValue::from(format!("user {i}")),
            SqlValue::Double(i as f64 / 3.0),
        ];
        encode_row(&metadata, &row, &mut buf).unwrap();
    }
    Done {
        status: DoneStatus::COUNT,
        cur_cmd: 0xC1,
        row_count: 1000,
    }
    .encode(&mut buf);
    let stream: Bytes = buf.freeze();

    let mut group = c.benchmark_group("token_decode");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("rows_1000", |b| {
        b.iter(|| {
            let mut decoder = TokenDecoder::new();
            let mut src = stream.clone();
            let mut count = 0;
            while let Some(token) = decoder.decode(&mut src).unwrap() {
                count += usize::from(matches!(token, tds_protocol::token::Token::Row(_)));
            }
            black_box(count)
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_packet_header,
    bench_prelogin,
    bench_sql_batch_encode,
    bench_token_decode,
);

criterion_main!(benches);
