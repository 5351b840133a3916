//! Token stream decoding across arbitrary buffer boundaries.

#![allow(clippy::unwrap_used, clippy::panic)]

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tds_protocol::token::{ColMetaData, Column, Done, DoneStatus, Token, TokenDecoder, encode_row};
use tds_types::{SqlValue, TypeInfo};

fn two_result_sets() -> Bytes {
    let mut buf = BytesMut::new();

    let first = ColMetaData::new(vec![
        Column::new("id", TypeInfo::int_n(4)),
        Column::new("name", TypeInfo::nvarchar(40)),
    ]);
    first.encode(&mut buf).unwrap();
    for (id, name) in [(1, "alpha"), (2, "beta")] {
        encode_row(&first, &[SqlValue::Int(id), SqlValue::from(name)], &mut buf).unwrap();
    }
    Done {
        status: DoneStatus::MORE | DoneStatus::COUNT,
        cur_cmd: 0xC1,
        row_count: 2,
    }
    .encode(&mut buf);

    let second = ColMetaData::new(vec![Column::new("blob", TypeInfo::varbinary_max())]);
    second.encode(&mut buf).unwrap();
    encode_row(&second, &[SqlValue::from(vec![7u8; 9000])], &mut buf).unwrap();
    Done {
        status: DoneStatus::COUNT,
        cur_cmd: 0xC1,
        row_count: 1,
    }
    .encode(&mut buf);

    buf.freeze()
}

fn decode_whole(stream: &Bytes) -> Vec<Token> {
    let mut decoder = TokenDecoder::new();
    let mut src = stream.clone();
    let mut tokens = Vec::new();
    while let Some(token) = decoder.decode(&mut src).unwrap() {
        tokens.push(token);
    }
    tokens
}

#[test]
fn two_result_sets_in_order() {
    let tokens = decode_whole(&two_result_sets());
    let kinds: Vec<&str> = tokens
        .iter()
        .map(|t| match t {
            Token::ColMetaData(_) => "meta",
            Token::Row(_) => "row",
            Token::Done(_) => "done",
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(kinds, ["meta", "row", "row", "done", "meta", "row", "done"]);

    assert!(tokens[3].as_done().unwrap().has_more());
    assert!(!tokens[6].as_done().unwrap().has_more());

    let Token::Row(row) = &tokens[5] else {
        panic!("expected row");
    };
    assert_eq!(row.get(0).unwrap().as_ref().unwrap().as_bytes().unwrap().len(), 9000);
}

proptest! {
    #[test]
    fn chunked_feed_matches_whole(chunk in 1usize..600) {
        let stream = two_result_sets();
        let expected = decode_whole(&stream);

        let mut decoder = TokenDecoder::new();
        let mut pending = BytesMut::new();
        let mut tokens = Vec::new();
        for piece in stream.chunks(chunk) {
            pending.extend_from_slice(piece);
            let mut src = pending.clone().freeze();
            loop {
                match decoder.decode(&mut src) {
                    Ok(Some(token)) => tokens.push(token),
                    Ok(None) => break,
                    Err(e) => {
                        prop_assert!(e.is_incomplete(), "{e}");
                        break;
                    }
                }
            }
            pending = BytesMut::from(&src[..]);
        }

        prop_assert!(pending.is_empty());
        prop_assert_eq!(tokens, expected);
    }
}
