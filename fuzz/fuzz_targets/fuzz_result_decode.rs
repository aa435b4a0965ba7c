//! Fuzz target for result payload decoding.
//!
//! Tests that `ResultCodec::decode` handles arbitrary payloads and separators
//! without panicking, and that whatever it accepts encodes and decodes again.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sos_core::model::schema::{Field, FieldKind};
use sos_core::model::{EncodingRule, ResultSchema};
use sos_core::ResultCodec;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    token_separator: &'a str,
    block_separator: &'a str,
    kinds: Vec<u8>,
    payload: &'a str,
}

fn kind(tag: u8) -> FieldKind {
    match tag % 6 {
        0 => FieldKind::Quantity,
        1 => FieldKind::Count,
        2 => FieldKind::Category,
        3 => FieldKind::Boolean,
        4 => FieldKind::Text,
        _ => FieldKind::Time,
    }
}

fuzz_target!(|input: Input<'_>| {
    let Ok(rule) = EncodingRule::new(input.token_separator, input.block_separator) else {
        return;
    };
    let fields = std::iter::once(Field::phenomenon_time())
        .chain(
            input
                .kinds
                .iter()
                .take(8)
                .enumerate()
                .map(|(i, tag)| Field::value(format!("f{}", i), kind(*tag), format!("urn:f{}", i))),
        )
        .collect();
    let Ok(schema) = ResultSchema::new(fields) else {
        return;
    };

    let codec = ResultCodec::default();
    // Decoding should never panic, only return an error for malformed input
    if let Ok(rows) = codec.decode(input.payload, &rule, &schema) {
        let _ = codec.encode(&rows, &rule, &schema);
    }
});
