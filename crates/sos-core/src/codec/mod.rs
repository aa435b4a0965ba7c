//! Text result codec.
//!
//! Grammar of a payload:
//!
//! ```text
//! payload := [countToken blockSeparator] block (blockSeparator block)*
//! block   := token (tokenSeparator token)*
//! ```
//!
//! Every block must carry exactly one token per schema field. Tokens map to
//! fields by position: time-role fields parse as instants or `start/end`
//! periods, value fields parse by their kind. Decoding is a pure function of
//! its inputs and fails on the first malformed block.

pub mod prefix;

use crate::model::schema::{FieldKind, FieldRole, ResultSchema};
use crate::model::time::{ResultTime, TimeParseError, TimeValue};
use crate::model::{EncodingRule, TypedValue};
use prefix::{strip_row_count_prefix, RowCountPrefix};
use sos_common::Error;
use sos_config::DEFAULT_NO_DATA_VALUE;
use thiserror::Error;
use tracing::{debug, warn};

/// One decoded block.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRow {
    pub phenomenon_time: Option<TimeValue>,
    pub result_time: Option<ResultTime>,
    /// One entry per value field, in schema order.
    pub values: Vec<TypedValue>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeErrorKind {
    #[error("expected {expected} tokens, found {actual}")]
    TokenCount { expected: usize, actual: usize },

    #[error("'{token}' is not a decimal number")]
    Quantity { token: String },

    #[error("'{token}' is not an integer")]
    Count { token: String },

    #[error("'{token}' is not a boolean")]
    Boolean { token: String },

    #[error(transparent)]
    Time(#[from] TimeParseError),

    #[error("field '{name}' is a nested record")]
    Composite { name: String },
}

/// Decode failure with its position in the payload.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("block {block}{}: {kind}", field_label(.field))]
pub struct DecodeError {
    /// Zero-based index of the data block (after any count prefix).
    pub block: usize,
    /// Zero-based field index, absent for block-level failures.
    pub field: Option<usize>,
    pub kind: DecodeErrorKind,
}

fn field_label(field: &Option<usize>) -> String {
    field.map(|f| format!(", field {}", f)).unwrap_or_default()
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::invalid("resultValues", err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeErrorKind {
    #[error("{actual} values but the schema declares {expected}")]
    ValueCount { expected: usize, actual: usize },

    #[error("'{token}' contains a token or block separator")]
    Separator { token: String },

    #[error("'{token}' would decode as the no-data marker")]
    NoData { token: String },

    #[error("{value} has no token form")]
    NotFinite { value: f64 },

    /// The finished payload does not split back into the rows' tokens.
    #[error("'{token}' runs into an adjacent separator")]
    Ambiguous { token: String },
}

/// Rows handed to [`ResultCodec::encode`] that have no faithful payload form.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("row {row}{}: {kind}", field_label(.field))]
pub struct EncodeError {
    pub row: usize,
    /// Zero-based schema field index, absent for row-level failures.
    pub field: Option<usize>,
    pub kind: EncodeErrorKind,
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Error::invalid("resultValues", err.to_string())
    }
}

/// Encoder/decoder bound to a no-data token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultCodec {
    no_data_value: String,
}

impl Default for ResultCodec {
    fn default() -> Self {
        ResultCodec::new(DEFAULT_NO_DATA_VALUE)
    }
}

impl ResultCodec {
    pub fn new(no_data_value: impl Into<String>) -> Self {
        ResultCodec {
            no_data_value: no_data_value.into(),
        }
    }

    pub fn no_data_value(&self) -> &str {
        &self.no_data_value
    }

    /// Decode a payload into rows, one per data block.
    pub fn decode(
        &self,
        payload: &str,
        rule: &EncodingRule,
        schema: &ResultSchema,
    ) -> Result<Vec<DecodedRow>, DecodeError> {
        if let Some((index, field)) = schema.first_composite() {
            return Err(DecodeError {
                block: 0,
                field: Some(index),
                kind: DecodeErrorKind::Composite {
                    name: field.name.clone(),
                },
            });
        }

        let mut blocks: Vec<&str> = payload.split(rule.block_separator.as_str()).collect();
        while blocks.last().is_some_and(|b| b.is_empty()) {
            blocks.pop();
        }

        let (prefix, data) = strip_row_count_prefix(&blocks, &rule.token_separator);
        if let RowCountPrefix::Present { declared } = prefix {
            match declared {
                Some(n) if n == data.len() => {}
                Some(n) => warn!(declared = n, actual = data.len(), "row count prefix disagrees with payload"),
                None => debug!("leading block without token separator treated as row count"),
            }
        }

        data.iter()
            .enumerate()
            .map(|(index, block)| self.decode_block(index, block, rule, schema))
            .collect()
    }

    fn decode_block(
        &self,
        block_index: usize,
        block: &str,
        rule: &EncodingRule,
        schema: &ResultSchema,
    ) -> Result<DecodedRow, DecodeError> {
        let tokens: Vec<&str> = block.split(rule.token_separator.as_str()).collect();
        if tokens.len() != schema.field_count() {
            return Err(DecodeError {
                block: block_index,
                field: None,
                kind: DecodeErrorKind::TokenCount {
                    expected: schema.field_count(),
                    actual: tokens.len(),
                },
            });
        }

        let mut row = DecodedRow {
            phenomenon_time: None,
            result_time: None,
            values: Vec::with_capacity(schema.value_count()),
        };
        for (field_index, (field, token)) in schema.fields.iter().zip(&tokens).enumerate() {
            let at = |kind: DecodeErrorKind| DecodeError {
                block: block_index,
                field: Some(field_index),
                kind,
            };
            let no_data = *token == self.no_data_value;
            match field.role() {
                FieldRole::PhenomenonTime if !no_data => {
                    row.phenomenon_time = Some(TimeValue::parse(token).map_err(|e| at(e.into()))?);
                }
                FieldRole::ResultTime if !no_data => {
                    row.result_time = Some(ResultTime::parse(token).map_err(|e| at(e.into()))?);
                }
                FieldRole::PhenomenonTime | FieldRole::ResultTime => {}
                FieldRole::Value if no_data => row.values.push(TypedValue::NoData),
                FieldRole::Value => row.values.push(parse_value(&field.kind, &field.name, token).map_err(at)?),
            }
        }
        Ok(row)
    }

    /// Encode rows. Always writes the row-count prefix.
    ///
    /// Fails on any row the payload could not carry back unchanged: a token
    /// holding a separator, a value spelled like the no-data marker, a
    /// non-finite quantity.
    pub fn encode(
        &self,
        rows: &[DecodedRow],
        rule: &EncodingRule,
        schema: &ResultSchema,
    ) -> Result<String, EncodeError> {
        let expected = schema.value_count();
        let mut encoded: Vec<Vec<String>> = Vec::with_capacity(rows.len());

        for (index, row) in rows.iter().enumerate() {
            if row.values.len() != expected {
                return Err(EncodeError {
                    row: index,
                    field: None,
                    kind: EncodeErrorKind::ValueCount {
                        expected,
                        actual: row.values.len(),
                    },
                });
            }
            let mut values = row.values.iter();
            let mut tokens = Vec::with_capacity(schema.field_count());
            for (field_index, field) in schema.fields.iter().enumerate() {
                let token = match field.role() {
                    FieldRole::PhenomenonTime => {
                        row.phenomenon_time.as_ref().map(TimeValue::to_token)
                    }
                    FieldRole::ResultTime => row.result_time.as_ref().map(ResultTime::to_token),
                    FieldRole::Value => match values.next() {
                        Some(TypedValue::Quantity(v)) if !v.is_finite() => {
                            return Err(EncodeError {
                                row: index,
                                field: Some(field_index),
                                kind: EncodeErrorKind::NotFinite { value: *v },
                            });
                        }
                        Some(value) if !value.is_no_data() => {
                            Some(value.to_token(&self.no_data_value))
                        }
                        _ => None,
                    },
                };
                match token {
                    Some(token) => {
                        self.check_token(&token, rule).map_err(|kind| EncodeError {
                            row: index,
                            field: Some(field_index),
                            kind,
                        })?;
                        tokens.push(token);
                    }
                    None => tokens.push(self.no_data_value.clone()),
                }
            }
            encoded.push(tokens);
        }

        let mut blocks = Vec::with_capacity(rows.len() + 1);
        blocks.push(rows.len().to_string());
        blocks.extend(encoded.iter().map(|tokens| tokens.join(&rule.token_separator)));
        let payload = blocks.join(&rule.block_separator);

        verify_layout(&payload, &encoded, rule)?;
        Ok(payload)
    }

    fn check_token(&self, token: &str, rule: &EncodingRule) -> Result<(), EncodeErrorKind> {
        if token.contains(rule.token_separator.as_str())
            || token.contains(rule.block_separator.as_str())
        {
            Err(EncodeErrorKind::Separator {
                token: token.to_string(),
            })
        } else if token == self.no_data_value {
            Err(EncodeErrorKind::NoData {
                token: token.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Split `payload` the way [`ResultCodec::decode`] does and confirm every
/// block comes back as the tokens it was built from. Catches separators
/// formed across a token boundary, and empty single-field rows the decoder
/// would drop as trailing blocks.
fn verify_layout(payload: &str, encoded: &[Vec<String>], rule: &EncodingRule) -> Result<(), EncodeError> {
    let mut blocks: Vec<&str> = payload.split(rule.block_separator.as_str()).collect();
    while blocks.last().is_some_and(|b| b.is_empty()) {
        blocks.pop();
    }
    let last_row = encoded.len().saturating_sub(1);
    let prefix = encoded.len().to_string();
    if blocks.first().copied() != Some(prefix.as_str())
        || prefix.contains(rule.token_separator.as_str())
    {
        return Err(EncodeError {
            row: 0,
            field: None,
            kind: EncodeErrorKind::Ambiguous { token: prefix },
        });
    }

    for (row, tokens) in encoded.iter().enumerate() {
        let actual: Vec<&str> = blocks
            .get(row + 1)
            .map(|block| block.split(rule.token_separator.as_str()).collect())
            .unwrap_or_default();
        let mismatch = tokens
            .iter()
            .zip(&actual)
            .position(|(want, got)| want != got)
            .or_else(|| (tokens.len() != actual.len()).then(|| tokens.len().min(actual.len())));
        if let Some(field) = mismatch {
            let field = field.min(tokens.len().saturating_sub(1));
            return Err(EncodeError {
                row,
                field: Some(field),
                kind: EncodeErrorKind::Ambiguous {
                    token: tokens.get(field).cloned().unwrap_or_default(),
                },
            });
        }
    }
    if blocks.len() != encoded.len() + 1 {
        return Err(EncodeError {
            row: last_row,
            field: None,
            kind: EncodeErrorKind::Ambiguous {
                token: String::new(),
            },
        });
    }
    Ok(())
}

fn parse_value(kind: &FieldKind, name: &str, token: &str) -> Result<TypedValue, DecodeErrorKind> {
    let trimmed = token.trim();
    match kind {
        FieldKind::Quantity => trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(TypedValue::Quantity)
            .ok_or_else(|| DecodeErrorKind::Quantity {
                token: token.to_string(),
            }),
        FieldKind::Count => trimmed
            .parse::<i64>()
            .map(TypedValue::Count)
            .map_err(|_| DecodeErrorKind::Count {
                token: token.to_string(),
            }),
        FieldKind::Boolean => match trimmed {
            "true" | "1" => Ok(TypedValue::Boolean(true)),
            "false" | "0" => Ok(TypedValue::Boolean(false)),
            _ => Err(DecodeErrorKind::Boolean {
                token: token.to_string(),
            }),
        },
        FieldKind::Category => Ok(TypedValue::Category(token.to_string())),
        FieldKind::Text => Ok(TypedValue::Text(token.to_string())),
        FieldKind::Time => Ok(TypedValue::Time(TimeValue::parse(token)?)),
        FieldKind::Record { .. } => Err(DecodeErrorKind::Composite {
            name: name.to_string(),
        }),
    }
}

/// Decode with the default no-data token.
pub fn decode(
    payload: &str,
    rule: &EncodingRule,
    schema: &ResultSchema,
) -> Result<Vec<DecodedRow>, DecodeError> {
    ResultCodec::default().decode(payload, rule, schema)
}

/// Encode with the default no-data token.
pub fn encode(
    rows: &[DecodedRow],
    rule: &EncodingRule,
    schema: &ResultSchema,
) -> Result<String, EncodeError> {
    ResultCodec::default().encode(rows, rule, schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::{Field, FieldKind};
    use crate::model::time::parse_instant;

    fn rule() -> EncodingRule {
        EncodingRule::new(",", ";").unwrap()
    }

    fn temperature_schema() -> ResultSchema {
        ResultSchema::new(vec![
            Field::phenomenon_time(),
            Field::value("temp", FieldKind::Quantity, "urn:ogc:def:property:Temperature").with_unit("Cel"),
        ])
        .unwrap()
    }

    fn three_value_schema() -> ResultSchema {
        ResultSchema::new(vec![
            Field::phenomenon_time(),
            Field::value("a", FieldKind::Quantity, "urn:a"),
            Field::value("b", FieldKind::Count, "urn:b"),
            Field::value("c", FieldKind::Boolean, "urn:c"),
        ])
        .unwrap()
    }

    #[test]
    fn test_decode_two_temperature_rows() {
        let rows = decode(
            "2;2012-11-19T00:00:00Z,5.2;2012-11-19T00:10:00Z,5.4",
            &rule(),
            &temperature_schema(),
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].phenomenon_time,
            Some(TimeValue::instant(parse_instant("2012-11-19T00:00:00Z").unwrap()))
        );
        assert_eq!(rows[0].values, vec![TypedValue::Quantity(5.2)]);
        assert_eq!(rows[1].values, vec![TypedValue::Quantity(5.4)]);
    }

    #[test]
    fn test_decode_without_prefix() {
        let rows = decode(
            "2012-11-19T00:00:00Z,5.2;2012-11-19T00:10:00Z,5.4",
            &rule(),
            &temperature_schema(),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_trailing_block_separator_ignored() {
        let rows = decode("1;2012-11-19T00:00:00Z,5.2;", &rule(), &temperature_schema()).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_multi_character_separators_are_literal() {
        let rule = EncodingRule::new("|", "@@").unwrap();
        let rows = decode(
            "2@@2012-11-19T00:00:00Z|1.5@@2012-11-19T00:10:00Z|2.5",
            &rule,
            &temperature_schema(),
        )
        .unwrap();
        assert_eq!(rows[1].values, vec![TypedValue::Quantity(2.5)]);
    }

    #[test]
    fn test_token_count_mismatch_names_block() {
        let err = decode(
            "2;2012-11-19T00:00:00Z,1.0,2,true;2012-11-19T00:10:00Z,1.0,2",
            &rule(),
            &three_value_schema(),
        )
        .unwrap_err();

        assert_eq!(err.block, 1);
        assert_eq!(err.field, None);
        assert_eq!(
            err.kind,
            DecodeErrorKind::TokenCount {
                expected: 4,
                actual: 3
            }
        );
        let converted: Error = err.into();
        assert_eq!(converted.code(), 11);
        assert!(converted.to_string().contains("block 1"));
    }

    #[test]
    fn test_malformed_number_names_field() {
        let err = decode("1;2012-11-19T00:00:00Z,warm", &rule(), &temperature_schema()).unwrap_err();
        assert_eq!(err.block, 0);
        assert_eq!(err.field, Some(1));
        assert!(matches!(err.kind, DecodeErrorKind::Quantity { .. }));
    }

    #[test]
    fn test_bad_time_token() {
        let err = decode("1;not-a-time,5.0", &rule(), &temperature_schema()).unwrap_err();
        assert_eq!(err.field, Some(0));
        assert!(matches!(err.kind, DecodeErrorKind::Time(_)));
    }

    #[test]
    fn test_no_data_tokens() {
        let rows = decode("2;noData,5.0;2012-11-19T00:00:00Z,noData", &rule(), &temperature_schema()).unwrap();
        assert_eq!(rows[0].phenomenon_time, None);
        assert_eq!(rows[1].values, vec![TypedValue::NoData]);
    }

    #[test]
    fn test_configured_no_data_token() {
        let codec = ResultCodec::new("-");
        let rows = codec
            .decode("1;2012-11-19T00:00:00Z,-", &rule(), &temperature_schema())
            .unwrap();
        assert!(rows[0].values[0].is_no_data());
        assert_eq!(
            codec.encode(&rows, &rule(), &temperature_schema()).unwrap(),
            "1;2012-11-19T00:00:00Z,-"
        );
    }

    #[test]
    fn test_count_and_boolean_values() {
        let rows = decode("1;2012-11-19T00:00:00Z,0.5,42,1", &rule(), &three_value_schema()).unwrap();
        assert_eq!(
            rows[0].values,
            vec![
                TypedValue::Quantity(0.5),
                TypedValue::Count(42),
                TypedValue::Boolean(true)
            ]
        );
        let err = decode("1;2012-11-19T00:00:00Z,0.5,4.2,1", &rule(), &three_value_schema()).unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::Count { .. }));
    }

    #[test]
    fn test_result_time_inherit_marker() {
        let schema = ResultSchema::new(vec![
            Field::phenomenon_time(),
            Field::result_time(),
            Field::value("state", FieldKind::Category, "urn:state"),
        ])
        .unwrap();
        let rows = decode("1;2012-11-19T00:00:00Z,#phenomenonTime,open", &rule(), &schema).unwrap();
        assert_eq!(rows[0].result_time, Some(ResultTime::Inherit));
        assert_eq!(rows[0].values, vec![TypedValue::Category("open".into())]);
    }

    #[test]
    fn test_composite_schema_rejected() {
        let schema = ResultSchema::new(vec![
            Field::phenomenon_time(),
            Field::value(
                "pos",
                FieldKind::Record {
                    fields: vec![Field::value("lat", FieldKind::Quantity, "urn:lat")],
                },
                "urn:pos",
            ),
        ])
        .unwrap();
        let err = decode("1;2012-11-19T00:00:00Z,1", &rule(), &schema).unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::Composite { .. }));
    }

    #[test]
    fn test_encode_writes_prefix_and_units_free_numbers() {
        let rows = decode(
            "2012-11-19T00:00:00Z,5.2;2012-11-19T00:10:00Z,5.4",
            &rule(),
            &temperature_schema(),
        )
        .unwrap();
        assert_eq!(
            encode(&rows, &rule(), &temperature_schema()).unwrap(),
            "2;2012-11-19T00:00:00Z,5.2;2012-11-19T00:10:00Z,5.4"
        );
    }

    #[test]
    fn test_single_field_round_trip_keeps_first_row() {
        let schema = ResultSchema::new(vec![Field::value("v", FieldKind::Count, "urn:v")]).unwrap();
        let rows = vec![
            DecodedRow {
                phenomenon_time: None,
                result_time: None,
                values: vec![TypedValue::Count(7)],
            },
            DecodedRow {
                phenomenon_time: None,
                result_time: None,
                values: vec![TypedValue::Count(8)],
            },
        ];
        let encoded = encode(&rows, &rule(), &schema).unwrap();
        assert_eq!(encoded, "2;7;8");
        assert_eq!(decode(&encoded, &rule(), &schema).unwrap(), rows);
    }

    #[test]
    fn test_encode_rejects_short_rows() {
        let rows = vec![DecodedRow {
            phenomenon_time: None,
            result_time: None,
            values: vec![],
        }];
        let err = encode(&rows, &rule(), &temperature_schema()).unwrap_err();
        assert_eq!(err.row, 0);
        assert_eq!(err.field, None);
        assert_eq!(err.kind, EncodeErrorKind::ValueCount { expected: 1, actual: 0 });
    }

    fn category_schema() -> ResultSchema {
        ResultSchema::new(vec![
            Field::phenomenon_time(),
            Field::value("state", FieldKind::Category, "urn:state"),
        ])
        .unwrap()
    }

    fn category_row(state: &str) -> DecodedRow {
        DecodedRow {
            phenomenon_time: Some(TimeValue::instant(parse_instant("2026-01-01T00:00:00Z").unwrap())),
            result_time: None,
            values: vec![TypedValue::Category(state.into())],
        }
    }

    #[test]
    fn test_encode_rejects_separator_inside_token() {
        for state in ["a,b", "a;b"] {
            let rows = vec![category_row("ok"), category_row(state)];
            let err = encode(&rows, &rule(), &category_schema()).unwrap_err();
            assert_eq!(err.row, 1);
            assert_eq!(err.field, Some(1));
            assert!(matches!(err.kind, EncodeErrorKind::Separator { ref token } if token == state));
            assert!(err.to_string().starts_with("row 1, field 1:"), "{}", err);
        }
    }

    #[test]
    fn test_encode_rejects_value_spelled_as_no_data() {
        let err = encode(&[category_row("noData")], &rule(), &category_schema()).unwrap_err();
        assert_eq!(err.field, Some(1));
        assert!(matches!(err.kind, EncodeErrorKind::NoData { .. }));

        let codec = ResultCodec::new("-");
        assert!(codec
            .encode(&[category_row("noData")], &rule(), &category_schema())
            .is_ok());
    }

    #[test]
    fn test_encode_rejects_separator_formed_across_tokens() {
        let rule = EncodingRule::new(",", "@@").unwrap();
        let err = encode(
            &[category_row("x@"), category_row("y")],
            &rule,
            &category_schema(),
        )
        .unwrap_err();
        assert_eq!(err.row, 0);
        assert_eq!(err.field, Some(1));
        assert!(matches!(err.kind, EncodeErrorKind::Ambiguous { ref token } if token == "x@"));

        // A partial separator at the start of a token splits cleanly.
        let rows = vec![category_row("@x"), category_row("y")];
        let encoded = encode(&rows, &rule, &category_schema()).unwrap();
        assert_eq!(decode(&encoded, &rule, &category_schema()).unwrap(), rows);
    }

    #[test]
    fn test_encode_rejects_trailing_empty_single_field_row() {
        let schema = ResultSchema::new(vec![Field::value("s", FieldKind::Text, "urn:s")]).unwrap();
        let row = |s: &str| DecodedRow {
            phenomenon_time: None,
            result_time: None,
            values: vec![TypedValue::Text(s.into())],
        };
        let err = encode(&[row("a"), row("")], &rule(), &schema).unwrap_err();
        assert_eq!(err.row, 1);
        assert!(matches!(err.kind, EncodeErrorKind::Ambiguous { .. }));

        let rows = vec![row(""), row("a")];
        let encoded = encode(&rows, &rule(), &schema).unwrap();
        assert_eq!(decode(&encoded, &rule(), &schema).unwrap(), rows);
    }

    #[test]
    fn test_encode_rejects_non_finite_quantity() {
        let rows = vec![DecodedRow {
            phenomenon_time: None,
            result_time: None,
            values: vec![TypedValue::Quantity(f64::INFINITY)],
        }];
        let err = encode(&rows, &rule(), &temperature_schema()).unwrap_err();
        assert_eq!(err.field, Some(1));
        assert!(matches!(err.kind, EncodeErrorKind::NotFinite { .. }));
    }
}
