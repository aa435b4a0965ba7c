//! Expansion of decoded rows into single-value observations.

use crate::codec::DecodedRow;
use crate::model::schema::FieldKind;
use crate::model::{ResultSchema, ResultTime, TimeValue, TypedValue};
use chrono::{DateTime, FixedOffset};
use sos_common::{Error, Result};

/// One observation ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct UnfoldedObservation {
    /// Index of the decoded row it came from.
    pub row: usize,
    pub phenomenon_time: TimeValue,
    pub result_time: DateTime<FixedOffset>,
    pub definition: String,
    pub value: TypedValue,
    pub unit: Option<String>,
}

/// Rows decoded against one template, plus the time used for rows that
/// carry no phenomenon time.
#[derive(Debug, Clone, Copy)]
pub struct MultiRowObservation<'a> {
    pub schema: &'a ResultSchema,
    pub rows: &'a [DecodedRow],
    pub context_time: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObservationUnfolder;

impl ObservationUnfolder {
    /// Reject result structures that are not a flat row of simple fields.
    pub fn ensure_flat(schema: &ResultSchema) -> Result<()> {
        match schema.first_composite() {
            Some((index, field)) => Err(Error::UnsupportedShape(format!(
                "field {} ('{}') is a nested record",
                index, field.name
            ))),
            None => Ok(()),
        }
    }

    /// One observation per non-absent value token, in row order.
    pub fn unfold(&self, input: &MultiRowObservation<'_>) -> Result<Vec<UnfoldedObservation>> {
        Self::ensure_flat(input.schema)?;
        let value_fields: Vec<_> = input.schema.value_fields().collect();

        let mut out = Vec::with_capacity(input.rows.len() * value_fields.len());
        for (index, row) in input.rows.iter().enumerate() {
            if row.values.len() != value_fields.len() {
                return Err(Error::invalid(
                    "resultValues",
                    format!(
                        "row {} carries {} values for {} value fields",
                        index,
                        row.values.len(),
                        value_fields.len()
                    ),
                ));
            }
            let phenomenon_time = match (&row.phenomenon_time, &row.result_time) {
                (Some(t), _) => t.clone(),
                (None, Some(ResultTime::At(at))) => TimeValue::instant(*at),
                (None, _) => TimeValue::instant(input.context_time),
            };
            let result_time = match row.result_time {
                Some(ResultTime::At(at)) => at,
                Some(ResultTime::Inherit) | None => phenomenon_time.end(),
            };

            for (field, value) in value_fields.iter().zip(&row.values) {
                if value.is_no_data() {
                    continue;
                }
                let unit = match field.kind {
                    FieldKind::Quantity => field.unit.clone(),
                    _ => None,
                };
                out.push(UnfoldedObservation {
                    row: index,
                    phenomenon_time: phenomenon_time.clone(),
                    result_time,
                    definition: field.definition.clone(),
                    value: value.clone(),
                    unit,
                });
            }
        }
        Ok(out)
    }
}
