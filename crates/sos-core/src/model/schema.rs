//! Result structure: the ordered field list a result template declares.
//!
//! A field's role decides how its token is read: at most one field carries
//! the phenomenon time, at most one the result time, and every other field is
//! a value whose position among the value fields fixes the value-tuple order.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sos_common::Error;
use thiserror::Error;

/// Definition URI that marks the phenomenon-time field.
pub const PHENOMENON_TIME_DEFINITION: &str =
    "http://www.opengis.net/def/property/OGC/0/PhenomenonTime";

/// Definition URI that marks the result-time field.
pub const RESULT_TIME_DEFINITION: &str = "http://www.opengis.net/def/property/OGC/0/ResultTime";

/// Simple-value kind of a field, or a nested record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Quantity,
    Count,
    Category,
    Boolean,
    Text,
    Time,
    /// Nested composite. Never flat.
    Record { fields: Vec<Field> },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Quantity => "quantity",
            FieldKind::Count => "count",
            FieldKind::Category => "category",
            FieldKind::Boolean => "boolean",
            FieldKind::Text => "text",
            FieldKind::Time => "time",
            FieldKind::Record { .. } => "record",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum FieldRole {
    Value,
    PhenomenonTime,
    ResultTime,
}

impl std::fmt::Display for FieldRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldRole::Value => write!(f, "value"),
            FieldRole::PhenomenonTime => write!(f, "phenomenonTime"),
            FieldRole::ResultTime => write!(f, "resultTime"),
        }
    }
}

/// One field of a result structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub definition: String,
    /// Unit of measure symbol (quantity fields).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Explicit role. Inferred from `definition` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<FieldRole>,
}

impl Field {
    pub fn value(name: impl Into<String>, kind: FieldKind, definition: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            kind,
            definition: definition.into(),
            unit: None,
            role: None,
        }
    }

    pub fn phenomenon_time() -> Self {
        Field::value("phenomenonTime", FieldKind::Time, PHENOMENON_TIME_DEFINITION)
    }

    pub fn result_time() -> Self {
        Field::value("resultTime", FieldKind::Time, RESULT_TIME_DEFINITION)
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_role(mut self, role: FieldRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Effective role: explicit, else derived from the definition URI.
    pub fn role(&self) -> FieldRole {
        self.role.unwrap_or(match self.definition.as_str() {
            PHENOMENON_TIME_DEFINITION => FieldRole::PhenomenonTime,
            RESULT_TIME_DEFINITION => FieldRole::ResultTime,
            _ => FieldRole::Value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("result structure has no fields")]
    Empty,

    #[error("fields {first} and {second} both carry the {role} role")]
    DuplicateRole {
        role: FieldRole,
        first: usize,
        second: usize,
    },

    #[error("field {index} carries the {role} role but has kind {kind}")]
    TimeRoleKind {
        index: usize,
        role: FieldRole,
        kind: &'static str,
    },

    #[error("result structure declares no value field")]
    NoValueField,
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::invalid("resultStructure", err.to_string())
    }
}

/// Ordered field list of a result template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResultSchema {
    pub fields: Vec<Field>,
}

impl ResultSchema {
    /// Build a schema, enforcing the role invariants.
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        let schema = ResultSchema { fields };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut phenomenon: Option<usize> = None;
        let mut result: Option<usize> = None;
        for (index, field) in self.fields.iter().enumerate() {
            let role = field.role();
            let slot = match role {
                FieldRole::PhenomenonTime => &mut phenomenon,
                FieldRole::ResultTime => &mut result,
                FieldRole::Value => continue,
            };
            if let Some(first) = *slot {
                return Err(SchemaError::DuplicateRole {
                    role,
                    first,
                    second: index,
                });
            }
            *slot = Some(index);
            if field.kind != FieldKind::Time {
                return Err(SchemaError::TimeRoleKind {
                    index,
                    role,
                    kind: field.kind.name(),
                });
            }
        }
        if self.value_count() == 0 {
            return Err(SchemaError::NoValueField);
        }
        Ok(())
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn phenomenon_time_index(&self) -> Option<usize> {
        self.position(FieldRole::PhenomenonTime)
    }

    pub fn result_time_index(&self) -> Option<usize> {
        self.position(FieldRole::ResultTime)
    }

    /// Value fields in value-tuple order.
    pub fn value_fields(&self) -> impl Iterator<Item = &Field> + '_ {
        self.fields.iter().filter(|f| f.role() == FieldRole::Value)
    }

    pub fn value_count(&self) -> usize {
        self.value_fields().count()
    }

    /// First nested record field, if any.
    pub fn first_composite(&self) -> Option<(usize, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| matches!(f.kind, FieldKind::Record { .. }))
    }

    pub fn is_flat(&self) -> bool {
        self.first_composite().is_none()
    }

    fn position(&self, role: FieldRole) -> Option<usize> {
        self.fields.iter().position(|f| f.role() == role)
    }
}
