//! Typed observation values.

use super::time::TimeValue;
use serde::{Deserialize, Serialize};

/// One decoded value token, typed by its field kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    Quantity(f64),
    Count(i64),
    Category(String),
    Boolean(bool),
    Text(String),
    Time(TimeValue),
    /// The token was the configured no-data marker.
    NoData,
}

impl TypedValue {
    pub fn is_no_data(&self) -> bool {
        matches!(self, TypedValue::NoData)
    }

    /// Lowercase kind name, as used in logs and JSON output.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypedValue::Quantity(_) => "quantity",
            TypedValue::Count(_) => "count",
            TypedValue::Category(_) => "category",
            TypedValue::Boolean(_) => "boolean",
            TypedValue::Text(_) => "text",
            TypedValue::Time(_) => "time",
            TypedValue::NoData => "no_data",
        }
    }

    /// Render as a payload token.
    pub fn to_token(&self, no_data_value: &str) -> String {
        match self {
            TypedValue::Quantity(v) => v.to_string(),
            TypedValue::Count(v) => v.to_string(),
            TypedValue::Category(s) | TypedValue::Text(s) => s.clone(),
            TypedValue::Boolean(b) => b.to_string(),
            TypedValue::Time(t) => t.to_token(),
            TypedValue::NoData => no_data_value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_tokens_are_shortest_form() {
        assert_eq!(TypedValue::Quantity(5.2).to_token("noData"), "5.2");
        assert_eq!(TypedValue::Quantity(5.0).to_token("noData"), "5");
        assert_eq!(TypedValue::Quantity(-0.25).to_token("noData"), "-0.25");
    }

    #[test]
    fn test_no_data_token() {
        assert_eq!(TypedValue::NoData.to_token("NaN"), "NaN");
        assert!(TypedValue::NoData.is_no_data());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&TypedValue::Count(3)).unwrap();
        assert_eq!(json, r#"{"kind":"count","value":3}"#);
        let back: TypedValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TypedValue::Count(3));
    }
}
