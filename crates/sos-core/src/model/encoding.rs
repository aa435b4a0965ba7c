//! Token and block separators of a text-encoded result.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sos_common::{Error, Result};
use sos_config::EncodingDefaults;

/// Separator rule of a result template.
///
/// Separators are matched literally, never as patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EncodingRule {
    pub token_separator: String,
    pub block_separator: String,
}

impl EncodingRule {
    /// Build a rule, rejecting empty or identical separators.
    pub fn new(token_separator: impl Into<String>, block_separator: impl Into<String>) -> Result<Self> {
        let rule = EncodingRule {
            token_separator: token_separator.into(),
            block_separator: block_separator.into(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_separator.is_empty() {
            return Err(Error::invalid("resultEncoding", "token separator must not be empty"));
        }
        if self.block_separator.is_empty() {
            return Err(Error::invalid("resultEncoding", "block separator must not be empty"));
        }
        if self.token_separator == self.block_separator {
            return Err(Error::invalid(
                "resultEncoding",
                format!(
                    "token and block separators must differ, both are '{}'",
                    self.token_separator
                ),
            ));
        }
        Ok(())
    }
}

impl From<&EncodingDefaults> for EncodingRule {
    fn from(defaults: &EncodingDefaults) -> Self {
        EncodingRule {
            token_separator: defaults.token_separator.clone(),
            block_separator: defaults.block_separator.clone(),
        }
    }
}
