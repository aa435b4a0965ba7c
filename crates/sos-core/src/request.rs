//! JSON request documents accepted by the service and the CLI.
//!
//! Documents are deserialized leniently (every member defaults to empty) so
//! that an absent member surfaces as `MissingParameter` naming the member,
//! rather than as a generic JSON error.

use crate::model::{
    ConstellationKey, EncodingRule, FeatureDescriptor, ObservationType, ResultSchema,
};
use crate::template::TemplateRegistration;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sos_common::{Error, Result, TemplateId};
use sos_config::EncodingDefaults;
use std::path::Path;

/// Register-template request document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterTemplateRequest {
    /// Caller-chosen template identifier. Generated when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub offering: String,
    pub observed_property: String,
    pub procedure: String,
    /// Short name (`Measurement`), `OM_` name or OGC-OM 2.0 URI.
    pub observation_type: String,
    pub result_structure: Option<ResultSchema>,
    /// Falls back to the configured default separators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_encoding: Option<EncodingRule>,
    pub feature_of_interest: Option<FeatureDescriptor>,
}

impl RegisterTemplateRequest {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Convert into a registration, applying default separators.
    ///
    /// Performs every check that needs no storage access.
    pub fn into_registration(self, defaults: &EncodingDefaults) -> Result<TemplateRegistration> {
        if self.observation_type.trim().is_empty() {
            return Err(Error::MissingParameter("observationType".to_string()));
        }
        let identifier = match self.identifier.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(TemplateId::parse(raw).ok_or_else(|| {
                Error::invalid("identifier", format!("'{}' is not a valid identifier", raw))
            })?),
        };
        let schema = self
            .result_structure
            .ok_or_else(|| Error::MissingParameter("resultStructure".to_string()))?;
        let feature = self
            .feature_of_interest
            .ok_or_else(|| Error::MissingParameter("featureOfInterest".to_string()))?;
        let encoding = match self.result_encoding {
            Some(rule) => rule,
            None => EncodingRule::from(defaults),
        };

        let registration = TemplateRegistration {
            identifier,
            key: ConstellationKey::new(self.procedure, self.observed_property, self.offering),
            observation_type: ObservationType::parse_requested(&self.observation_type)?,
            schema,
            encoding,
            feature,
        };
        registration.validate()?;
        Ok(registration)
    }
}

/// Insert-result request document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct InsertResultRequest {
    /// Identifier of a registered template.
    pub template: String,
    /// Encoded payload, blocks of tokens.
    pub result_values: String,
}

impl InsertResultRequest {
    pub fn new(template: impl Into<String>, result_values: impl Into<String>) -> Self {
        InsertResultRequest {
            template: template.into(),
            result_values: result_values.into(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.template.trim().is_empty() {
            return Err(Error::MissingParameter("template".to_string()));
        }
        if self.result_values.is_empty() {
            return Err(Error::MissingParameter("resultValues".to_string()));
        }
        Ok(())
    }
}

/// Get-result request document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct GetResultRequest {
    pub template: String,
    /// Lower bound of the phenomenon-time filter, ISO-8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Upper bound of the phenomenon-time filter, ISO-8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Response to a successful registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTemplateResponse {
    pub accepted_template: TemplateId,
    pub offering: String,
    pub observed_property: String,
    pub procedure: String,
    pub observation_type: String,
    /// `created`, `promoted` or `unchanged`.
    pub constellation: String,
    /// Feature relations created by related-feature propagation.
    pub related_links: usize,
}

/// Response to a get-result request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetResultResponse {
    pub template: TemplateId,
    pub rows: usize,
    pub result_encoding: EncodingRule,
    pub result_values: String,
}
