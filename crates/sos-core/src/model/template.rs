//! Registered result templates and the features they observe.

use super::constellation::ObservationConstellation;
use super::encoding::EncodingRule;
use super::schema::ResultSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sos_common::{FeatureId, TemplateId};

/// Feature of interest as described by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDescriptor {
    /// Stable identifier, e.g. a station URN.
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Identifier of the feature this one samples, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampled_feature: Option<String>,
}

impl FeatureDescriptor {
    pub fn new(identifier: impl Into<String>) -> Self {
        FeatureDescriptor {
            identifier: identifier.into(),
            ..Default::default()
        }
    }
}

/// Resolved feature reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRef {
    pub id: FeatureId,
    pub identifier: String,
}

/// An immutable registered template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultTemplate {
    pub identifier: TemplateId,
    pub result_structure: ResultSchema,
    pub result_encoding: EncodingRule,
    pub constellation: ObservationConstellation,
    pub feature_of_interest: FeatureRef,
}
