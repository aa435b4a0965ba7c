//! JSON Schema generation for request and response documents.
//!
//! ```bash
//! sos-ingest schema --list
//! sos-ingest schema RegisterTemplateRequest
//! ```

use crate::model::{EncodingRule, FeatureDescriptor, Field, ResultSchema};
use crate::request::{
    GetResultRequest, GetResultResponse, InsertResultRequest, RegisterTemplateRequest,
    RegisterTemplateResponse,
};
use schemars::schema_for;
use serde_json::Value;
use std::collections::BTreeMap;

/// Available schema types with their descriptions.
pub fn available_schemas() -> Vec<(&'static str, &'static str)> {
    vec![
        ("RegisterTemplateRequest", "Register-template request document"),
        ("RegisterTemplateResponse", "Accepted template and constellation outcome"),
        ("InsertResultRequest", "Insert-result request document"),
        ("GetResultRequest", "Get-result request document"),
        ("GetResultResponse", "Encoded result values of a template"),
        ("ResultSchema", "Ordered field list of a result template"),
        ("Field", "Single field of a result structure"),
        ("EncodingRule", "Token and block separators"),
        ("FeatureDescriptor", "Feature of interest"),
    ]
}

/// JSON Schema for a type by name, `None` when unknown.
pub fn generate_schema(type_name: &str) -> Option<Value> {
    let schema = match type_name {
        "RegisterTemplateRequest" => schema_for!(RegisterTemplateRequest),
        "RegisterTemplateResponse" => schema_for!(RegisterTemplateResponse),
        "InsertResultRequest" => schema_for!(InsertResultRequest),
        "GetResultRequest" => schema_for!(GetResultRequest),
        "GetResultResponse" => schema_for!(GetResultResponse),
        "ResultSchema" => schema_for!(ResultSchema),
        "Field" => schema_for!(Field),
        "EncodingRule" => schema_for!(EncodingRule),
        "FeatureDescriptor" => schema_for!(FeatureDescriptor),
        _ => return None,
    };
    serde_json::to_value(schema).ok()
}

pub fn generate_all_schemas() -> BTreeMap<String, Value> {
    available_schemas()
        .into_iter()
        .filter_map(|(name, _)| generate_schema(name).map(|s| (name.to_string(), s)))
        .collect()
}
