//! Fuzz target for register-template request documents.
//!
//! Tests that request parsing and conversion into a registration handle
//! arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sos_config::EncodingDefaults;
use sos_core::request::RegisterTemplateRequest;

fuzz_target!(|data: &str| {
    if let Ok(request) = RegisterTemplateRequest::from_json(data) {
        let _ = request.into_registration(&EncodingDefaults::default());
    }
});
