//! Fuzz target for service.json settings parsing.
//!
//! Tests that settings parsing and semantic validation handle arbitrary
//! input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sos_config::{validate_settings, ServiceSettings};

fuzz_target!(|data: &[u8]| {
    if let Ok(settings) = serde_json::from_slice::<ServiceSettings>(data) {
        let _ = validate_settings(&settings);
    }
});
