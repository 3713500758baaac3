//! Fuzz the tensor type spec parser
//!
//! Any string that parses must render back to a spec that parses to the same type.

#![no_main]

use axisflow::types::TensorType;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(ty) = TensorType::from_spec(input) {
            let rendered = ty.to_string();
            let reparsed = TensorType::from_spec(&rendered).expect("rendered spec must parse");
            assert_eq!(ty, reparsed);
        }
    }
});
