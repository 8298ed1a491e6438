//! Fuzz target: private key armor and OpenSSH header parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = firelaunch_executor::key::parse_private_key(text);
    }
});
