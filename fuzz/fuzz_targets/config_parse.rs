//! Fuzz test for configuration file parsing
//!
//! Tests that arbitrary TOML input doesn't cause panics when parsed as a
//! server configuration.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ropwire_server::ServerConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _: Result<toml::Value, _> = toml::from_str(s);

        // Invalid configs fail to deserialize or validate, never panic
        if let Ok(config) = toml::from_str::<ServerConfig>(s) {
            let _ = config.validate();
        }
    }
});
