//! Fuzz target: configuration document parsing and descriptor building.
//!
//! Any document that parses must also validate or fail cleanly, and build a
//! descriptor whose blob decodes back.

#![no_main]

use firelaunch_core::descriptor::VmAnnotation;
use firelaunch_core::{build_launch_spec, validate_shape, HostPaths, LauncherConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(cfg) = LauncherConfig::from_yaml_str(text) else {
        return;
    };
    let _ = validate_shape(&cfg.vm);
    if let Ok(spec) = build_launch_spec(&cfg.vm, &HostPaths::default()) {
        let decoded = VmAnnotation::parse(&spec.annotation);
        assert!(decoded.is_ok(), "built blob must decode");
    }
});
