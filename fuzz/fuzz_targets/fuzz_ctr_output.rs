//! Fuzz target: parsers for `ctr` task lists, id lists and container info.

#![no_main]

use firelaunch_executor::ctr::{parse_id_list, parse_task_list, parse_workload_info};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let _ = parse_task_list(&text, "vm1");
    for id in parse_id_list(&text) {
        assert!(!id.trim().is_empty(), "ids are never blank");
    }
    let _ = parse_workload_info(&text);
});
