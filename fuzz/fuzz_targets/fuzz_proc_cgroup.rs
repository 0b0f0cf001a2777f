//! Fuzz target for /proc/[pid]/cgroup identity extraction.

#![no_main]

use libfuzzer_sys::fuzz_target;
use qs_core::collect::procfs::parse_cgroup_content;

fuzz_target!(|data: &str| {
    let identity = parse_cgroup_content(data);
    if let Some(service) = identity.service_name {
        assert!(service.ends_with(".service"));
    }
});
