// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Fault-hook registration test
//!
//! Kept in its own test binary: the hook is process-global, and the other
//! integration tests assert on the hook-less halt path.

#[test]
fn test_structural_fault_reaches_registered_hook() {
    // The hook must diverge, so it panics with a recognizable payload
    fn hook(msg: &'static str) -> ! {
        panic!("fault hook: {msg}");
    }
    k_kernel::set_fault_hook(hook);

    let result = std::panic::catch_unwind(|| {
        k_kernel::panic::structural_fault("deliberate test fault");
    });
    let err = result.unwrap_err();
    let text = err.downcast_ref::<String>().cloned().unwrap_or_default();
    assert!(text.contains("fault hook"), "hook did not run: {text}");
    assert!(text.contains("deliberate test fault"));
}
