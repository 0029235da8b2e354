//! Clock conversion.
//!
//! Probe timestamps come from the kernel monotonic clock. The offset to
//! wall clock is captured once at startup and applied to every accepted
//! event; recomputing it per event would let the two clocks drift within a
//! trace.

use std::time::{SystemTime, UNIX_EPOCH};

/// `wall_now - monotonic_now`, in nanoseconds.
pub fn real_time_offset_ns() -> u64 {
    let wall_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    wall_ns.saturating_sub(monotonic_now_ns())
}

fn monotonic_now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if ret != 0 {
        return 0;
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}
