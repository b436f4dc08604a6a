/// Wall-clock time in microseconds via `CLOCK_REALTIME`.
/// This is a vDSO call on Linux (~20-40ns), no actual syscall.
///
/// Recording methods truncate the value to 32 bits, so only differences
/// taken within one ~71 minute window are meaningful.
pub fn now_us() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, initialized timespec on the stack.
    // CLOCK_REALTIME is always available and clock_gettime cannot fail with it.
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
}
