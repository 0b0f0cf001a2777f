//! CPU-time arithmetic for fixed-period sampling.
//!
//! OS accounting counters are cumulative and, in theory, monotonic. In
//! practice a handle can be re-queried after a counter wrap or a clock
//! adjustment, so every delta here treats a non-increasing reading as zero.

/// Microseconds consumed between two cumulative CPU-time readings.
///
/// Returns 0 when `current <= previous`.
pub fn monotonic_delta_us(previous_us: u64, current_us: u64) -> u64 {
    if current_us <= previous_us {
        return 0;
    }
    current_us - previous_us
}

/// Combined user + kernel delta between two readings.
pub fn cpu_delta_us(
    previous_user_us: u64,
    current_user_us: u64,
    previous_kernel_us: u64,
    current_kernel_us: u64,
) -> u64 {
    monotonic_delta_us(previous_user_us, current_user_us)
        .saturating_add(monotonic_delta_us(previous_kernel_us, current_kernel_us))
}

/// Convert a CPU delta observed over one tick into a machine-wide percent.
///
/// `percent = delta / period / cpus * 100`. A process saturating every
/// logical CPU for the whole tick reads as 100. Degenerate inputs (zero
/// period or zero cpus) yield 0.
pub fn tick_percent(cpu_delta_us: u64, period_us: u64, logical_cpus: u32) -> f64 {
    if period_us == 0 || logical_cpus == 0 {
        return 0.0;
    }
    cpu_delta_us as f64 / period_us as f64 / logical_cpus as f64 * 100.0
}

/// Convert 100ns accounting units (FILETIME resolution) to microseconds.
pub fn hundred_ns_to_us(value: u64) -> u64 {
    value / 10
}

/// Convert clock ticks (USER_HZ) to microseconds.
pub fn ticks_to_us(ticks: u64, clk_tck: u64) -> u64 {
    if clk_tck == 0 {
        return 0;
    }
    // Split to avoid overflow for very long-lived processes.
    let whole = ticks / clk_tck;
    let rem = ticks % clk_tck;
    whole
        .saturating_mul(1_000_000)
        .saturating_add(rem.saturating_mul(1_000_000) / clk_tck)
}
