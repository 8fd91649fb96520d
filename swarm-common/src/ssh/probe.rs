//! Host fitness probing.
//!
//! CPU utilization is sampled remotely: a POSIX-sh snippet reads the cpu
//! jiffy counter from `/proc/stat`, sleeps the probe window, reads again
//! and normalizes by window length and core count. Jiffies tick at 100 Hz,
//! so the delta divided by `window * cores` is already a percentage. The
//! snippet clamps to [0, 100] because the counter can wrap between reads.
//!
//! Latency is the wall-clock round trip of a trivial remote command. The
//! two measurements combine into a single higher-is-better fitness scalar;
//! the formula lives in [`fitness_score`] and is the one policy knob of the
//! scheduler.

use serde::Serialize;

/// Trivial remote command timed for the round-trip measurement.
pub const RTT_PROBE_COMMAND: &str = "true";

/// One probe of one host.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FitnessSample {
    /// CPU utilization in percent; `None` when the host did not answer.
    pub cpu_percent: Option<u8>,
    /// Round-trip time of the trivial probe command.
    pub latency_ms: u64,
    /// Higher-is-better suitability score; 0 when cpu is unavailable.
    pub fitness: f64,
}

impl FitnessSample {
    pub fn new(cpu_percent: Option<u8>, latency_ms: u64) -> Self {
        Self {
            cpu_percent,
            latency_ms,
            fitness: fitness_score(cpu_percent, latency_ms),
        }
    }

    pub fn unavailable(latency_ms: u64) -> Self {
        Self::new(None, latency_ms)
    }
}

/// The shell snippet sampling `/proc/stat` over `window_s` seconds.
pub fn cpu_probe_script(window_s: f64) -> String {
    format!(
        "C1=$(awk '/^cpu /{{print $2}}' /proc/stat); sleep {window_s}; \
         C2=$(awk '/^cpu /{{print $2}}' /proc/stat); N=$(nproc); \
         awk -v c1=\"$C1\" -v c2=\"$C2\" -v s=\"{window_s}\" -v n=\"$N\" \
         'BEGIN {{ p = int((c2 - c1) / (s * n)); if (p < 0) p = 0; if (p > 100) p = 100; print p }}'"
    )
}

/// Parse the probe output. Re-clamps defensively; a garbled or empty
/// answer is an unavailable sample, not an error.
pub fn parse_cpu_percent(output: &str) -> Option<u8> {
    let value: f64 = output.trim().parse().ok()?;
    Some(value.clamp(0.0, 100.0) as u8)
}

/// Combine CPU load and latency into one scalar. Monotonically decreasing
/// in both inputs; an unavailable CPU sample scores zero so the host is
/// never selected over a live one.
pub fn fitness_score(cpu_percent: Option<u8>, latency_ms: u64) -> f64 {
    match cpu_percent {
        Some(cpu) => f64::from(100 - cpu.min(100)) / (1.0 + latency_ms as f64),
        None => 0.0,
    }
}
