// perf.rs - Performance timing infrastructure for csvview
//
// This module provides timing instrumentation for view rebuilds and queries.
// Controlled via CSVVIEW_PERF environment variable.
//
// Usage:
//   CSVVIEW_PERF=1 csvview --stdio       # Enable basic timing logs
//   CSVVIEW_PERF=verbose csvview --stdio # Enable detailed timing with thresholds

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Global flag indicating whether performance timing is enabled
static PERF_ENABLED: OnceLock<bool> = OnceLock::new();

/// Global flag indicating verbose mode (includes threshold warnings)
static PERF_VERBOSE: OnceLock<bool> = OnceLock::new();

/// Check if performance timing is enabled
pub fn is_enabled() -> bool {
    *PERF_ENABLED.get_or_init(|| {
        std::env::var("CSVVIEW_PERF")
            .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false)
    })
}

/// Check if verbose mode is enabled
pub fn is_verbose() -> bool {
    *PERF_VERBOSE.get_or_init(|| {
        std::env::var("CSVVIEW_PERF")
            .map(|v| v.to_lowercase() == "verbose")
            .unwrap_or(false)
    })
}

/// RAII timing guard that logs duration on drop
///
/// ```
/// use csvview::perf::TimingGuard;
///
/// let _guard = TimingGuard::new("operation_name");
/// // ... do work ...
/// // Duration logged when _guard goes out of scope
/// ```
pub struct TimingGuard {
    start: Instant,
    name: &'static str,
    threshold_warn_ms: Option<u64>,
    enabled: bool,
}

impl TimingGuard {
    /// Duration will be logged at INFO level when the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms: None,
            enabled: is_enabled(),
        }
    }

    /// If the operation takes longer than `threshold_ms`, a warning will be logged.
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms: Some(threshold_ms),
            enabled: is_enabled(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Consume the guard without logging and return the duration.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        std::mem::forget(self); // Prevent Drop from running
        elapsed
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }

        let elapsed = self.start.elapsed();
        log::info!("[PERF] {} completed in {:?}", self.name, elapsed);

        if let Some(threshold) = self.threshold_warn_ms {
            if elapsed.as_millis() > threshold as u128 && is_verbose() {
                log::warn!(
                    "[PERF] {} exceeded threshold ({}ms > {}ms)",
                    self.name,
                    elapsed.as_millis(),
                    threshold
                );
            }
        }
    }
}

/// Aggregated metrics across all views in the process
#[derive(Debug, Default, Clone)]
pub struct PerfMetrics {
    /// Number of table rebuilds
    pub rebuilds: usize,
    /// Rows loaded across all rebuilds
    pub rows_loaded: usize,
    /// Total time spent rebuilding
    pub rebuild_total_duration: Duration,
    /// Number of queries executed
    pub queries: usize,
    /// Slowest single query (excluding any rebuild it triggered)
    pub slowest_query: Option<Duration>,
}

impl PerfMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_summary(&self) {
        if !is_enabled() {
            return;
        }

        log::info!("[PERF] === View Performance Summary ===");
        log::info!(
            "[PERF] Rebuilds: {} ({} rows) in {:?}",
            self.rebuilds,
            self.rows_loaded,
            self.rebuild_total_duration
        );
        log::info!("[PERF] Queries: {}", self.queries);
        if let Some(d) = self.slowest_query {
            log::info!("[PERF] Slowest query: {:?}", d);
        }
    }
}

static METRICS: OnceLock<std::sync::Mutex<PerfMetrics>> = OnceLock::new();

pub fn metrics() -> &'static std::sync::Mutex<PerfMetrics> {
    METRICS.get_or_init(|| std::sync::Mutex::new(PerfMetrics::new()))
}

pub fn record_rebuild(duration: Duration, rows: usize) {
    if !is_enabled() {
        return;
    }
    if let Ok(mut metrics) = metrics().lock() {
        metrics.rebuilds += 1;
        metrics.rows_loaded += rows;
        metrics.rebuild_total_duration += duration;
    }
}

pub fn record_query(duration: Duration) {
    if !is_enabled() {
        return;
    }
    if let Ok(mut metrics) = metrics().lock() {
        metrics.queries += 1;
        if metrics.slowest_query.map_or(true, |d| duration > d) {
            metrics.slowest_query = Some(duration);
        }
    }
}

/// Returns the peak resident set size (RSS) of the current process in bytes.
///
/// - **macOS**: Uses `libc::getrusage` (`ru_maxrss`, which is in bytes on macOS).
/// - **Linux**: Reads `/proc/self/status` and parses the `VmHWM` field (reported in kB).
/// - **Other platforms**: Returns `None`.
pub fn peak_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "macos")]
    {
        peak_rss_macos()
    }
    #[cfg(target_os = "linux")]
    {
        peak_rss_linux()
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

#[cfg(target_os = "macos")]
fn peak_rss_macos() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut usage = MaybeUninit::<libc::rusage>::uninit();
    // SAFETY: getrusage writes into the provided pointer; we check the return value.
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if ret == 0 {
        // SAFETY: getrusage succeeded, so the struct is fully initialized.
        let usage = unsafe { usage.assume_init() };
        Some(usage.ru_maxrss as u64)
    } else {
        None
    }
}

#[cfg(target_os = "linux")]
fn peak_rss_linux() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmHWM:") {
            // Format: "VmHWM:    12345 kB"
            let trimmed = rest.trim();
            let kb_str = trimmed.strip_suffix("kB").unwrap_or(trimmed).trim();
            let kb: u64 = kb_str.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}
