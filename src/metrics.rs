// Performance metrics module
//
// Lightweight counters for OCR throughput, logged on shutdown

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Process-wide OCR metrics.
///
/// Atomic counters, safe to update from the scan worker and request handlers
/// without locking.
#[derive(Debug)]
pub struct Metrics {
    /// Pages recognized by the engine (cache misses that succeeded)
    pub pages_recognized: AtomicUsize,

    /// Pages whose render or recognition failed
    pub pages_failed: AtomicUsize,

    /// Page requests served from the result cache
    pub cache_hits: AtomicUsize,

    pub lines_recognized: AtomicUsize,

    /// Total render + recognition time in milliseconds
    pub recognition_time_ms: AtomicU64,

    /// Forced model re-resolutions observed on the resolver
    pub resolver_recoveries: AtomicUsize,

    pub scans_started: AtomicUsize,
    pub scans_completed: AtomicUsize,
    pub scans_failed: AtomicUsize,
    pub scans_cancelled: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            pages_recognized: AtomicUsize::new(0),
            pages_failed: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            lines_recognized: AtomicUsize::new(0),
            recognition_time_ms: AtomicU64::new(0),
            resolver_recoveries: AtomicUsize::new(0),
            scans_started: AtomicUsize::new(0),
            scans_completed: AtomicUsize::new(0),
            scans_failed: AtomicUsize::new(0),
            scans_cancelled: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a recognized page with its line count and elapsed time
    pub fn record_page_recognized(&self, lines: usize, duration: Duration) {
        self.pages_recognized.fetch_add(1, Ordering::Relaxed);
        self.lines_recognized.fetch_add(lines, Ordering::Relaxed);
        self.recognition_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_page_failed(&self) {
        self.pages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Mirror the resolver's recovery count
    pub fn record_resolver_recoveries(&self, total: usize) {
        self.resolver_recoveries.store(total, Ordering::Relaxed);
    }

    pub fn record_scan_started(&self) {
        self.scans_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_completed(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_failed(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_cancelled(&self) {
        self.scans_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average render + recognition time per recognized page in milliseconds
    pub fn avg_page_time_ms(&self) -> f64 {
        let total = self.recognition_time_ms.load(Ordering::Relaxed);
        let count = self.pages_recognized.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== OCR Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Pages: {} recognized, {} failed, {} cache hits, {} lines",
            self.pages_recognized.load(Ordering::Relaxed),
            self.pages_failed.load(Ordering::Relaxed),
            self.cache_hits.load(Ordering::Relaxed),
            self.lines_recognized.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Recognition time: {:.2}s (avg: {:.2}ms per page)",
            self.recognition_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_page_time_ms()
        );
        tracing::info!(
            "Scans: {} started, {} completed, {} failed, {} cancelled",
            self.scans_started.load(Ordering::Relaxed),
            self.scans_completed.load(Ordering::Relaxed),
            self.scans_failed.load(Ordering::Relaxed),
            self.scans_cancelled.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Model re-resolutions: {}",
            self.resolver_recoveries.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
