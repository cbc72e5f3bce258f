//! Bridge metrics for monitoring and observability.
//!
//! This module provides counters for entry-point calls, thread attachment
//! and copied frame data, plus a Prometheus-format export.

use crate::entry_points::EntryPoint;
use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time view of the bridge counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Total entry-point calls
    pub total_calls: u64,

    /// Calls that threw
    pub failed_calls: u64,

    /// Average call time in microseconds
    pub avg_call_time_us: f64,

    /// Threads attached on demand
    pub attaches: u64,

    /// Threads detached at exit
    pub detaches: u64,

    /// Threads currently attached by the bridge
    pub attached_threads: usize,

    /// Frame bytes copied into JS buffers
    pub bytes_copied: u64,

    /// Frame requests answered with a null array
    pub null_frames: u64,

    /// Calls per entry point, by symbolic name
    pub calls: HashMap<String, u64>,

    /// Failures per error code
    pub errors: HashMap<String, u64>,
}

impl BridgeStats {
    /// Set the attached thread count
    pub fn with_attached_threads(mut self, count: usize) -> Self {
        self.attached_threads = count;
        self
    }
}

/// Metrics collector shared by every entry point of one installation
pub struct BridgeMetrics {
    total_calls: AtomicU64,
    failed_calls: AtomicU64,
    total_call_time_us: AtomicU64,
    attaches: AtomicU64,
    detaches: AtomicU64,
    hook_registrations: AtomicU64,
    bytes_copied: AtomicU64,
    null_frames: AtomicU64,
    calls: [AtomicU64; EntryPoint::ALL.len()],
    error_counts: [AtomicU64; ErrorCode::ALL.len()],
}

impl BridgeMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            total_call_time_us: AtomicU64::new(0),
            attaches: AtomicU64::new(0),
            detaches: AtomicU64::new(0),
            hook_registrations: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            null_frames: AtomicU64::new(0),
            calls: std::array::from_fn(|_| AtomicU64::new(0)),
            error_counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Record one entry-point call
    pub fn record_call(&self, entry: EntryPoint, duration: Duration, error: Option<ErrorCode>) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_call_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.calls[entry.index()].fetch_add(1, Ordering::Relaxed);

        if let Some(code) = error {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
            self.error_counts[code.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an on-demand attach
    pub fn record_attach(&self) {
        self.attaches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a detach at thread exit
    pub fn record_detach(&self) {
        self.detaches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record registration of the thread-exit hook
    pub fn record_hook_registration(&self) {
        self.hook_registrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record frame bytes copied into a JS buffer
    pub fn record_bytes_copied(&self, bytes: usize) {
        self.bytes_copied.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a frame request answered with null
    pub fn record_null_frame(&self) {
        self.null_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total calls
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Get failed calls
    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::Relaxed)
    }

    /// Get attach count
    pub fn attaches(&self) -> u64 {
        self.attaches.load(Ordering::Relaxed)
    }

    /// Get detach count
    pub fn detaches(&self) -> u64 {
        self.detaches.load(Ordering::Relaxed)
    }

    /// Get hook registration count
    pub fn hook_registrations(&self) -> u64 {
        self.hook_registrations.load(Ordering::Relaxed)
    }

    /// Get copied byte count
    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied.load(Ordering::Relaxed)
    }

    /// Get null frame count
    pub fn null_frames(&self) -> u64 {
        self.null_frames.load(Ordering::Relaxed)
    }

    /// Get average call time in microseconds
    pub fn avg_call_time_us(&self) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            0.0
        } else {
            self.total_call_time_us.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Get the call count of one entry point
    pub fn calls_to(&self, entry: EntryPoint) -> u64 {
        self.calls[entry.index()].load(Ordering::Relaxed)
    }

    /// Get the failure count for one error code
    pub fn errors_with(&self, code: ErrorCode) -> u64 {
        self.error_counts[code.index()].load(Ordering::Relaxed)
    }

    /// Get call counts of the entry points called so far, by symbolic name
    pub fn calls(&self) -> HashMap<String, u64> {
        EntryPoint::ALL
            .iter()
            .map(|&entry| (entry.symbolic_name().to_string(), self.calls_to(entry)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Get counts of the error codes seen so far
    pub fn error_counts(&self) -> HashMap<String, u64> {
        ErrorCode::ALL
            .iter()
            .map(|&code| (code.to_string(), self.errors_with(code)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Snapshot all counters
    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            total_calls: self.total_calls(),
            failed_calls: self.failed_calls(),
            avg_call_time_us: self.avg_call_time_us(),
            attaches: self.attaches(),
            detaches: self.detaches(),
            attached_threads: 0,
            bytes_copied: self.bytes_copied(),
            null_frames: self.null_frames(),
            calls: self.calls(),
            errors: self.error_counts(),
        }
    }

    /// Reset call counters; attachment counters are left alone
    pub fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.total_call_time_us.store(0, Ordering::Relaxed);
        self.bytes_copied.store(0, Ordering::Relaxed);
        self.null_frames.store(0, Ordering::Relaxed);
        for counter in self.calls.iter().chain(self.error_counts.iter()) {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP udp_bridge_calls_total Entry-point calls\n");
        output.push_str("# TYPE udp_bridge_calls_total counter\n");
        for entry in EntryPoint::ALL {
            output.push_str(&format!(
                "udp_bridge_calls_total{{entry_point=\"{}\"}} {}\n",
                entry.symbolic_name(),
                self.calls_to(entry)
            ));
        }

        output.push_str("\n# HELP udp_bridge_call_time_us Average call time\n");
        output.push_str("# TYPE udp_bridge_call_time_us gauge\n");
        output.push_str(&format!(
            "udp_bridge_call_time_us {:.2}\n",
            self.avg_call_time_us()
        ));

        output.push_str("\n# HELP udp_bridge_thread_attachments_total Thread attach/detach events\n");
        output.push_str("# TYPE udp_bridge_thread_attachments_total counter\n");
        output.push_str(&format!(
            "udp_bridge_thread_attachments_total{{event=\"attach\"}} {}\n",
            self.attaches()
        ));
        output.push_str(&format!(
            "udp_bridge_thread_attachments_total{{event=\"detach\"}} {}\n",
            self.detaches()
        ));

        output.push_str("\n# HELP udp_bridge_frame_bytes_total Frame bytes copied into JS\n");
        output.push_str("# TYPE udp_bridge_frame_bytes_total counter\n");
        output.push_str(&format!(
            "udp_bridge_frame_bytes_total {}\n",
            self.bytes_copied()
        ));

        output.push_str("\n# HELP udp_bridge_errors_total Error counts by code\n");
        output.push_str("# TYPE udp_bridge_errors_total counter\n");
        for code in ErrorCode::ALL {
            let count = self.errors_with(code);
            if count > 0 {
                output.push_str(&format!(
                    "udp_bridge_errors_total{{code=\"{}\"}} {}\n",
                    code, count
                ));
            }
        }

        output
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for measuring call duration
pub struct CallTimer {
    start: Instant,
}

impl CallTimer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
