//! In-memory metrics for orchestrator observability.
//!
//! Plain atomics, single writer per event source, readers take snapshots.
//! The Prometheus formatter exists so an HTTP adapter can expose these
//! without the control plane knowing about it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global metrics instance.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // Job counters
    pub jobs_submitted: AtomicU64,
    pub jobs_dispatched: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_cancelled: AtomicU64,
    pub jobs_retried: AtomicU64,

    // Worker counters
    pub workers_registered: AtomicU64,
    pub workers_lost: AtomicU64,

    // Transport counters
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    pub artifact_chunks_sent: AtomicU64,
    pub artifact_transfer_retries: AtomicU64,

    // Error counters
    pub protocol_errors: AtomicU64,
    pub invalid_sessions: AtomicU64,

    // Timing (cumulative microseconds)
    pub dispatch_time_us: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_dispatched: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            workers_registered: AtomicU64::new(0),
            workers_lost: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            artifact_chunks_sent: AtomicU64::new(0),
            artifact_transfer_retries: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            invalid_sessions: AtomicU64::new(0),
            dispatch_time_us: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatch_time(&self, start: Instant) {
        let elapsed_us = start.elapsed().as_micros() as u64;
        self.dispatch_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            workers_registered: self.workers_registered.load(Ordering::Relaxed),
            workers_lost: self.workers_lost.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            artifact_chunks_sent: self.artifact_chunks_sent.load(Ordering::Relaxed),
            artifact_transfer_retries: self.artifact_transfer_retries.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            invalid_sessions: self.invalid_sessions.load(Ordering::Relaxed),
            dispatch_time_us: self.dispatch_time_us.load(Ordering::Relaxed),
        }
    }

    /// Prometheus exposition format.
    pub fn prometheus_format(&self) -> String {
        let s = self.snapshot();
        let mut out = String::with_capacity(2048);
        for (name, help, value) in [
            ("hodei_jobs_submitted_total", "Total jobs submitted", s.jobs_submitted),
            ("hodei_jobs_dispatched_total", "Total executions dispatched to workers", s.jobs_dispatched),
            ("hodei_jobs_completed_total", "Total jobs completed successfully", s.jobs_completed),
            ("hodei_jobs_failed_total", "Total jobs that failed terminally", s.jobs_failed),
            ("hodei_jobs_cancelled_total", "Total jobs cancelled", s.jobs_cancelled),
            ("hodei_jobs_retried_total", "Total job retries scheduled", s.jobs_retried),
            ("hodei_workers_registered_total", "Total worker registrations", s.workers_registered),
            ("hodei_workers_lost_total", "Total workers lost to missed heartbeats", s.workers_lost),
            ("hodei_frames_received_total", "Total protocol frames received", s.frames_received),
            ("hodei_frames_sent_total", "Total protocol frames sent", s.frames_sent),
            ("hodei_artifact_chunks_sent_total", "Total artifact chunks streamed", s.artifact_chunks_sent),
            ("hodei_artifact_transfer_retries_total", "Total artifact transfer retries", s.artifact_transfer_retries),
            ("hodei_protocol_errors_total", "Total protocol parsing errors", s.protocol_errors),
            ("hodei_invalid_sessions_total", "Total messages rejected for bad session tokens", s.invalid_sessions),
            ("hodei_dispatch_time_microseconds_total", "Cumulative dispatch time in microseconds", s.dispatch_time_us),
        ] {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Immutable snapshot for reading.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_dispatched: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub jobs_retried: u64,
    pub workers_registered: u64,
    pub workers_lost: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub artifact_chunks_sent: u64,
    pub artifact_transfer_retries: u64,
    pub protocol_errors: u64,
    pub invalid_sessions: u64,
    pub dispatch_time_us: u64,
}

impl MetricsSnapshot {
    pub fn avg_dispatch_time_ms(&self) -> f64 {
        if self.jobs_dispatched == 0 {
            0.0
        } else {
            (self.dispatch_time_us as f64 / self.jobs_dispatched as f64) / 1000.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();
        metrics.inc(&metrics.jobs_dispatched);
        metrics.inc(&metrics.jobs_dispatched);
        metrics.inc(&metrics.jobs_completed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_dispatched, 2);
        assert_eq!(snapshot.jobs_completed, 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.inc(&metrics.jobs_completed);
        let output = metrics.prometheus_format();
        assert!(output.contains("hodei_jobs_completed_total 1"));
        assert!(output.contains("# TYPE hodei_jobs_completed_total counter"));
    }
}
