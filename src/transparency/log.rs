//! Telemetry transparency log.
//!
//! Counts what the agent observed and what happened to every sample it
//! produced, including samples dropped after exhausting their retries. The
//! counters are persisted so `synheart-focus status` can show them across
//! runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide telemetry counters.
#[derive(Debug)]
pub struct TelemetryLog {
    heart_rate_events: AtomicU64,
    accelerometer_events: AtomicU64,
    windows_completed: AtomicU64,
    samples_enqueued: AtomicU64,
    samples_delivered: AtomicU64,
    upload_retries: AtomicU64,
    /// Samples discarded after the retry policy gave up
    samples_dropped: AtomicU64,
    /// Samples the backend refused outright
    samples_rejected: AtomicU64,
    /// Queued uploads purged by a session stop
    uploads_cancelled: AtomicU64,
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl TelemetryLog {
    pub fn new() -> Self {
        Self {
            heart_rate_events: AtomicU64::new(0),
            accelerometer_events: AtomicU64::new(0),
            windows_completed: AtomicU64::new(0),
            samples_enqueued: AtomicU64::new(0),
            samples_delivered: AtomicU64::new(0),
            upload_retries: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
            uploads_cancelled: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log backed by `path`, resuming any counters saved there.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("could not load previous telemetry stats: {e}");
        }

        log
    }

    pub fn record_heart_rate_event(&self) {
        self.heart_rate_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accelerometer_event(&self) {
        self.accelerometer_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_completed(&self) {
        self.windows_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_enqueued(&self) {
        self.samples_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_delivered(&self) {
        self.samples_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload_retry(&self) {
        self.upload_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_rejected(&self) {
        self.samples_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_uploads_cancelled(&self, count: u64) {
        self.uploads_cancelled.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            heart_rate_events: self.heart_rate_events.load(Ordering::Relaxed),
            accelerometer_events: self.accelerometer_events.load(Ordering::Relaxed),
            windows_completed: self.windows_completed.load(Ordering::Relaxed),
            samples_enqueued: self.samples_enqueued.load(Ordering::Relaxed),
            samples_delivered: self.samples_delivered.load(Ordering::Relaxed),
            upload_retries: self.upload_retries.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            uploads_cancelled: self.uploads_cancelled.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        self.stats().summary()
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                heart_rate_events: stats.heart_rate_events,
                accelerometer_events: stats.accelerometer_events,
                windows_completed: stats.windows_completed,
                samples_enqueued: stats.samples_enqueued,
                samples_delivered: stats.samples_delivered,
                upload_retries: stats.upload_retries,
                samples_dropped: stats.samples_dropped,
                samples_rejected: stats.samples_rejected,
                uploads_cancelled: stats.uploads_cancelled,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.heart_rate_events
                    .store(persisted.heart_rate_events, Ordering::Relaxed);
                self.accelerometer_events
                    .store(persisted.accelerometer_events, Ordering::Relaxed);
                self.windows_completed
                    .store(persisted.windows_completed, Ordering::Relaxed);
                self.samples_enqueued
                    .store(persisted.samples_enqueued, Ordering::Relaxed);
                self.samples_delivered
                    .store(persisted.samples_delivered, Ordering::Relaxed);
                self.upload_retries
                    .store(persisted.upload_retries, Ordering::Relaxed);
                self.samples_dropped
                    .store(persisted.samples_dropped, Ordering::Relaxed);
                self.samples_rejected
                    .store(persisted.samples_rejected, Ordering::Relaxed);
                self.uploads_cancelled
                    .store(persisted.uploads_cancelled, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.heart_rate_events,
            &self.accelerometer_events,
            &self.windows_completed,
            &self.samples_enqueued,
            &self.samples_delivered,
            &self.upload_retries,
            &self.samples_dropped,
            &self.samples_rejected,
            &self.uploads_cancelled,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the telemetry counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub heart_rate_events: u64,
    pub accelerometer_events: u64,
    pub windows_completed: u64,
    pub samples_enqueued: u64,
    pub samples_delivered: u64,
    pub upload_retries: u64,
    pub samples_dropped: u64,
    pub samples_rejected: u64,
    pub uploads_cancelled: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl TelemetryStats {
    pub fn summary(&self) -> String {
        format!(
            "Telemetry Statistics:\n\
             - Heart rate readings: {}\n\
             - Accelerometer readings: {}\n\
             - Windows completed: {}\n\
             - Samples queued for upload: {}\n\
             - Samples delivered: {}\n\
             - Upload retries: {}\n\
             - Samples dropped after retries: {}\n\
             - Samples rejected by collector: {}\n\
             - Uploads cancelled on stop: {}\n\
             - Uptime: {} seconds",
            self.heart_rate_events,
            self.accelerometer_events,
            self.windows_completed,
            self.samples_enqueued,
            self.samples_delivered,
            self.upload_retries,
            self.samples_dropped,
            self.samples_rejected,
            self.uploads_cancelled,
            self.uptime_secs
        )
    }
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    heart_rate_events: u64,
    accelerometer_events: u64,
    windows_completed: u64,
    samples_enqueued: u64,
    samples_delivered: u64,
    upload_retries: u64,
    samples_dropped: u64,
    samples_rejected: u64,
    uploads_cancelled: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared telemetry log.
pub type SharedTelemetryLog = Arc<TelemetryLog>;

/// Create a new shared telemetry log.
pub fn create_shared_log() -> SharedTelemetryLog {
    Arc::new(TelemetryLog::new())
}

/// Create a new shared telemetry log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTelemetryLog {
    Arc::new(TelemetryLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let log = TelemetryLog::new();

        log.record_heart_rate_event();
        log.record_heart_rate_event();
        log.record_accelerometer_event();
        log.record_sample_dropped();
        log.record_uploads_cancelled(3);

        let stats = log.stats();
        assert_eq!(stats.heart_rate_events, 2);
        assert_eq!(stats.accelerometer_events, 1);
        assert_eq!(stats.samples_dropped, 1);
        assert_eq!(stats.uploads_cancelled, 3);
    }

    #[test]
    fn test_reset() {
        let log = TelemetryLog::new();
        log.record_sample_delivered();
        log.record_upload_retry();
        log.reset();

        let stats = log.stats();
        assert_eq!(stats.samples_delivered, 0);
        assert_eq!(stats.upload_retries, 0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats").join("telemetry.json");

        let log = TelemetryLog::with_persistence(path.clone());
        log.record_window_completed();
        log.record_sample_rejected();
        log.save().unwrap();

        let reloaded = TelemetryLog::with_persistence(path);
        let stats = reloaded.stats();
        assert_eq!(stats.windows_completed, 1);
        assert_eq!(stats.samples_rejected, 1);
    }

    #[test]
    fn test_summary_format() {
        let summary = TelemetryLog::new().summary();
        assert!(summary.contains("Windows completed"));
        assert!(summary.contains("dropped after retries"));
    }
}
