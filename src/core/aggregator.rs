//! Windowed sensor aggregation.
//!
//! Sensor callbacks append to the live window under a short lock. A
//! dedicated timer thread drains the window every interval, reduces it into
//! a [`TelemetrySample`] and publishes the sample on a single bounded
//! channel.
//!
//! Nothing is published until the owner turns publication on, and a stopped
//! aggregator never publishes.
//!
//! ```text
//! sensor threads ──ingest──▶ [AggregationWindow] ◀──drain── timer thread
//!                                                               │
//!                                                               ▼
//!                                                   Receiver<TelemetrySample>
//! ```

use crate::collector::types::{RawSensorEvent, SensorReading, STANDARD_GRAVITY};
use crate::collector::{CollectorError, Metric, ReadingSink, SensorSource};
use crate::core::telemetry::TelemetrySample;
use crate::core::windowing::AggregationWindow;
use crate::transparency::SharedTelemetryLog;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed window length.
pub const WINDOW_DURATION: Duration = Duration::from_millis(3000);

/// Aggregator settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub window_duration: Duration,
    /// Divisor applied to accelerometer magnitudes (g)
    pub accel_normalizer: f64,
    /// Capacity of the outbound sample channel
    pub channel_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_duration: WINDOW_DURATION,
            accel_normalizer: STANDARD_GRAVITY,
            channel_capacity: 1_000,
        }
    }
}

/// State shared between sensor callbacks and the timer thread.
struct Shared {
    window: Mutex<AggregationWindow>,
    accel_normalizer: f64,
    sender: Sender<TelemetrySample>,
    log: SharedTelemetryLog,
}

impl Shared {
    fn window(&self) -> MutexGuard<'_, AggregationWindow> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ingest(&self, event: RawSensorEvent) {
        let accepted = self.window().push(&event);
        if accepted {
            match event.metric {
                Metric::HeartRate => self.log.record_heart_rate_event(),
                Metric::AccelerometerMagnitude => self.log.record_accelerometer_event(),
            }
        }
    }

    /// Drain and publish under one hold of the window lock, so a publish
    /// flag change is ordered strictly before or after the whole step.
    fn on_window_elapsed(&self, now: DateTime<Utc>) -> Option<TelemetrySample> {
        let mut window = self.window();
        if !window.is_open() {
            return None;
        }
        let drained = window.drain(now);
        let sample = TelemetrySample::from_window(&drained);
        self.log.record_window_completed();

        if !window.is_publishing() {
            debug!(events = drained.event_count(), "window drained while not publishing");
            return None;
        }

        match self.sender.try_send(sample) {
            Ok(()) => Some(sample),
            Err(TrySendError::Full(_)) => {
                warn!(window_end = sample.window_end, "sample channel full, dropping window");
                None
            }
            Err(TrySendError::Disconnected(_)) => None,
        }
    }
}

struct WindowTimer {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Reduces raw sensor readings into one [`TelemetrySample`] per window.
pub struct SensorAggregator {
    shared: Arc<Shared>,
    source: Arc<dyn SensorSource>,
    receiver: Receiver<TelemetrySample>,
    window_duration: Duration,
    timer: Mutex<Option<WindowTimer>>,
}

impl SensorAggregator {
    pub fn new(
        config: AggregatorConfig,
        source: Arc<dyn SensorSource>,
        log: SharedTelemetryLog,
    ) -> Self {
        let (sender, receiver) = bounded(config.channel_capacity);
        Self {
            shared: Arc::new(Shared {
                window: Mutex::new(AggregationWindow::new()),
                accel_normalizer: config.accel_normalizer,
                sender,
                log,
            }),
            source,
            receiver,
            window_duration: config.window_duration,
            timer: Mutex::new(None),
        }
    }

    /// Append an event to the live window. Never blocks on I/O; events that
    /// arrive while the aggregator is stopped are discarded.
    pub fn ingest(&self, event: RawSensorEvent) {
        self.shared.ingest(event);
    }

    /// Reduce a raw reading to a scalar event and ingest it.
    pub fn ingest_reading(&self, reading: SensorReading) {
        self.shared
            .ingest(reading.into_event(self.shared.accel_normalizer));
    }

    /// Register with the sensor source and start the window timer.
    ///
    /// Calling this while already running is a no-op.
    pub fn start(&self) -> Result<(), CollectorError> {
        let mut timer = self.timer_slot();
        if timer.is_some() {
            return Ok(());
        }

        let capabilities = self.source.capabilities();
        if !capabilities.heart_rate {
            info!("heart rate sensor unavailable; heart rate fields will be absent");
        }
        if !capabilities.accelerometer {
            info!("accelerometer unavailable; motion fields will be absent");
        }

        self.shared.window().open(Utc::now());

        let shared = self.shared.clone();
        let sink: ReadingSink = Arc::new(move |reading: SensorReading| {
            shared.ingest(reading.into_event(shared.accel_normalizer));
        });
        if let Err(e) = self.source.register(sink) {
            self.shared.window().close();
            return Err(e);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = self.shared.clone();
        let interval = self.window_duration;
        let spawned = thread::Builder::new()
            .name("window-timer".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            shared.on_window_elapsed(Utc::now());
                        }
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                *timer = Some(WindowTimer {
                    stop: stop_tx,
                    handle,
                });
                info!(window_ms = interval.as_millis() as u64, "sensor aggregation started");
                Ok(())
            }
            Err(e) => {
                self.source.unregister();
                self.shared.window().close();
                Err(CollectorError::Unavailable(e.to_string()))
            }
        }
    }

    /// Unregister from the source, cancel the timer and discard the partial
    /// window. When this returns no further samples will be published.
    pub fn stop(&self) {
        let mut timer = self.timer_slot();
        let Some(running) = timer.take() else {
            return;
        };

        self.source.unregister();
        let _ = running.stop.send(());
        let _ = running.handle.join();
        self.shared.window().close();
        info!("sensor aggregation stopped");
    }

    pub fn is_running(&self) -> bool {
        self.timer_slot().is_some()
    }

    /// Enable or suppress sample publication. Off until the owner turns it
    /// on. Windows keep draining while suppressed, so nothing buffered before
    /// a change is published after it.
    pub fn set_publishing(&self, publishing: bool) {
        self.shared.window().set_publishing(publishing);
    }

    pub fn is_publishing(&self) -> bool {
        self.shared.window().is_publishing()
    }

    /// Drain the current window immediately, as the timer would.
    ///
    /// Returns the published sample, or `None` if the aggregator is stopped,
    /// publication is suppressed or the channel is full.
    pub fn on_window_elapsed(&self) -> Option<TelemetrySample> {
        self.shared.on_window_elapsed(Utc::now())
    }

    /// The downstream sample channel.
    pub fn receiver(&self) -> &Receiver<TelemetrySample> {
        &self.receiver
    }

    /// Discard samples published but not yet consumed.
    pub fn discard_pending(&self) -> usize {
        self.receiver.try_iter().count()
    }

    pub fn window_duration(&self) -> Duration {
        self.window_duration
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<WindowTimer>> {
        self.timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SensorAggregator {
    fn drop(&mut self) {
        self.stop();
    }
}
