//! Synthetic sensor source for running the agent on hosts without wearable
//! hardware (development machines, CI, demos).
//!
//! Heart rate drifts slowly around a resting value; the accelerometer
//! reports gravity plus a small periodic sway, with an occasional burst of
//! movement.

use crate::collector::types::{SensorCapabilities, SensorReading, STANDARD_GRAVITY};
use crate::collector::{CollectorError, ReadingSink, SensorSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Shape of the synthetic signal.
#[derive(Debug, Clone)]
pub struct SimulatedProfile {
    /// Emit heart-rate readings
    pub heart_rate: bool,
    /// Emit accelerometer readings
    pub accelerometer: bool,
    /// Resting heart rate the signal oscillates around
    pub resting_bpm: f64,
    /// Heart-rate reading period
    pub heart_rate_period: Duration,
    /// Accelerometer reading period
    pub accelerometer_period: Duration,
}

impl Default for SimulatedProfile {
    fn default() -> Self {
        Self {
            heart_rate: true,
            accelerometer: true,
            resting_bpm: 68.0,
            heart_rate_period: Duration::from_secs(1),
            accelerometer_period: Duration::from_millis(20),
        }
    }
}

/// A source that generates readings on its own thread.
pub struct SimulatedSource {
    profile: SimulatedProfile,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedSource {
    pub fn new(profile: SimulatedProfile) -> Self {
        Self {
            profile,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: Mutex::new(None),
        }
    }

    /// Check if the generator thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(SimulatedProfile::default())
    }
}

impl SensorSource for SimulatedSource {
    fn capabilities(&self) -> SensorCapabilities {
        SensorCapabilities {
            heart_rate: self.profile.heart_rate,
            accelerometer: self.profile.accelerometer,
        }
    }

    fn register(&self, sink: ReadingSink) -> Result<(), CollectorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRegistered);
        }

        let running = self.running.clone();
        let profile = self.profile.clone();
        let handle = thread::Builder::new()
            .name("simulated-sensors".to_string())
            .spawn(move || run_generator(profile, running, sink))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CollectorError::Unavailable(e.to_string())
            })?;

        *self.thread_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    fn unregister(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            // The generator exits on its next tick once running is false
            let _ = handle.join();
        }
    }
}

fn run_generator(profile: SimulatedProfile, running: Arc<AtomicBool>, sink: ReadingSink) {
    let started = Instant::now();
    let mut next_hr = started;
    let mut next_acc = started;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        let t = (now - started).as_secs_f64();

        if profile.heart_rate && now >= next_hr {
            sink(SensorReading::heart_rate(simulated_bpm(profile.resting_bpm, t)));
            next_hr += profile.heart_rate_period;
        }
        if profile.accelerometer && now >= next_acc {
            let (x, y, z) = simulated_acceleration(t);
            sink(SensorReading::accelerometer(x, y, z));
            next_acc += profile.accelerometer_period;
        }

        thread::sleep(Duration::from_millis(5));
    }
}

fn simulated_bpm(resting: f64, t: f64) -> f64 {
    resting + 4.0 * (t / 30.0).sin() + 1.5 * (t * 1.3).sin()
}

fn simulated_acceleration(t: f64) -> (f64, f64, f64) {
    // A short burst of movement every 20 seconds
    let burst = if t % 20.0 < 2.0 { 6.0 } else { 0.0 };
    let x = 0.3 * (t * 2.0).sin() + burst * (t * 9.0).sin();
    let y = 0.2 * (t * 1.7).cos() + burst * (t * 7.0).cos();
    (x, y, STANDARD_GRAVITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_simulated_source_emits_and_stops() {
        let source = SimulatedSource::new(SimulatedProfile {
            heart_rate_period: Duration::from_millis(10),
            accelerometer_period: Duration::from_millis(10),
            ..SimulatedProfile::default()
        });
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        source
            .register(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(source.is_running());
        thread::sleep(Duration::from_millis(100));
        source.unregister();
        assert!(!source.is_running());

        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_simulated_signal_ranges() {
        for i in 0..100 {
            let t = i as f64 * 0.7;
            let bpm = simulated_bpm(68.0, t);
            assert!((60.0..=76.0).contains(&bpm));
            let (_, _, z) = simulated_acceleration(t);
            assert_eq!(z, STANDARD_GRAVITY);
        }
    }
}
