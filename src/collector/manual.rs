//! Push-driven source for replaying recorded readings or embedding the agent
//! behind a platform bridge that already owns the sensor callbacks.

use crate::collector::types::{SensorCapabilities, SensorReading};
use crate::collector::{CollectorError, ReadingSink, SensorSource};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A source whose readings are pushed in by the caller.
pub struct ManualSource {
    capabilities: SensorCapabilities,
    sink: RwLock<Option<ReadingSink>>,
}

impl ManualSource {
    /// Create a source that advertises both metrics.
    pub fn new() -> Self {
        Self::with_capabilities(SensorCapabilities::all())
    }

    pub fn with_capabilities(capabilities: SensorCapabilities) -> Self {
        Self {
            capabilities,
            sink: RwLock::new(None),
        }
    }

    /// Deliver a reading to the registered sink.
    ///
    /// Returns false when nothing is registered or the device lacks the
    /// reading's metric; the reading is discarded in both cases.
    ///
    /// The sink runs under a read guard, so `unregister` waits for deliveries
    /// in progress and none start after it returns. Concurrent pushes do not
    /// block each other.
    pub fn push(&self, reading: SensorReading) -> bool {
        if !self.capabilities.supports(reading.metric()) {
            return false;
        }
        match self.read().as_ref() {
            Some(sink) => {
                sink(reading);
                true
            }
            None => false,
        }
    }

    /// Check if a sink is currently registered.
    pub fn is_registered(&self) -> bool {
        self.read().is_some()
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<ReadingSink>> {
        self.sink.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<ReadingSink>> {
        self.sink.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for ManualSource {
    fn capabilities(&self) -> SensorCapabilities {
        self.capabilities
    }

    fn register(&self, sink: ReadingSink) -> Result<(), CollectorError> {
        let mut slot = self.write();
        if slot.is_some() {
            return Err(CollectorError::AlreadyRegistered);
        }
        *slot = Some(sink);
        Ok(())
    }

    fn unregister(&self) {
        self.write().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_push_reaches_sink_only_while_registered() {
        let source = ManualSource::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        assert!(!source.push(SensorReading::heart_rate(60.0)));

        source
            .register(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(source.push(SensorReading::heart_rate(60.0)));
        assert!(source.push(SensorReading::accelerometer(0.0, 0.0, 9.81)));

        source.unregister();
        assert!(!source.push(SensorReading::heart_rate(61.0)));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister_waits_for_delivery_in_progress() {
        let source = Arc::new(ManualSource::new());
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        source
            .register(Arc::new(move |_| {
                std::thread::sleep(std::time::Duration::from_millis(100));
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let pusher = {
            let source = source.clone();
            std::thread::spawn(move || source.push(SensorReading::heart_rate(60.0)))
        };
        while delivered.load(Ordering::SeqCst) == 0 && source.sink.try_write().is_ok() {
            std::thread::yield_now();
        }
        source.unregister();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert!(pusher.join().unwrap());
    }

    #[test]
    fn test_missing_metric_is_dropped() {
        let source = ManualSource::with_capabilities(SensorCapabilities {
            heart_rate: false,
            accelerometer: true,
        });
        source.register(Arc::new(|_| {})).unwrap();
        assert!(!source.push(SensorReading::heart_rate(60.0)));
        assert!(source.push(SensorReading::accelerometer(1.0, 1.0, 1.0)));
    }
}
