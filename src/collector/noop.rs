//! Source for devices with neither heart-rate nor accelerometer hardware.
//!
//! Registration succeeds so a session can still run; every emitted sample
//! simply carries no sensor fields.

use crate::collector::types::SensorCapabilities;
use crate::collector::{CollectorError, ReadingSink, SensorSource};
use std::sync::atomic::{AtomicBool, Ordering};

/// A source that never emits readings.
#[derive(Debug, Default)]
pub struct NoopSource {
    registered: AtomicBool,
}

impl NoopSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a sink is currently registered.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}

impl SensorSource for NoopSource {
    fn capabilities(&self) -> SensorCapabilities {
        SensorCapabilities::none()
    }

    fn register(&self, _sink: ReadingSink) -> Result<(), CollectorError> {
        if self.registered.swap(true, Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRegistered);
        }
        Ok(())
    }

    fn unregister(&self) {
        self.registered.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_noop_register_twice() {
        let source = NoopSource::new();
        let sink: ReadingSink = Arc::new(|_| {});
        assert!(source.register(sink.clone()).is_ok());
        assert!(matches!(
            source.register(sink.clone()),
            Err(CollectorError::AlreadyRegistered)
        ));
        source.unregister();
        assert!(!source.is_registered());
        assert!(source.register(sink).is_ok());
    }
}
