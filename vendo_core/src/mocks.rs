//! Test and helper mocks for vendo_core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vendo_traits::{Actuator, DistanceSensor};

/// Distance sensor backed by a shared cell; clones see the same reading.
#[derive(Clone, Default)]
pub struct MockDistanceSensor {
    reading: Arc<Mutex<Option<f32>>>,
}

impl MockDistanceSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, distance_cm: Option<f32>) {
        if let Ok(mut r) = self.reading.lock() {
            *r = distance_cm;
        }
    }
}

impl DistanceSensor for MockDistanceSensor {
    fn read_cm(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<f32>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .reading
            .lock()
            .map_err(|_| std::io::Error::other("poisoned mock"))?
            .to_owned())
    }
}

/// A sensor that always errors on read; the loop must treat it as absent.
pub struct FailingDistanceSensor;

impl DistanceSensor for FailingDistanceSensor {
    fn read_cm(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<f32>, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("sensor fault")))
    }
}

/// Relay mock; clones share the pin state so tests can probe it.
#[derive(Clone, Default)]
pub struct MockActuator {
    on: Arc<AtomicBool>,
}

impl MockActuator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actuator for MockActuator {
    fn energize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.on.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn deenergize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.on.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}
