//! Hardware backends for the vending controller.
//!
//! The default build ships simulators good enough to run the whole control
//! loop on a desk: shared-handle distance, probe-able relays, and a threaded
//! flow source that pulses while the pump runs. The `hardware` feature adds
//! Raspberry Pi GPIO backends (HC-SR04 ranging, relay outputs, edge-interrupt
//! pulse inputs) via `rppal`.

pub mod error;
#[cfg(feature = "hardware")]
pub mod gpio;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use vendo_traits::{Actuator, DistanceSensor};

/// Distance sensor whose reading is set from the outside through a cloneable
/// handle. `None` models "no echo".
pub struct SimulatedDistanceSensor {
    reading: Arc<Mutex<Option<f32>>>,
}

/// Setter side of a [`SimulatedDistanceSensor`].
#[derive(Clone)]
pub struct DistanceHandle {
    reading: Arc<Mutex<Option<f32>>>,
}

impl DistanceHandle {
    pub fn set(&self, distance_cm: Option<f32>) {
        if let Ok(mut r) = self.reading.lock() {
            *r = distance_cm;
        }
    }
}

impl SimulatedDistanceSensor {
    pub fn new() -> (Self, DistanceHandle) {
        let reading = Arc::new(Mutex::new(None));
        (
            Self {
                reading: reading.clone(),
            },
            DistanceHandle { reading },
        )
    }
}

impl DistanceSensor for SimulatedDistanceSensor {
    fn read_cm(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<Option<f32>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .reading
            .lock()
            .map_err(|_| error::HwError::Gpio("distance handle poisoned".into()))?
            .to_owned())
    }
}

/// Relay simulator; `probe()` gives test code a live view of the pin state.
#[derive(Default)]
pub struct SimulatedActuator {
    on: Arc<AtomicBool>,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> ActuatorProbe {
        ActuatorProbe {
            on: self.on.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ActuatorProbe {
    on: Arc<AtomicBool>,
}

impl ActuatorProbe {
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

impl Actuator for SimulatedActuator {
    fn energize(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.on.store(true, Ordering::SeqCst);
        tracing::debug!("simulated relay on");
        Ok(())
    }

    fn deenergize(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.on.store(false, Ordering::SeqCst);
        tracing::debug!("simulated relay off");
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

/// Background thread that fires the flow callback at a fixed pulse rate
/// while the watched pump probe reads on. Stops and joins on drop.
pub struct SimulatedFlowSource {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SimulatedFlowSource {
    /// `pulse_hz` pulses per second of simulated flow while `pump.is_on()`.
    pub fn spawn(
        pump: ActuatorProbe,
        pulse_hz: u32,
        mut on_pulse: impl FnMut() + Send + 'static,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();
        let period = Duration::from_micros(1_000_000 / u64::from(pulse_hz.max(1)));
        let handle = thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if pump.is_on() {
                    on_pulse();
                }
                thread::sleep(period);
            }
        });
        Self {
            shutdown,
            handle: Some(handle),
        }
    }
}

impl Drop for SimulatedFlowSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take()
            && h.join().is_err()
        {
            tracing::warn!("simulated flow thread panicked");
        }
    }
}
