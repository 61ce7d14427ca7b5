pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Distance-measuring primitive used for container presence detection.
///
/// Returns `Ok(None)` when the sensor produced no echo within the timeout;
/// callers must treat that as "nothing present", never as a stale reading.
pub trait DistanceSensor {
    fn read_cm(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<f32>, Box<dyn std::error::Error + Send + Sync>>;
}

/// A single on/off output (pump relay, solenoid valve).
pub trait Actuator {
    fn energize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn deenergize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn is_on(&self) -> bool;
}

impl<T: DistanceSensor + ?Sized> DistanceSensor for Box<T> {
    fn read_cm(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<f32>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read_cm(timeout)
    }
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn energize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).energize()
    }
    fn deenergize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).deenergize()
    }
    fn is_on(&self) -> bool {
        (**self).is_on()
    }
}
