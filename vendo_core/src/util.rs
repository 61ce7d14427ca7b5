//! Common time/volume helpers for vendo_core.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Compute the period in milliseconds for a given tick rate in Hz.
/// Clamps `hz` to at least 1 to avoid division by zero.
#[inline]
pub fn period_ms(hz: u32) -> u64 {
    (MILLIS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Convert flow-meter pulses to milliliters for the given calibration.
#[inline]
pub fn pulses_to_ml(pulses: u64, pulses_per_liter: f32) -> f32 {
    if pulses_per_liter <= 0.0 || !pulses_per_liter.is_finite() {
        return 0.0;
    }
    (pulses as f32 / pulses_per_liter) * 1000.0
}

/// Pulse count that must be delivered to pour `credit_ml` milliliters:
/// floor(credit_ml / 1000 * pulses_per_liter).
#[inline]
pub fn target_pulses(credit_ml: u32, pulses_per_liter: f32) -> u32 {
    if pulses_per_liter <= 0.0 || !pulses_per_liter.is_finite() {
        return 0;
    }
    let t = (credit_ml as f64 / 1000.0) * f64::from(pulses_per_liter);
    if t >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        t.floor() as u32
    }
}
