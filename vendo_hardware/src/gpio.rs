//! Raspberry Pi GPIO backends (feature `hardware`).

use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};

use crate::error::{HwError, Result};
use vendo_traits::{Actuator, DistanceSensor};

fn gpio_err(e: rppal::gpio::Error) -> HwError {
    HwError::Gpio(e.to_string())
}

/// HC-SR04 ultrasonic ranger. One 10 µs trigger pulse, then the echo pin
/// goes high for the round-trip time of the ping.
pub struct HcSr04 {
    trigger: OutputPin,
    echo: InputPin,
}

impl HcSr04 {
    pub fn new(trigger_pin: u8, echo_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let mut trigger = gpio.get(trigger_pin).map_err(gpio_err)?.into_output();
        let echo = gpio.get(echo_pin).map_err(gpio_err)?.into_input_pulldown();
        trigger.set_low();
        Ok(Self { trigger, echo })
    }

    fn measure(&mut self, timeout: Duration) -> Result<Option<f32>> {
        let deadline = Instant::now() + timeout;

        self.trigger.set_high();
        std::thread::sleep(Duration::from_micros(10));
        self.trigger.set_low();

        while self.echo.is_low() {
            if Instant::now() >= deadline {
                return Ok(None); // no echo: nothing in range
            }
            std::hint::spin_loop();
        }
        let rise = Instant::now();
        while self.echo.is_high() {
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::hint::spin_loop();
        }
        // Sound travels ~343 m/s; out-and-back gives 58.3 µs per cm.
        let cm = rise.elapsed().as_micros() as f32 / 58.3;
        tracing::trace!(cm, "hc-sr04 sample");
        Ok(Some(cm))
    }
}

impl DistanceSensor for HcSr04 {
    fn read_cm(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Option<f32>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.measure(timeout)?)
    }
}

/// Active-high relay on a single output pin.
pub struct RelayOutput {
    pin: OutputPin,
}

impl RelayOutput {
    pub fn new(pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let mut pin = gpio.get(pin).map_err(gpio_err)?.into_output();
        pin.set_low();
        Ok(Self { pin })
    }
}

impl Actuator for RelayOutput {
    fn energize(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.pin.set_high();
        Ok(())
    }

    fn deenergize(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.pin.set_low();
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.pin.is_set_high()
    }
}

/// Falling-edge interrupt input for the coin acceptor and flow meter.
/// The callback runs on rppal's interrupt thread and must stay as small as
/// the pulse producers it feeds.
pub struct EdgeInput {
    _pin: InputPin,
}

impl EdgeInput {
    pub fn new(pin: u8, mut on_edge: impl FnMut() + Send + 'static) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let mut pin = gpio.get(pin).map_err(gpio_err)?.into_input_pullup();
        pin.set_async_interrupt(Trigger::FallingEdge, move |_level: Level| on_edge())
            .map_err(gpio_err)?;
        Ok(Self { _pin: pin })
    }
}
