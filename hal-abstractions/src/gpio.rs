//! GPIO-backed sensor module
//!
//! Implements [`SensorModule`] for boards where the rail supply and the bus
//! pull-ups are switched directly by MCU pins (each pull-up behind a FET),
//! rather than through an I2C expander.

use embedded_hal::digital::OutputPin;

use crate::sensor_module::{Channel, PinMode, Pull, Revision, SensorModule};

/// Sensor module driven by three output pins.
///
/// `vdd` switches the dedicated rail supply on R1.1 boards and is absent on
/// earlier revisions, where the rail is fed through the channel-A pull-up.
pub struct GpioSensorModule<P: OutputPin> {
    vdd: Option<P>,
    pull_a: P,
    pull_b: P,
    revision: Revision,
}

impl<P: OutputPin> GpioSensorModule<P> {
    /// R1.0 wiring: no VDD switch, rail fed through the channel-A pull-up.
    pub fn new_r1_0(pull_a: P, pull_b: P) -> Self {
        Self {
            vdd: None,
            pull_a,
            pull_b,
            revision: Revision::R1_0,
        }
    }

    /// R1.1 wiring: dedicated VDD switch pin.
    pub fn new_r1_1(vdd: P, pull_a: P, pull_b: P) -> Self {
        Self {
            vdd: Some(vdd),
            pull_a,
            pull_b,
            revision: Revision::R1_1,
        }
    }
}

impl<P: OutputPin> SensorModule for GpioSensorModule<P> {
    type Error = P::Error;

    fn init(&mut self) -> Result<(), Self::Error> {
        // Pins come pre-configured from the HAL; nothing to bring up.
        Ok(())
    }

    fn revision(&self) -> Revision {
        self.revision
    }

    fn set_vdd(&mut self, on: bool) -> Result<(), Self::Error> {
        match (&mut self.vdd, on) {
            (Some(pin), true) => pin.set_high(),
            (Some(pin), false) => pin.set_low(),
            // No VDD switch fitted on this revision.
            (None, _) => Ok(()),
        }
    }

    fn set_pull(&mut self, channel: Channel, pull: Pull) -> Result<(), Self::Error> {
        let pin = match channel {
            Channel::A => &mut self.pull_a,
            Channel::B => &mut self.pull_b,
        };

        match pull {
            Pull::None => pin.set_low(),
            Pull::Up4k7 | Pull::Up56r => pin.set_high(),
        }
    }

    fn set_mode(&mut self, _channel: Channel, _mode: PinMode) -> Result<(), Self::Error> {
        // Pin directions are fixed by the board wiring here; the data-line
        // direction is owned by the 1-Wire transport.
        Ok(())
    }
}
