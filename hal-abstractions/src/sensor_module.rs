//! Sensor-module power and pull-up control
//!
//! The external sensor rail and its bus pull-ups sit on a small add-on
//! module whose wiring changed between hardware revisions: R1.1 boards
//! switch a dedicated VDD supply pin, earlier boards power the rail through
//! a strong channel-A pull-up. Channel B carries the 1-Wire data line and
//! always needs its own 4.7k pull-up while the bus is in use.

/// Sensor-module signal channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    A,
    B,
}

/// Pull-up configuration of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    None,
    /// 4.7k data-line pull-up.
    Up4k7,
    /// 56R rail-feed pull-up.
    Up56r,
}

/// Direction of a channel pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinMode {
    Input,
    Output,
}

/// Sensor-module hardware revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Revision {
    R1_0,
    R1_1,
}

/// Control surface of the sensor module.
///
/// All operations are fallible; the module may sit behind an I2C expander
/// whose transfers can fail. Callers decide which failures are fatal.
pub trait SensorModule {
    type Error;

    /// (Re)initialize the module hardware. Idempotent.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Which hardware revision is fitted.
    fn revision(&self) -> Revision;

    /// Switch the dedicated rail supply (R1.1 and later).
    fn set_vdd(&mut self, on: bool) -> Result<(), Self::Error>;

    /// Configure a channel's pull-up.
    fn set_pull(&mut self, channel: Channel, pull: Pull) -> Result<(), Self::Error>;

    /// Configure a channel's pin direction.
    fn set_mode(&mut self, channel: Channel, mode: PinMode) -> Result<(), Self::Error>;
}
