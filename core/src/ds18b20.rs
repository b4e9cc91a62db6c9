//! Multi-drop DS18B20 temperature acquisition
//!
//! Drives one or more DS18B20-family thermometers sharing a single 1-Wire
//! bus: claims the shared sensor rail, enumerates the bus, broadcasts a
//! conversion to every device at once, waits out the resolution-dependent
//! conversion time and reads back each scratchpad individually. Any fault,
//! from a missing presence pulse to a bad checksum, restarts the whole
//! acquisition cycle from scratch; the driver retries indefinitely and
//! never surfaces a fault as anything but an error event.
//!
//! The machine is written as a step function returning a dispatch decision.
//! The driving loop applies [`Step::Continue`] without yielding, which is
//! how a failing state falls through to error handling within the same
//! scheduler invocation; only a suspend hands control back.

use flood_node_hal::{
    crc8, Channel, OneWireBus, PinMode, Scheduler, SensorModule, TaskId, Tick,
};

use crate::power::PowerArbiter;
use crate::registry::SensorRegistry;

const SCRATCHPAD_SIZE: usize = 9;

/// Settle time between claiming the rail and first touching the bus, and
/// the delay of the boot-time discovery entry.
const SETTLE_DELAY: Tick = 10;

// ROM and function commands.
const CMD_CONVERT: u8 = 0x44;
const CMD_WRITE_SCRATCHPAD: u8 = 0x4E;
const CMD_READ_SCRATCHPAD: u8 = 0xBE;

// Alarm trigger registers, written alongside the configuration byte on
// every broadcast reconfiguration. The alarm search is not used.
const TH_DEFAULT: u8 = 0x75;
const TL_DEFAULT: u8 = 0x70;

/// Conversion bit depth. Higher resolution converts longer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    Bits9,
    Bits10,
    Bits11,
    Bits12,
}

impl Resolution {
    /// Worst-case conversion time in ticks.
    fn conversion_delay(self) -> Tick {
        match self {
            Resolution::Bits9 => 100,
            Resolution::Bits10 => 190,
            Resolution::Bits11 => 380,
            Resolution::Bits12 => 760,
        }
    }

    fn config_byte(self) -> u8 {
        (self as u8) << 5 | 0x1F
    }
}

/// A measurement request was rejected because a cycle is already in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Busy;

/// Acquisition events delivered to the owner.
pub trait EventHandler {
    /// A device produced a fresh, validated reading.
    fn on_update(&mut self, address: u64, celsius: f32);

    /// The acquisition cycle failed and will restart from discovery.
    fn on_error(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Error,
    Preinitialize,
    Initialize,
    Ready,
    Measure,
    Read,
    Update,
}

/// One dispatch decision of the step function.
enum Step {
    /// Fall through to the next state within the same invocation.
    Continue(State),
    /// Park in the next state until the next external trigger.
    Suspend(State),
    /// Park in the next state with a scheduled continuation.
    SuspendFor(State, Tick),
}

/// Multi-sensor acquisition driver for one 1-Wire bus.
///
/// `N` is the registry capacity; discovery beyond it is silently truncated.
/// The driver owns its bus and shares the rail [`PowerArbiter`] with the
/// other drivers on the same sensor module.
pub struct Ds18b20<'a, B, M, S, const N: usize>
where
    B: OneWireBus,
    M: SensorModule,
    S: Scheduler,
{
    bus: B,
    power: &'a PowerArbiter<M>,
    scheduler: &'a S,
    resolution: Resolution,
    registry: SensorRegistry<N>,
    state: State,
    measurement_in_progress: bool,
    powered: bool,
    update_interval: Option<Tick>,
    measure_task: TaskId,
    interval_task: TaskId,
}

impl<'a, B, M, S, const N: usize> Ds18b20<'a, B, M, S, N>
where
    B: OneWireBus,
    M: SensorModule,
    S: Scheduler,
{
    /// Create the driver and schedule its first state-machine entry, so
    /// discovery runs shortly after boot.
    ///
    /// `measure_task` must be wired to [`run`](Self::run) and
    /// `interval_task` to [`on_interval`](Self::on_interval).
    pub fn new(
        bus: B,
        power: &'a PowerArbiter<M>,
        scheduler: &'a S,
        resolution: Resolution,
        measure_task: TaskId,
        interval_task: TaskId,
    ) -> Self {
        scheduler.schedule_once(measure_task, SETTLE_DELAY);

        Self {
            bus,
            power,
            scheduler,
            resolution,
            registry: SensorRegistry::new(),
            state: State::Preinitialize,
            measurement_in_progress: false,
            powered: false,
            update_interval: None,
            measure_task,
            interval_task,
        }
    }

    /// Request one acquisition cycle. Fails while a cycle is in flight;
    /// after a success, exactly one update-or-error event sequence follows.
    pub fn request_measurement(&mut self) -> Result<(), Busy> {
        if self.measurement_in_progress {
            return Err(Busy);
        }

        self.measurement_in_progress = true;
        self.scheduler.schedule_once(self.measure_task, 0);

        Ok(())
    }

    /// Set or disable the periodic measurement trigger. Enabling it also
    /// requests a measurement right away.
    pub fn set_update_interval(&mut self, interval: Option<Tick>) {
        self.update_interval = interval;

        match interval {
            None => self.scheduler.cancel(self.interval_task),
            Some(interval) => {
                self.scheduler.schedule_periodic(self.interval_task, interval);
                let _ = self.request_measurement();
            }
        }
    }

    /// Periodic-trigger entry point; wire the interval task here.
    pub fn on_interval(&mut self) {
        let _ = self.request_measurement();
    }

    /// Currently configured periodic trigger, if any.
    pub fn update_interval(&self) -> Option<Tick> {
        self.update_interval
    }

    /// Number of devices found by the last discovery pass.
    pub fn found_count(&self) -> usize {
        self.registry.len()
    }

    /// Registry index of the device with this address.
    pub fn lookup(&self, address: u64) -> Option<usize> {
        self.registry.find(address)
    }

    /// Last validated reading of the device, scaled to degrees Celsius.
    pub fn get_celsius(&self, address: u64) -> Option<f32> {
        let record = self.registry.get(self.lookup(address)?)?;
        record.valid.then(|| record.celsius())
    }

    /// Last validated reading of the device, unscaled.
    pub fn get_raw(&self, address: u64) -> Option<i16> {
        let record = self.registry.get(self.lookup(address)?)?;
        record.valid.then_some(record.raw)
    }

    /// State-machine task body; wire the measure task here.
    ///
    /// Runs states back to back until one suspends. Faults re-dispatch the
    /// error state within the same invocation, without yielding.
    pub fn run<E: EventHandler>(&mut self, events: &mut E) {
        loop {
            match self.step(events) {
                Step::Continue(next) => self.state = next,
                Step::Suspend(next) => {
                    self.state = next;
                    return;
                }
                Step::SuspendFor(next, delay) => {
                    self.state = next;
                    self.scheduler.schedule_once(self.measure_task, delay);
                    return;
                }
            }
        }
    }

    fn step<E: EventHandler>(&mut self, events: &mut E) -> Step {
        match self.state {
            State::Error => {
                self.registry.invalidate_all();
                self.measurement_in_progress = false;
                let _ = self.power.release(&mut self.powered);
                events.on_error();
                Step::Suspend(State::Preinitialize)
            }

            State::Preinitialize => {
                let initialized = self.power.with_module(|module| {
                    if module.init().is_err() {
                        return false;
                    }
                    let _ = module.set_mode(Channel::B, PinMode::Input);
                    true
                });
                if !initialized {
                    return Step::Continue(State::Error);
                }

                if self.power.acquire(&mut self.powered).is_err() {
                    return Step::Continue(State::Error);
                }

                Step::SuspendFor(State::Initialize, SETTLE_DELAY)
            }

            State::Initialize => {
                self.registry.clear();
                self.bus.search_start();
                while !self.registry.is_full() {
                    let Some(address) = self.bus.search_next() else {
                        break;
                    };
                    let _ = self.registry.record(address);
                }

                if self.registry.is_empty() {
                    return Step::Continue(State::Error);
                }

                // Broadcast the conversion resolution to every device.
                let config = [
                    CMD_WRITE_SCRATCHPAD,
                    TH_DEFAULT,
                    TL_DEFAULT,
                    self.resolution.config_byte(),
                ];
                self.bus.transaction_start();
                let present = self.bus.reset();
                if present {
                    self.bus.skip_rom();
                    self.bus.write(&config);
                }
                self.bus.transaction_stop();
                if !present {
                    return Step::Continue(State::Error);
                }

                if self.measurement_in_progress {
                    Step::Continue(State::Ready)
                } else {
                    if self.power.release(&mut self.powered).is_err() {
                        return Step::Continue(State::Error);
                    }
                    Step::Suspend(State::Ready)
                }
            }

            State::Ready => {
                if self.power.acquire(&mut self.powered).is_err() {
                    return Step::Continue(State::Error);
                }
                Step::SuspendFor(State::Measure, SETTLE_DELAY)
            }

            State::Measure => {
                self.bus.transaction_start();
                let present = self.bus.reset();
                if present {
                    self.bus.skip_rom();
                    self.bus.write_byte(CMD_CONVERT);
                }
                self.bus.transaction_stop();
                if !present {
                    return Step::Continue(State::Error);
                }

                Step::SuspendFor(State::Read, self.resolution.conversion_delay())
            }

            State::Read => {
                for index in 0..self.registry.len() {
                    let address = match self.registry.get(index) {
                        Some(record) => record.address,
                        None => return Step::Continue(State::Error),
                    };

                    let mut scratchpad = [0u8; SCRATCHPAD_SIZE];
                    self.bus.transaction_start();
                    let present = self.bus.reset();
                    if present {
                        self.bus.select(address);
                        self.bus.write_byte(CMD_READ_SCRATCHPAD);
                        self.bus.read(&mut scratchpad);
                    }
                    self.bus.transaction_stop();

                    if !present || !scratchpad_valid(&scratchpad) {
                        return Step::Continue(State::Error);
                    }

                    let raw = i16::from_le_bytes([scratchpad[0], scratchpad[1]]);
                    if let Some(record) = self.registry.get_mut(index) {
                        record.raw = raw;
                        record.valid = true;
                    }
                }

                if self.power.release(&mut self.powered).is_err() {
                    return Step::Continue(State::Error);
                }

                Step::Continue(State::Update)
            }

            State::Update => {
                self.measurement_in_progress = false;
                for record in self.registry.iter() {
                    events.on_update(record.address, record.celsius());
                }
                Step::Suspend(State::Ready)
            }
        }
    }
}

/// Sentinel bytes 5 and 7 must read back as fixed values and the CRC over
/// the whole scratchpad, checksum byte included, must come out zero.
fn scratchpad_valid(scratchpad: &[u8; SCRATCHPAD_SIZE]) -> bool {
    if scratchpad[5] != 0xFF {
        return false;
    }

    if scratchpad[7] != 0x10 {
        return false;
    }

    crc8(scratchpad) == 0
}
