//! Node application wiring
//!
//! Composes the drivers into the flood-detector node: per-quantity
//! publication gates with the production thresholds, radio topic
//! formatting, battery forwarding, the boot-time pairing request and the
//! timed downgrade from service-mode to normal-mode reporting cadence.

use core::fmt::Write as _;

use heapless::String;

use flood_node_hal::{Radio, Scheduler, TaskId, Tick};

use crate::ds18b20::EventHandler;
use crate::publication::{AbsoluteThreshold, AnyChange, PublicationPolicy};

/// Node name announced in the pairing request.
pub const PAIRING_NAME: &str = "flood-detector-with-ext-temp";

/// Firmware version announced in the pairing request.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long the node reports at service-mode cadence after boot.
pub const SERVICE_MODE_INTERVAL: Tick = 60 * 60 * 1000;

/// Radio channel of the onboard thermometer (alternate-address slot).
const ONBOARD_TEMPERATURE_CHANNEL: u8 = 0x01;

const FLOOD_ALARM_TOPIC: &str = "flood-detector/a/alarm";

const TEMPERATURE_PUB_CHANGE: f32 = 0.2;
const TEMPERATURE_PUB_NO_CHANGE_INTERVAL: Tick = 15 * 60 * 1000;

const DS18B20_PUB_CHANGE: f32 = 0.5;
const DS18B20_PUB_NO_CHANGE_INTERVAL: Tick = 5 * 60 * 1000;

const FLOOD_PUB_NO_CHANGE_INTERVAL: Tick = 15 * 60 * 1000;

/// Distinct external thermometers the node gates individually.
const EXT_THERMOMETER_SLOTS: usize = 8;

/// Reporting cadence of the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Fast cadence right after boot, for installation checks.
    Service,
    Normal,
}

/// Update intervals applied to each measured quantity in a given mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateIntervals {
    pub onboard_temperature: Tick,
    pub flood_detector: Tick,
    pub bus_thermometers: Tick,
}

impl UpdateIntervals {
    pub const fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Service => Self {
                onboard_temperature: 5 * 1000,
                flood_detector: 1000,
                bus_thermometers: 5 * 1000,
            },
            Mode::Normal => Self {
                onboard_temperature: 60 * 1000,
                flood_detector: 5 * 1000,
                bus_thermometers: 60 * 1000,
            },
        }
    }
}

/// The composed node application.
///
/// Owns the radio and the publication state; the drivers themselves stay
/// outside and feed readings in through the handler methods, so the wiring
/// never needs to borrow a driver while that driver is mid-step.
pub struct Application<'a, R: Radio, S: Scheduler> {
    radio: R,
    scheduler: &'a S,
    mode: Mode,
    onboard_temperature: PublicationPolicy<f32, AbsoluteThreshold>,
    flood_alarm: PublicationPolicy<bool, AnyChange>,
    bus_thermometers: heapless::Vec<
        (u64, PublicationPolicy<f32, AbsoluteThreshold>),
        EXT_THERMOMETER_SLOTS,
    >,
}

impl<'a, R: Radio, S: Scheduler> Application<'a, R, S> {
    /// Boot the application: announce the node to the gateway and start
    /// the service-mode window. `service_task` fires once when the window
    /// ends; wire it to [`switch_to_normal_mode`](Self::switch_to_normal_mode).
    pub fn new(mut radio: R, scheduler: &'a S, service_task: TaskId) -> Self {
        radio.pairing_request(PAIRING_NAME, VERSION);
        scheduler.schedule_once(service_task, SERVICE_MODE_INTERVAL);

        Self {
            radio,
            scheduler,
            mode: Mode::Service,
            onboard_temperature: PublicationPolicy::new(
                AbsoluteThreshold(TEMPERATURE_PUB_CHANGE),
                TEMPERATURE_PUB_NO_CHANGE_INTERVAL,
            ),
            flood_alarm: PublicationPolicy::new(AnyChange, FLOOD_PUB_NO_CHANGE_INTERVAL),
            bus_thermometers: heapless::Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Cadence the peripheral drivers should currently run at.
    pub fn update_intervals(&self) -> UpdateIntervals {
        UpdateIntervals::for_mode(self.mode)
    }

    /// End of the service window; returns the normal-mode cadence for the
    /// caller to apply to its drivers.
    pub fn switch_to_normal_mode(&mut self) -> UpdateIntervals {
        self.mode = Mode::Normal;
        self.update_intervals()
    }

    /// Onboard thermometer reading, gated and published on its channel.
    pub fn on_onboard_temperature(&mut self, celsius: f32) {
        let now = self.scheduler.now();
        if self.onboard_temperature.on_new_reading(celsius, now) {
            self.radio
                .pub_temperature(ONBOARD_TEMPERATURE_CHANNEL, celsius);
        }
    }

    /// Flood-detector sample, gated and published as a boolean alarm.
    pub fn on_flood_alarm(&mut self, alarm: bool) {
        let now = self.scheduler.now();
        if self.flood_alarm.on_new_reading(alarm, now) {
            self.radio.pub_bool(FLOOD_ALARM_TOPIC, alarm);
        }
    }

    /// Battery voltage is forwarded as-is; the battery wrapper already
    /// paces its own updates.
    pub fn on_battery_voltage(&mut self, voltage: f32) {
        self.radio.pub_battery(voltage);
    }

    fn bus_policy_for(
        &mut self,
        address: u64,
    ) -> Option<&mut PublicationPolicy<f32, AbsoluteThreshold>> {
        if let Some(index) = self
            .bus_thermometers
            .iter()
            .position(|(known, _)| *known == address)
        {
            return self.bus_thermometers.get_mut(index).map(|(_, gate)| gate);
        }

        let gate = PublicationPolicy::new(
            AbsoluteThreshold(DS18B20_PUB_CHANGE),
            DS18B20_PUB_NO_CHANGE_INTERVAL,
        );
        if self.bus_thermometers.push((address, gate)).is_err() {
            return None;
        }

        let last = self.bus_thermometers.len() - 1;
        self.bus_thermometers.get_mut(last).map(|(_, gate)| gate)
    }
}

impl<R: Radio, S: Scheduler> EventHandler for Application<'_, R, S> {
    fn on_update(&mut self, address: u64, celsius: f32) {
        let now = self.scheduler.now();

        // Past the slot limit readings go out ungated rather than not at
        // all.
        let publish = match self.bus_policy_for(address) {
            Some(gate) => gate.on_new_reading(celsius, now),
            None => true,
        };
        if !publish {
            return;
        }

        let mut topic: String<64> = String::new();
        if write!(topic, "ext-thermometer/{address:x}/temperature").is_ok() {
            self.radio.pub_float(&topic, celsius);
        }
    }

    fn on_error(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::string::String as StdString;
    use std::vec::Vec as StdVec;

    #[derive(Default)]
    struct RadioLog {
        pairing: StdVec<(StdString, StdString)>,
        temperatures: StdVec<(u8, f32)>,
        floats: StdVec<(StdString, f32)>,
        bools: StdVec<(StdString, bool)>,
        battery: StdVec<f32>,
    }

    #[derive(Default)]
    struct MockRadio {
        log: RefCell<RadioLog>,
    }

    impl Radio for &MockRadio {
        fn pairing_request(&mut self, name: &str, version: &str) {
            self.log
                .borrow_mut()
                .pairing
                .push((name.into(), version.into()));
        }

        fn pub_temperature(&mut self, channel: u8, celsius: f32) {
            self.log.borrow_mut().temperatures.push((channel, celsius));
        }

        fn pub_float(&mut self, topic: &str, value: f32) {
            self.log.borrow_mut().floats.push((topic.into(), value));
        }

        fn pub_bool(&mut self, topic: &str, value: bool) {
            self.log.borrow_mut().bools.push((topic.into(), value));
        }

        fn pub_battery(&mut self, voltage: f32) {
            self.log.borrow_mut().battery.push(voltage);
        }
    }

    #[derive(Default)]
    struct MockScheduler {
        now: Cell<Tick>,
        once: RefCell<StdVec<(TaskId, Tick)>>,
    }

    impl Scheduler for MockScheduler {
        fn now(&self) -> Tick {
            self.now.get()
        }

        fn schedule_once(&self, task: TaskId, delay: Tick) {
            self.once.borrow_mut().push((task, self.now.get() + delay));
        }

        fn schedule_periodic(&self, _task: TaskId, _interval: Tick) {}

        fn cancel(&self, _task: TaskId) {}
    }

    const SERVICE_TASK: TaskId = TaskId(9);

    #[test]
    fn boot_pairs_and_schedules_the_service_window() {
        let radio = MockRadio::default();
        let scheduler = MockScheduler::default();
        let app = Application::new(&radio, &scheduler, SERVICE_TASK);

        assert_eq!(app.mode(), Mode::Service);
        assert_eq!(
            radio.log.borrow().pairing,
            vec![(PAIRING_NAME.to_owned(), VERSION.to_owned())]
        );
        assert_eq!(
            scheduler.once.borrow().as_slice(),
            &[(SERVICE_TASK, SERVICE_MODE_INTERVAL)]
        );
    }

    #[test]
    fn service_window_downgrades_to_normal_cadence() {
        let radio = MockRadio::default();
        let scheduler = MockScheduler::default();
        let mut app = Application::new(&radio, &scheduler, SERVICE_TASK);

        assert_eq!(
            app.update_intervals(),
            UpdateIntervals {
                onboard_temperature: 5_000,
                flood_detector: 1_000,
                bus_thermometers: 5_000,
            }
        );

        let normal = app.switch_to_normal_mode();
        assert_eq!(app.mode(), Mode::Normal);
        assert_eq!(
            normal,
            UpdateIntervals {
                onboard_temperature: 60_000,
                flood_detector: 5_000,
                bus_thermometers: 60_000,
            }
        );
    }

    #[test]
    fn onboard_temperature_is_gated_before_the_radio() {
        let radio = MockRadio::default();
        let scheduler = MockScheduler::default();
        let mut app = Application::new(&radio, &scheduler, SERVICE_TASK);

        scheduler.now.set(100);
        app.on_onboard_temperature(21.0);
        app.on_onboard_temperature(21.1);
        app.on_onboard_temperature(21.3);

        assert_eq!(
            radio.log.borrow().temperatures,
            vec![(0x01, 21.0), (0x01, 21.3)]
        );
    }

    #[test]
    fn bus_thermometer_updates_publish_under_their_address_topic() {
        let radio = MockRadio::default();
        let scheduler = MockScheduler::default();
        let mut app = Application::new(&radio, &scheduler, SERVICE_TASK);

        scheduler.now.set(50);
        app.on_update(0x28FF_0000_0000_0028, 20.0);

        assert_eq!(
            radio.log.borrow().floats,
            vec![(
                "ext-thermometer/28ff000000000028/temperature".to_owned(),
                20.0
            )]
        );
    }

    #[test]
    fn bus_thermometers_are_gated_per_address() {
        let radio = MockRadio::default();
        let scheduler = MockScheduler::default();
        let mut app = Application::new(&radio, &scheduler, SERVICE_TASK);

        app.on_update(0x10, 20.0);
        app.on_update(0x28, 20.0);
        // Neither moved; both stay quiet inside their heartbeat.
        app.on_update(0x10, 20.2);
        app.on_update(0x28, 20.2);
        // One device moves past the threshold, the other does not.
        app.on_update(0x10, 20.6);

        let log = radio.log.borrow();
        assert_eq!(log.floats.len(), 3);
        assert_eq!(log.floats[0].1, 20.0);
        assert_eq!(log.floats[1].1, 20.0);
        assert_eq!(log.floats[2], ("ext-thermometer/10/temperature".to_owned(), 20.6));
    }

    #[test]
    fn flood_alarm_publishes_on_flips() {
        let radio = MockRadio::default();
        let scheduler = MockScheduler::default();
        let mut app = Application::new(&radio, &scheduler, SERVICE_TASK);

        app.on_flood_alarm(false);
        app.on_flood_alarm(false);
        app.on_flood_alarm(true);

        assert_eq!(
            radio.log.borrow().bools,
            vec![
                (FLOOD_ALARM_TOPIC.to_owned(), false),
                (FLOOD_ALARM_TOPIC.to_owned(), true),
            ]
        );
    }

    #[test]
    fn battery_voltage_is_forwarded_unconditionally() {
        let radio = MockRadio::default();
        let scheduler = MockScheduler::default();
        let mut app = Application::new(&radio, &scheduler, SERVICE_TASK);

        app.on_battery_voltage(2.95);
        app.on_battery_voltage(2.95);

        assert_eq!(radio.log.borrow().battery, vec![2.95, 2.95]);
    }
}
