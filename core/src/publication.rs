//! Change-and-heartbeat publication gating
//!
//! Radio airtime is the main battery cost on this node, so readings are
//! only transmitted when they moved enough to matter or when the quantity
//! has been silent for its heartbeat interval. One generic gate serves
//! every reported quantity; the application instantiates it per signal with
//! that signal's threshold and heartbeat.

use flood_node_hal::Tick;

/// Decides whether a new reading differs enough from the last published one
/// to be worth transmitting ahead of the heartbeat.
pub trait ChangeRule<V> {
    fn significant(&self, new: &V, last: &V) -> bool;
}

/// Significant when the reading moved at least the threshold away from the
/// last published value.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AbsoluteThreshold(pub f32);

impl ChangeRule<f32> for AbsoluteThreshold {
    fn significant(&self, new: &f32, last: &f32) -> bool {
        let delta = if new > last { new - last } else { last - new };
        delta >= self.0
    }
}

/// Significant on any change; used for alarms and other discrete signals.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AnyChange;

impl<V: PartialEq> ChangeRule<V> for AnyChange {
    fn significant(&self, new: &V, last: &V) -> bool {
        new != last
    }
}

/// Per-quantity publication state: the last published value and the
/// deadline after which even an unchanged value goes out again.
///
/// A fresh gate has no last value, so the first reading always publishes.
pub struct PublicationPolicy<V, R> {
    rule: R,
    heartbeat: Tick,
    last_value: Option<V>,
    next_allowed_tick: Tick,
}

impl<V: Copy, R: ChangeRule<V>> PublicationPolicy<V, R> {
    pub const fn new(rule: R, heartbeat: Tick) -> Self {
        Self {
            rule,
            heartbeat,
            last_value: None,
            next_allowed_tick: 0,
        }
    }

    /// Gate one reading. On publish the reading becomes the new reference
    /// value and the heartbeat deadline moves to `now + heartbeat`.
    pub fn on_new_reading(&mut self, value: V, now: Tick) -> bool {
        let changed = match &self.last_value {
            None => true,
            Some(last) => self.rule.significant(&value, last),
        };

        if !changed && now < self.next_allowed_tick {
            return false;
        }

        self.last_value = Some(value);
        self.next_allowed_tick = now.saturating_add(self.heartbeat);

        true
    }

    /// Last published value, if any reading has been published yet.
    pub fn last_value(&self) -> Option<V> {
        self.last_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temperature_gate() -> PublicationPolicy<f32, AbsoluteThreshold> {
        PublicationPolicy::new(AbsoluteThreshold(0.2), 900)
    }

    #[test]
    fn first_reading_always_publishes() {
        let mut gate = temperature_gate();
        assert!(gate.on_new_reading(0.05, 0));
        assert_eq!(gate.last_value(), Some(0.05));
    }

    #[test]
    fn small_move_suppresses_until_the_heartbeat() {
        let mut gate = temperature_gate();
        assert!(gate.on_new_reading(20.0, 100));

        // Inside the heartbeat window, 0.1 degrees is not worth airtime.
        assert!(!gate.on_new_reading(20.1, 200));
        assert_eq!(gate.last_value(), Some(20.0));

        // 0.3 degrees is.
        assert!(gate.on_new_reading(20.3, 300));
        assert_eq!(gate.last_value(), Some(20.3));
    }

    #[test]
    fn unchanged_value_publishes_once_the_heartbeat_expires() {
        let mut gate = temperature_gate();
        assert!(gate.on_new_reading(20.0, 100));
        assert!(!gate.on_new_reading(20.0, 999));
        assert!(gate.on_new_reading(20.0, 1000));
    }

    #[test]
    fn publish_resets_the_heartbeat_deadline() {
        let mut gate = temperature_gate();
        assert!(gate.on_new_reading(20.0, 0));
        assert!(gate.on_new_reading(21.0, 400));
        // Deadline moved to 400 + 900.
        assert!(!gate.on_new_reading(21.0, 1200));
        assert!(gate.on_new_reading(21.0, 1300));
    }

    #[test]
    fn boolean_gate_publishes_on_flips_and_heartbeats() {
        let mut gate: PublicationPolicy<bool, AnyChange> = PublicationPolicy::new(AnyChange, 900);
        assert!(gate.on_new_reading(false, 0));
        assert!(!gate.on_new_reading(false, 10));
        assert!(gate.on_new_reading(true, 20));
        assert!(!gate.on_new_reading(true, 30));
        assert!(gate.on_new_reading(true, 920));
    }

    #[test]
    fn threshold_compares_magnitude_in_both_directions() {
        let rule = AbsoluteThreshold(0.5);
        assert!(rule.significant(&19.5, &20.0));
        assert!(rule.significant(&20.5, &20.0));
        assert!(!rule.significant(&20.4, &20.0));
        assert!(!rule.significant(&19.7, &20.0));
    }
}
