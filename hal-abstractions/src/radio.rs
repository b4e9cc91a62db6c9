//! Radio publisher contract
//!
//! The node reports over a paired sub-GHz link. The transport, pairing
//! protocol and wire format live outside this workspace; the core only
//! needs the publish surface below.

/// Outbound publish operations on the radio link.
pub trait Radio {
    /// Ask the gateway to pair this node under `name`.
    fn pairing_request(&mut self, name: &str, version: &str);

    /// Publish an onboard-thermometer reading on a fixed channel id.
    fn pub_temperature(&mut self, channel: u8, celsius: f32);

    /// Publish a float under an explicit topic.
    fn pub_float(&mut self, topic: &str, value: f32);

    /// Publish a boolean under an explicit topic.
    fn pub_bool(&mut self, topic: &str, value: bool);

    /// Publish the battery voltage.
    fn pub_battery(&mut self, voltage: f32);
}
