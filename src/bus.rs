//! Path-keyed values for the property bus.
//!
//! Everything published goes through here; rounding to display precision happens in
//! this module and nowhere else.

use crate::prelude::*;
use crate::tristar::{DeviceIdentity, Measurements};

use serde_json::{json, Value};

pub const PRODUCT_ID: u16 = 0xABCD;
pub const CONNECTION: &str = "Modbus TCP";

// Message {{{
#[derive(PartialEq, Debug, Clone)]
pub struct Message {
    pub path: String,
    pub value: Value,
}

impl Message {
    pub fn new<V: Into<Value>>(path: &str, value: V) -> Self {
        Self {
            path: path.to_owned(),
            value: value.into(),
        }
    }

    /// Payload in the `{"value": ...}` form the GUI's MQTT bridge expects.
    pub fn payload(&self) -> String {
        json!({ "value": self.value }).to_string()
    }

    /// Paths that never change for the life of the process.
    pub fn for_static(controller: &config::Controller) -> Vec<Message> {
        vec![
            Self::new("/Mgmt/ProcessName", env!("CARGO_PKG_NAME")),
            Self::new("/Mgmt/ProcessVersion", env!("CARGO_PKG_VERSION")),
            Self::new("/Mgmt/Connection", CONNECTION),
            Self::new("/ProductId", PRODUCT_ID),
            Self::new("/DeviceInstance", controller.device_instance()),
            Self::new("/Mode", 1),
            Self::new("/ErrorCode", 0),
            Self::new("/History/Overall/DaysAvailable", 1),
        ]
    }

    pub fn for_connected(connected: bool) -> Message {
        Self::new("/Connected", u8::from(connected))
    }

    pub fn for_identity(identity: &DeviceIdentity) -> Vec<Message> {
        vec![
            Self::new("/ProductName", identity.model_name.as_str()),
            Self::new("/FirmwareVersion", identity.firmware_version),
            Self::new("/HardwareVersion", identity.hardware_version.as_str()),
            Self::new("/Serial", identity.serial.as_str()),
        ]
    }

    pub fn for_measurements(m: &Measurements) -> Vec<Message> {
        vec![
            Self::new("/Pv/V", round(m.pv_voltage, 2)),
            Self::new("/Pv/I", round(m.pv_current, 2)),
            Self::new("/Dc/0/Voltage", round(m.battery_voltage, 2)),
            Self::new("/Dc/0/Current", round(m.charge_current, 2)),
            Self::new("/Dc/0/Temperature", round(m.battery_temperature as f64, 1)),
            Self::new("/Yield/Power", round(m.output_power, 0)),
            Self::new("/State", u8::from(m.charge_state)),
            Self::new("/History/Daily/0/Yield", round(m.yield_daily, 2)),
            Self::new("/History/Daily/0/MaxPower", round(m.output_power_max_daily, 0)),
            Self::new("/History/Daily/0/MaxPvVoltage", round(m.pv_voltage_max_daily, 2)),
            Self::new(
                "/History/Daily/0/MaxBatteryVoltage",
                round(m.battery_voltage_max_daily, 2),
            ),
            Self::new(
                "/History/Daily/0/MinBatteryVoltage",
                round(m.battery_voltage_min_daily, 2),
            ),
            Self::new("/History/Daily/0/TimeInBulk", m.minutes_bulk),
            Self::new("/History/Daily/0/TimeInAbsorption", m.minutes_absorption),
            Self::new("/History/Daily/0/TimeInFloat", m.minutes_float),
            Self::new("/Yield/User", round(m.yield_user(), 0)),
            Self::new("/Yield/System", round(m.yield_system(), 0)),
        ]
    }
} // }}}

/// Round to `decimals` places on the exact binary value, ties to even.
///
/// Goes through fixed-precision formatting, which is correctly rounded; scaling by
/// a power of ten first would add its own error.
pub fn round(value: f64, decimals: usize) -> f64 {
    format!("{:.*}", decimals, value).parse().unwrap_or(value)
}

// Cache {{{
/// Last value seen for every path, in first-seen order.
///
/// Lets a sink replay the whole bus after its broker forgot retained messages.
#[derive(Default, Debug)]
pub struct Cache {
    messages: Vec<Message>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, messages: &[Message]) {
        for message in messages {
            match self.messages.iter_mut().find(|m| m.path == message.path) {
                Some(existing) => existing.value = message.value.clone(),
                None => self.messages.push(message.clone()),
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.messages.iter().find(|m| m.path == path).map(|m| &m.value)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
} // }}}

#[derive(PartialEq, Debug, Clone)]
pub enum ChannelData {
    Messages(Vec<Message>),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;
