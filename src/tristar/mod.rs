pub mod client;
pub mod controller;
pub mod decode;
pub mod registers;

pub use client::{Connector, Link, ModbusTcp, RegisterClient, RegisterReader};
pub use controller::{BulkTimer, Controller, DeviceIdentity, Measurements};
pub use registers::{BusState, ChargeState};
