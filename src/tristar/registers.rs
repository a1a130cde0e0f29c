//! TriStar MPPT input register map.
//!
//! Addresses are zero-based PDU addresses as sent on the wire.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

// identity block
pub const V_PU: u16 = 0;
pub const I_PU: u16 = 2;
pub const VER_SW: u16 = 4;
pub const SCALING_BLOCK_LEN: u16 = 6;

pub const E_SERIAL: u16 = 57536;
pub const E_SERIAL_LEN: u16 = 4;
pub const E_MODEL: u16 = 57548;
pub const E_HW_VERSION: u16 = 57549;

// dynamic block
pub const V_BAT: u16 = 24;
pub const V_PV: u16 = 27;
pub const I_PV: u16 = 29;
pub const T_BAT: u16 = 37;
pub const I_CC_1M: u16 = 39;
pub const CHARGE_STATE: u16 = 50;
pub const KWH_TOTAL_RES: u16 = 56;
pub const KWH_TOTAL: u16 = 57;
pub const P_OUT: u16 = 58;
pub const V_BAT_MIN: u16 = 64;
pub const V_BAT_MAX: u16 = 65;
pub const V_PV_MAX: u16 = 66;
pub const WHC_DAILY: u16 = 68;
pub const P_OUT_MAX_DAILY: u16 = 70;
pub const T_ABS: u16 = 77;
pub const T_FLOAT: u16 = 79;

/// First register of the single per-poll read.
pub const DYNAMIC_START: u16 = V_BAT;
/// Number of registers covering `V_BAT..=T_FLOAT`.
pub const DYNAMIC_LEN: u16 = T_FLOAT - V_BAT + 1;

/// Charge state as reported in register 50.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize)]
#[repr(u16)]
pub enum ChargeState {
    Start = 0,
    NightCheck = 1,
    Disconnect = 2,
    Night = 3,
    Fault = 4,
    Mppt = 5,
    Absorption = 6,
    Float = 7,
    Equalize = 8,
    Slave = 9,
}

/// Charger state as understood by the consumers of the property bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize)]
#[repr(u8)]
pub enum BusState {
    Off = 0,
    Fault = 2,
    Bulk = 3,
    Absorption = 4,
    Float = 5,
    Equalize = 7,
    Other = 11,
}

impl From<ChargeState> for BusState {
    fn from(state: ChargeState) -> Self {
        use ChargeState::*;

        match state {
            Start | NightCheck | Disconnect | Night => BusState::Off,
            Fault => BusState::Fault,
            Mppt => BusState::Bulk,
            Absorption => BusState::Absorption,
            Float => BusState::Float,
            Equalize => BusState::Equalize,
            Slave => BusState::Other,
        }
    }
}

impl BusState {
    /// Map a raw register 50 value; codes the controller does not define map to `Off`.
    pub fn from_raw(raw: u16) -> Self {
        ChargeState::try_from(raw)
            .map(BusState::from)
            .unwrap_or(BusState::Off)
    }
}

pub fn model_name(code: u16) -> &'static str {
    match code {
        0 => "TriStar MPPT 45",
        1 => "TriStar MPPT 60",
        2 => "TriStar MPPT 30",
        _ => "TriStar MPPT",
    }
}
