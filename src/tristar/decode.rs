//! Pure conversions from raw register words to engineering units.
//!
//! None of these fail: values outside their expected range are passed through as data.

/// Reinterpret a register as two's complement.
pub fn signed16(raw: u16) -> i32 {
    if raw >= 32768 {
        raw as i32 - 65536
    } else {
        raw as i32
    }
}

/// Fixed-point scale factor held in two consecutive registers (integer, fraction/65536).
pub fn scale_factor(whole: u16, fraction: u16) -> f64 {
    whole as f64 + fraction as f64 / 65536.0
}

/// BCD firmware word, eg 0x1234 => 1234.
pub fn firmware_version(raw: u16) -> u16 {
    ((raw >> 12) & 0x0f) * 1000 + ((raw >> 8) & 0x0f) * 100 + ((raw >> 4) & 0x0f) * 10 + (raw & 0x0f)
}

pub fn hardware_version(raw: u16) -> String {
    format!("{}.{}", raw >> 8, raw & 0xff)
}

/// Serial number stored as ASCII digit pairs, most significant register first.
pub fn serial_number(words: &[u16]) -> String {
    let serial = words.iter().fold(0i64, |serial, word| {
        let high = (word >> 8) as i64 - 0x30;
        let low = (word & 0xff) as i64 - 0x30;
        serial * 100 + high * 10 + low
    });

    serial.to_string()
}

pub fn voltage(raw: u16, v_pu: f64) -> f64 {
    raw as f64 * v_pu / 32768.0
}

pub fn current(raw: u16, i_pu: f64) -> f64 {
    raw as f64 * i_pu / 32768.0
}

/// Signed current clamped at zero; discharge is not reported as charge current.
pub fn charge_current(raw: u16, i_pu: f64) -> f64 {
    (signed16(raw) as f64 * i_pu / 32768.0).max(0.0)
}

pub fn power(raw: u16, v_pu: f64, i_pu: f64) -> f64 {
    raw as f64 * i_pu * v_pu / 131072.0
}

pub fn watt_hours_to_kwh(raw: u16) -> f64 {
    raw as f64 / 1000.0
}

pub fn seconds_to_minutes(raw: u16) -> u16 {
    raw / 60
}
