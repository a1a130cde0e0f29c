use crate::error::Error;
use crate::tristar::{
    client::RegisterReader,
    decode,
    registers::{self, BusState, ChargeState},
};

use {
    log::{debug, info},
    serde::Serialize,
    std::time::Duration,
    tokio::time::Instant,
};

// DeviceIdentity {{{
/// Static controller information, read once per connection lifetime.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceIdentity {
    pub v_pu: f64,
    pub i_pu: f64,
    pub firmware_version: u16,
    pub hardware_version: String,
    pub model_name: String,
    pub serial: String,
} // }}}

// Measurements {{{
/// One poll's worth of decoded values, at full precision.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Measurements {
    pub battery_voltage: f64,
    pub battery_voltage_min_daily: f64,
    pub battery_voltage_max_daily: f64,
    pub battery_temperature: i32,
    pub charge_current: f64,
    pub output_power: f64,
    pub output_power_max_daily: f64,
    pub pv_voltage: f64,
    pub pv_voltage_max_daily: f64,
    pub pv_current: f64,
    pub yield_daily: f64,
    pub yield_total_resettable: f64,
    pub yield_total: f64,
    pub charge_state_raw: u16,
    pub charge_state: BusState,
    pub minutes_absorption: u16,
    pub minutes_float: u16,
    pub minutes_bulk: u64,
}

impl Measurements {
    /// Total yield including today, resettable counter.
    pub fn yield_user(&self) -> f64 {
        self.yield_total_resettable + self.yield_daily
    }

    /// Total yield including today, lifetime counter.
    pub fn yield_system(&self) -> f64 {
        self.yield_total + self.yield_daily
    }
} // }}}

// BulkTimer {{{
/// Time spent in bulk (MPPT) charging, accumulated across polls and cleared at night.
#[derive(Clone, Debug)]
pub struct BulkTimer {
    bulk: Duration,
    last_poll: Instant,
}

impl BulkTimer {
    pub fn new(baseline: Instant) -> Self {
        Self {
            bulk: Duration::ZERO,
            last_poll: baseline,
        }
    }

    /// Record a poll seen at `now` with the given raw charge state.
    pub fn record(&mut self, raw_state: u16, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_poll);
        self.last_poll = now;
        self.accumulate(raw_state, elapsed);
    }

    pub fn accumulate(&mut self, raw_state: u16, elapsed: Duration) {
        match ChargeState::try_from(raw_state) {
            Ok(ChargeState::Mppt) => self.bulk += elapsed,
            Ok(ChargeState::Night) => self.bulk = Duration::ZERO,
            _ => {}
        }
    }

    pub fn bulk(&self) -> Duration {
        self.bulk
    }

    pub fn minutes(&self) -> u64 {
        self.bulk.as_secs() / 60
    }
} // }}}

pub struct Controller<R> {
    reader: R,
    identity: Option<DeviceIdentity>,
    bulk_timer: BulkTimer,
    last_charge_state: Option<u16>,
}

impl<R: RegisterReader> Controller<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            identity: None,
            bulk_timer: BulkTimer::new(Instant::now()),
            last_charge_state: None,
        }
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.identity.is_some()
    }

    pub fn bulk_timer(&self) -> &BulkTimer {
        &self.bulk_timer
    }

    pub fn last_charge_state(&self) -> Option<u16> {
        self.last_charge_state
    }

    /// Forget the identity so the next poll reads it again.
    pub fn invalidate(&mut self) {
        if self.identity.take().is_some() {
            debug!("device identity invalidated");
        }
    }

    /// Swap in a reader for new connection settings. Derived charge state survives.
    pub fn reconfigure(&mut self, reader: R) {
        self.reader = reader;
        self.invalidate();
    }

    /// Read the static identity registers. No-op if already initialized.
    pub async fn initialize(&mut self) -> Result<&DeviceIdentity, Error> {
        let identity = match self.identity.take() {
            Some(identity) => identity,
            None => {
                let identity = self.read_identity().await?;

                info!("{} initialized", identity.model_name);
                info!("  Serial: {}", identity.serial);
                info!(
                    "  HW: v{}, FW: {}",
                    identity.hardware_version, identity.firmware_version
                );

                identity
            }
        };

        Ok(self.identity.insert(identity))
    }

    async fn read_identity(&self) -> Result<DeviceIdentity, Error> {
        info!("Initializing TriStar MPPT...");

        let scaling = self
            .read_identity_block("scaling", registers::V_PU, registers::SCALING_BLOCK_LEN)
            .await?;
        let hardware = self
            .read_identity_block("hardware version", registers::E_HW_VERSION, 1)
            .await?;
        let model = self
            .read_identity_block("model", registers::E_MODEL, 1)
            .await?;
        let serial = self
            .read_identity_block("serial", registers::E_SERIAL, registers::E_SERIAL_LEN)
            .await?;

        let at = |addr: u16| scaling[(addr - registers::V_PU) as usize];

        let identity = DeviceIdentity {
            v_pu: decode::scale_factor(at(registers::V_PU), at(registers::V_PU + 1)),
            i_pu: decode::scale_factor(at(registers::I_PU), at(registers::I_PU + 1)),
            firmware_version: decode::firmware_version(at(registers::VER_SW)),
            hardware_version: decode::hardware_version(hardware[0]),
            model_name: registers::model_name(model[0]).to_owned(),
            serial: decode::serial_number(&serial),
        };
        info!(
            "Scaling: V_PU={:.6}, I_PU={:.6}",
            identity.v_pu, identity.i_pu
        );

        Ok(identity)
    }

    async fn read_identity_block(
        &self,
        block: &'static str,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, Error> {
        self.read(start, count)
            .await
            .map_err(|err| Error::IdentityIncomplete {
                block,
                source: Box::new(err),
            })
    }

    async fn read(&self, start: u16, count: u16) -> Result<Vec<u16>, Error> {
        let words = self.reader.read_block(start, count).await?;
        if words.len() != count as usize {
            return Err(Error::ShortBlock {
                start,
                expected: count,
                got: words.len(),
            });
        }

        Ok(words)
    }

    /// Initialize if needed, then read and decode the dynamic register block.
    pub async fn update(&mut self) -> Result<Measurements, Error> {
        let (v_pu, i_pu) = {
            let identity = self.initialize().await?;
            (identity.v_pu, identity.i_pu)
        };

        let regs = self
            .read(registers::DYNAMIC_START, registers::DYNAMIC_LEN)
            .await?;

        Ok(self.decode_dynamic(&regs, v_pu, i_pu, Instant::now()))
    }

    fn decode_dynamic(&mut self, regs: &[u16], v_pu: f64, i_pu: f64, now: Instant) -> Measurements {
        let reg = |addr: u16| regs[(addr - registers::DYNAMIC_START) as usize];

        let charge_state_raw = reg(registers::CHARGE_STATE);
        self.bulk_timer.record(charge_state_raw, now);
        if self.last_charge_state != Some(charge_state_raw) {
            debug!(
                "charge state {:?} -> {} ({:?})",
                self.last_charge_state,
                charge_state_raw,
                ChargeState::try_from(charge_state_raw).ok()
            );
        }
        self.last_charge_state = Some(charge_state_raw);

        Measurements {
            battery_voltage: decode::voltage(reg(registers::V_BAT), v_pu),
            battery_voltage_min_daily: decode::voltage(reg(registers::V_BAT_MIN), v_pu),
            battery_voltage_max_daily: decode::voltage(reg(registers::V_BAT_MAX), v_pu),
            battery_temperature: decode::signed16(reg(registers::T_BAT)),
            charge_current: decode::charge_current(reg(registers::I_CC_1M), i_pu),
            output_power: decode::power(reg(registers::P_OUT), v_pu, i_pu),
            output_power_max_daily: decode::power(reg(registers::P_OUT_MAX_DAILY), v_pu, i_pu),
            pv_voltage: decode::voltage(reg(registers::V_PV), v_pu),
            pv_voltage_max_daily: decode::voltage(reg(registers::V_PV_MAX), v_pu),
            pv_current: decode::current(reg(registers::I_PV), i_pu),
            yield_daily: decode::watt_hours_to_kwh(reg(registers::WHC_DAILY)),
            yield_total_resettable: reg(registers::KWH_TOTAL_RES) as f64,
            yield_total: reg(registers::KWH_TOTAL) as f64,
            charge_state_raw,
            charge_state: BusState::from_raw(charge_state_raw),
            minutes_absorption: decode::seconds_to_minutes(reg(registers::T_ABS)),
            minutes_float: decode::seconds_to_minutes(reg(registers::T_FLOAT)),
            minutes_bulk: self.bulk_timer.minutes(),
        }
    }
}
