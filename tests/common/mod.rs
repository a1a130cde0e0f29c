#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use tristar_bridge::prelude::*;
pub use tristar_bridge::error::{AttemptError, Error};
pub use tristar_bridge::tristar::{
    registers, Connector, Controller, Link, Measurements, RegisterClient, RegisterReader,
};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory();
impl Factory {
    pub fn config_yaml() -> &'static str {
        "
controller:
  host: 127.0.0.1
  port: 5020
  unit_id: 1
  poll_interval_ms: 2000
mqtt:
  enabled: false
"
    }

    pub fn config() -> Config {
        Config::from_yaml(Self::config_yaml()).expect("factory config is valid")
    }

    pub fn controller_config() -> config::Controller {
        Self::config().controller
    }

    /// A TriStar MPPT 60 with round scale factors (V_PU = 100, I_PU = 80).
    pub fn registers() -> HashMap<u16, u16> {
        let mut r = HashMap::new();

        // identity
        r.insert(0, 100);
        r.insert(1, 0);
        r.insert(2, 80);
        r.insert(3, 0);
        r.insert(4, 0x1234);
        r.insert(5, 0);
        r.insert(57549, 0x0301);
        r.insert(57548, 1);
        r.insert(57536, 0x3132);
        r.insert(57537, 0x3334);
        r.insert(57538, 0x3536);
        r.insert(57539, 0x3738);

        // dynamic
        for addr in registers::DYNAMIC_START..registers::DYNAMIC_START + registers::DYNAMIC_LEN {
            r.insert(addr, 0);
        }
        r.insert(registers::V_BAT, 16384); // 50 V
        r.insert(registers::V_PV, 32768); // 100 V
        r.insert(registers::I_PV, 4096); // 10 A
        r.insert(registers::T_BAT, 65531); // -5 C
        r.insert(registers::I_CC_1M, 8192); // 20 A
        r.insert(registers::CHARGE_STATE, 5);
        r.insert(registers::KWH_TOTAL_RES, 120);
        r.insert(registers::KWH_TOTAL, 4321);
        r.insert(registers::P_OUT, 16384); // 1000 W
        r.insert(registers::V_BAT_MIN, 15729);
        r.insert(registers::V_BAT_MAX, 18022);
        r.insert(registers::V_PV_MAX, 36045);
        r.insert(registers::WHC_DAILY, 2345);
        r.insert(registers::P_OUT_MAX_DAILY, 24576); // 1500 W
        r.insert(registers::T_ABS, 3599);
        r.insert(registers::T_FLOAT, 600);

        r
    }
}

#[derive(Default)]
struct DeviceState {
    registers: HashMap<u16, u16>,
    reads: Vec<(u16, u16)>,
    failing_blocks: HashSet<u16>,
    offline: bool,
    short_reads: bool,
    stalled: bool,
    failures_before_success: u32,
    connects: u32,
    closes: u32,
    open: u32,
    overlapping_connects: u32,
}

/// In-memory controller usable both as a [`RegisterReader`] and as a [`Connector`].
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let device = Self::default();
        device.state().registers = Factory::registers();
        device
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    pub fn set_register(&self, addr: u16, value: u16) {
        self.state().registers.insert(addr, value);
    }

    /// Every read starting at `start` fails until cleared.
    pub fn fail_block(&self, start: u16) {
        self.state().failing_blocks.insert(start);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_blocks.clear();
        state.offline = false;
        state.failures_before_success = 0;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Reads through [`RegisterReader`] return one word less than asked for.
    pub fn set_short_reads(&self, short: bool) {
        self.state().short_reads = short;
    }

    /// Connections never complete.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// The next `n` connection attempts fail.
    pub fn fail_next_attempts(&self, n: u32) {
        self.state().failures_before_success = n;
    }

    pub fn reads(&self) -> Vec<(u16, u16)> {
        self.state().reads.clone()
    }

    pub fn connects(&self) -> u32 {
        self.state().connects
    }

    pub fn closes(&self) -> u32 {
        self.state().closes
    }

    pub fn open(&self) -> u32 {
        self.state().open
    }

    pub fn overlapping_connects(&self) -> u32 {
        self.state().overlapping_connects
    }

    fn read(&self, start: u16, count: u16) -> Result<Vec<u16>, AttemptError> {
        let mut state = self.state();
        state.reads.push((start, count));

        if state.offline || state.failing_blocks.contains(&start) {
            return Err(AttemptError::Exception("gateway target device failed to respond".into()));
        }

        Ok((start..start + count)
            .map(|addr| *state.registers.get(&addr).unwrap_or(&0))
            .collect())
    }

    pub fn client(&self) -> RegisterClient {
        RegisterClient::new(Arc::new(self.clone()), Duration::from_secs(1))
    }
}

#[async_trait]
impl RegisterReader for FakeDevice {
    async fn read_block(&self, start: u16, count: u16) -> Result<Vec<u16>, Error> {
        let mut words = self.read(start, count).map_err(|last| Error::LinkDown {
            start,
            count,
            attempts: 5,
            last,
        })?;
        if self.state().short_reads {
            words.pop();
        }
        Ok(words)
    }
}

#[async_trait]
impl Connector for FakeDevice {
    async fn connect(&self) -> Result<Box<dyn Link>, AttemptError> {
        let stalled = self.state().stalled;
        if stalled {
            self.state().connects += 1;
            return std::future::pending().await;
        }

        let mut state = self.state();
        state.connects += 1;
        if state.open > 0 {
            state.overlapping_connects += 1;
        }

        if state.failures_before_success > 0 {
            state.failures_before_success -= 1;
            // alternate between refused connections and failing reads
            if state.connects % 2 == 1 {
                return Err(AttemptError::Connect(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            state.open += 1;
            return Ok(Box::new(FakeLink {
                device: self.clone(),
                broken: true,
            }));
        }

        state.open += 1;
        Ok(Box::new(FakeLink {
            device: self.clone(),
            broken: false,
        }))
    }

    fn describe(&self) -> String {
        "fake device".to_string()
    }
}

struct FakeLink {
    device: FakeDevice,
    broken: bool,
}

#[async_trait]
impl Link for FakeLink {
    async fn read_input_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, AttemptError> {
        if self.broken {
            self.device.state().reads.push((start, count));
            return Err(AttemptError::Transport("broken pipe".into()));
        }
        self.device.read(start, count)
    }

    async fn close(&mut self) {
        let mut state = self.device.state();
        state.closes += 1;
        state.open -= 1;
    }
}

pub fn unwrap_bus_messages(data: bus::ChannelData) -> Vec<bus::Message> {
    if let bus::ChannelData::Messages(messages) = data {
        messages
    } else {
        panic!("expected bus::ChannelData::Messages, got {:?}", data)
    }
}

pub fn value_at<'a>(messages: &'a [bus::Message], path: &str) -> Option<&'a serde_json::Value> {
    messages.iter().find(|m| m.path == path).map(|m| &m.value)
}
