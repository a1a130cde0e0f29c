use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub controller: Controller,

    #[serde(default = "Config::default_mqtt")]
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Controller {{{
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Controller {
    pub host: String,
    #[serde(default = "Config::default_modbus_port")]
    pub port: u16,
    #[serde(default = "Config::default_unit_id")]
    pub unit_id: u8,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms", default = "Config::default_poll_interval")]
    pub poll_interval: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "read_timeout_ms", default = "Config::default_read_timeout")]
    pub read_timeout: Duration,

    #[serde(default)]
    pub device_instance: u32,

    pub reidentify_on_link_loss: Option<bool>,
}
impl Controller {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn device_instance(&self) -> u32 {
        self.device_instance
    }

    pub fn reidentify_on_link_loss(&self) -> bool {
        self.reidentify_on_link_loss.unwrap_or(true)
    }

    /// True if switching to `other` means talking to a (possibly) different device.
    pub fn connection_changed(&self, other: &Controller) -> bool {
        self.host != other.host || self.port != other.port || self.unit_id != other.unit_id
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_host")]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Config> {
        // a poisoned lock still holds a validated config
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn controller(&self) -> Controller {
        self.lock().controller.clone()
    }

    pub fn set_controller(&self, new: Controller) {
        self.lock().controller = new;
    }

    pub fn mqtt(&self) -> Mqtt {
        self.lock().mqtt.clone()
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        let config = Self::from_yaml(&content)?;

        info!("Configuration loaded successfully:");
        info!("  Controller:");
        info!("    Host: {}", config.controller.host);
        info!("    Port: {}", config.controller.port);
        info!("    Unit ID: {}", config.controller.unit_id);
        info!("    Poll Interval: {}ms", config.controller.poll_interval.as_millis());
        info!("    Read Timeout: {}ms", config.controller.read_timeout.as_millis());
        info!("    Device Instance: {}", config.controller.device_instance);
        info!(
            "    Re-identify On Link Loss: {}",
            config.controller.reidentify_on_link_loss()
        );

        info!("  MQTT: {}", if config.mqtt.enabled { "enabled" } else { "disabled" });
        if config.mqtt.enabled {
            info!("    Host: {}", config.mqtt.host);
            info!("    Port: {}", config.mqtt.port);
            info!("    Namespace: {}", config.mqtt.namespace);
        }

        info!("  Log Level: {}", config.loglevel);

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let c = &self.controller;

        if c.host.is_empty() {
            return Err(anyhow!("config.rs:controller host cannot be empty"));
        }
        if c.port == 0 {
            bail!("controller.port must be between 1 and 65535");
        }
        if !(1..=247).contains(&c.unit_id) {
            bail!("controller.unit_id must be between 1 and 247, got {}", c.unit_id);
        }
        let poll_ms = c.poll_interval.as_millis();
        if !(1000..=60000).contains(&poll_ms) {
            bail!(
                "controller.poll_interval_ms must be between 1000 and 60000, got {}",
                poll_ms
            );
        }
        if c.read_timeout.is_zero() {
            return Err(anyhow!("config.rs:Invalid read timeout: 0"));
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                return Err(anyhow!("config.rs:MQTT host cannot be empty"));
            }
        }

        Ok(())
    }

    fn default_modbus_port() -> u16 {
        502
    }

    fn default_unit_id() -> u8 {
        1
    }

    fn default_poll_interval() -> Duration {
        Duration::from_millis(5000)
    }

    fn default_read_timeout() -> Duration {
        Duration::from_millis(1000)
    }

    fn default_mqtt() -> Mqtt {
        Mqtt {
            enabled: Self::default_enabled(),
            host: Self::default_mqtt_host(),
            port: Self::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Self::default_mqtt_namespace(),
        }
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "tristar".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
