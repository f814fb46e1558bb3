use std::env;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Full daemon configuration, assembled from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub sensor: SensorConfig,
    pub thermostat: ThermostatConfig,
    /// Where readings and error records get appended, if anywhere.
    pub readings_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Base URL of the Tasmota device, e.g. `http://192.168.0.220`.
    pub base_url: String,
    /// Foreground poll cadence.
    pub check_every: Duration,
    /// Thermostat decision cadence.
    pub keeper_every: Duration,
    /// Poll cadence while the app is backgrounded.
    pub background_every: Duration,
}

/// Snapshot of the thermostat settings for one decision cycle. Cloned out
/// of the provider per cycle, so concurrent settings edits never tear a
/// single decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatConfig {
    pub min_temp: f64,
    pub max_temp: f64,
    /// Hysteresis added to the current temperature before the turn-on check.
    pub turn_on_margin: f64,
    /// Hysteresis subtracted before the turn-off check.
    pub turn_off_margin: f64,
    pub enabled: bool,
    /// Observe the relay but never command it.
    pub read_only: bool,
}

fn env_required(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("{key} environment variable is required"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let config = Self {
            sensor: SensorConfig {
                base_url: env_required("SENSOR_URL")?,
                check_every: Duration::from_millis(env_or_default("CHECK_EVERY_MS", 2000)),
                keeper_every: Duration::from_millis(env_or_default("KEEPER_EVERY_MS", 10_000)),
                background_every: Duration::from_millis(env_or_default(
                    "BACKGROUND_EVERY_MS",
                    30_000,
                )),
            },
            thermostat: ThermostatConfig {
                min_temp: env_or_default("MIN_TEMP", 5.0),
                max_temp: env_or_default("MAX_TEMP", 10.0),
                turn_on_margin: env_or_default("TURN_ON_MARGIN", 0.5),
                turn_off_margin: env_or_default("TURN_OFF_MARGIN", 0.0),
                enabled: env_or_default("THERMOSTAT_ENABLED", false),
                read_only: env_or_default("READONLY_MODE", false),
            },
            readings_file: env_optional("READINGS_FILE"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.sensor.base_url.trim().is_empty() {
            return Err("SENSOR_URL must not be empty".into());
        }
        if self.sensor.check_every.is_zero() {
            return Err("CHECK_EVERY_MS must be > 0".into());
        }
        if self.sensor.keeper_every.is_zero() {
            return Err("KEEPER_EVERY_MS must be > 0".into());
        }
        if self.sensor.background_every.is_zero() {
            return Err("BACKGROUND_EVERY_MS must be > 0".into());
        }
        self.thermostat.validate()
    }
}

impl ThermostatConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.min_temp.is_finite() || !self.max_temp.is_finite() {
            return Err("MIN_TEMP and MAX_TEMP must be finite numbers".into());
        }
        if self.min_temp >= self.max_temp {
            return Err("MIN_TEMP must be below MAX_TEMP".into());
        }
        if self.turn_on_margin < 0.0 || self.turn_off_margin < 0.0 {
            return Err("margins must not be negative".into());
        }
        Ok(())
    }
}

/// Read side of the settings. Everything in the core takes a provider and
/// re-reads it per cycle instead of holding a global.
pub trait ConfigProvider: Send + Sync {
    /// Current device address, if one is configured.
    fn base_url(&self) -> Option<String>;
    /// Snapshot of the thermostat settings.
    fn thermostat(&self) -> ThermostatConfig;
}

/// In-process settings that can be edited between cycles.
pub struct SharedConfig {
    base_url: RwLock<String>,
    thermostat: RwLock<ThermostatConfig>,
}

impl SharedConfig {
    pub fn new(base_url: String, thermostat: ThermostatConfig) -> Self {
        Self {
            base_url: RwLock::new(base_url),
            thermostat: RwLock::new(thermostat),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sensor.base_url.clone(), config.thermostat.clone())
    }

    pub fn set_base_url(&self, url: impl Into<String>) {
        *self
            .base_url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = url.into();
    }

    pub fn set_thermostat(&self, thermostat: ThermostatConfig) {
        *self
            .thermostat
            .write()
            .unwrap_or_else(PoisonError::into_inner) = thermostat;
    }
}

impl ConfigProvider for SharedConfig {
    fn base_url(&self) -> Option<String> {
        let url = self
            .base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if url.trim().is_empty() { None } else { Some(url) }
    }

    fn thermostat(&self) -> ThermostatConfig {
        self.thermostat
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
