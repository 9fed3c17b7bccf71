//! Configuration loading and validation.
//!
//! Precedence: env vars > `config.toml` > defaults. Every section is optional;
//! defaults match a 240 L tank burning 16 L/h.
//!
//! Runtime files live under `~/.genwatch/` unless `GENWATCH_HOME` points
//! elsewhere.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::EngineSettings;
use crate::fuel::FuelModel;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// The monitored generator.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Fuel model and alert threshold.
    #[serde(default)]
    pub fuel: FuelConfig,

    /// Probe loop timing.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Scheduled summaries.
    #[serde(default)]
    pub reports: ReportsConfig,

    /// Telegram channel and access settings.
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// How liveness is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    /// ICMP echo via the system `ping`.
    #[default]
    Icmp,
    /// TCP connect to `tcp_port`.
    Tcp,
}

/// The monitored generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Display name used in notices.
    #[serde(default = "default_name")]
    pub name: String,

    /// Host or IP of the device that is only reachable while the generator runs.
    #[serde(default)]
    pub address: String,

    /// Probe method.
    #[serde(default)]
    pub probe: ProbeMethod,

    /// Port for the TCP probe.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            address: String::new(),
            probe: ProbeMethod::default(),
            tcp_port: default_tcp_port(),
        }
    }
}

/// Fuel model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuelConfig {
    /// Tank capacity in litres.
    #[serde(default = "default_tank_capacity")]
    pub tank_capacity: f64,

    /// Consumption in litres per hour.
    #[serde(default = "default_consumption_rate")]
    pub consumption_rate: f64,

    /// Fuel assumed on first startup.
    #[serde(default = "default_initial_fuel")]
    pub initial_fuel: f64,

    /// Alert when fewer than this many hours of run-time remain.
    #[serde(default = "default_low_fuel_hours")]
    pub low_fuel_hours: f64,
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self {
            tank_capacity: default_tank_capacity(),
            consumption_rate: default_consumption_rate(),
            initial_fuel: default_initial_fuel(),
            low_fuel_hours: default_low_fuel_hours(),
        }
    }
}

impl From<&FuelConfig> for EngineSettings {
    fn from(fuel: &FuelConfig) -> Self {
        Self {
            fuel: FuelModel::new(fuel.consumption_rate, fuel.tank_capacity),
            initial_fuel: fuel.initial_fuel,
            low_fuel_threshold_hours: fuel.low_fuel_hours,
        }
    }
}

/// Probe loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between probes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound on one probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

/// Scheduled summaries, in local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// Send the daily summary.
    #[serde(default = "default_true")]
    pub daily: bool,

    /// Send the monthly summary on the 1st.
    #[serde(default = "default_true")]
    pub monthly: bool,

    /// Hour of day (0-23).
    #[serde(default = "default_report_hour")]
    pub hour: u32,

    /// Minute of hour (0-59).
    #[serde(default)]
    pub minute: u32,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            daily: true,
            monthly: true,
            hour: default_report_hour(),
            minute: 0,
        }
    }
}

/// Telegram settings. The bot token itself lives in `.env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Name of the env var holding the bot token.
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,

    /// Channel for notices: a numeric chat id or `@channelname`.
    #[serde(default)]
    pub channel_id: Option<String>,

    /// The admin user id.
    #[serde(default)]
    pub admin_user_id: Option<i64>,

    /// Link shown as a button under channel notices.
    #[serde(default)]
    pub bot_url: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token_env: default_bot_token_env(),
            channel_id: None,
            admin_user_id: None,
            bot_url: None,
        }
    }
}

// Default value functions for serde

fn default_name() -> String {
    "Generator".to_owned()
}
fn default_tcp_port() -> u16 {
    80
}
fn default_tank_capacity() -> f64 {
    240.0
}
fn default_consumption_rate() -> f64 {
    16.0
}
fn default_initial_fuel() -> f64 {
    190.0
}
fn default_low_fuel_hours() -> f64 {
    4.0
}
fn default_interval_secs() -> u64 {
    60
}
fn default_probe_timeout_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_report_hour() -> u32 {
    7
}
fn default_bot_token_env() -> String {
    "GENWATCH_TELEGRAM_TOKEN".to_owned()
}

impl Config {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or fails validation.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(toml_str).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> anyhow::Result<()> {
        let fuel = &self.fuel;
        anyhow::ensure!(
            fuel.consumption_rate.is_finite() && fuel.consumption_rate > 0.0,
            "fuel.consumption_rate must be > 0"
        );
        anyhow::ensure!(
            fuel.tank_capacity.is_finite() && fuel.tank_capacity > 0.0,
            "fuel.tank_capacity must be > 0"
        );
        anyhow::ensure!(
            fuel.initial_fuel.is_finite()
                && (0.0..=fuel.tank_capacity).contains(&fuel.initial_fuel),
            "fuel.initial_fuel must be between 0 and tank_capacity"
        );
        anyhow::ensure!(
            fuel.low_fuel_hours.is_finite() && fuel.low_fuel_hours >= 0.0,
            "fuel.low_fuel_hours must be >= 0"
        );
        anyhow::ensure!(
            self.monitor.interval_secs >= 1,
            "monitor.interval_secs must be >= 1"
        );
        anyhow::ensure!(
            self.monitor.probe_timeout_ms >= 100
                && self.monitor.probe_timeout_ms < self.monitor.interval_secs.saturating_mul(1000),
            "monitor.probe_timeout_ms must be >= 100 and shorter than the interval"
        );
        anyhow::ensure!(self.reports.hour < 24, "reports.hour must be 0-23");
        anyhow::ensure!(self.reports.minute < 60, "reports.minute must be 0-59");
        if let Some(url) = &self.telegram.bot_url {
            url::Url::parse(url).with_context(|| format!("telegram.bot_url is not a URL: {url}"))?;
        }
        Ok(())
    }

    /// Apply `GENWATCH_*` environment overrides.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("GENWATCH_ADDRESS") {
            self.generator.address = v;
        }
        if let Some(v) = env("GENWATCH_CHANNEL_ID") {
            self.telegram.channel_id = Some(v);
        }
        if let Some(v) = env("GENWATCH_ADMIN_USER_ID") {
            match v.trim().parse::<i64>() {
                Ok(id) => self.telegram.admin_user_id = Some(id),
                Err(e) => warn!(key = "GENWATCH_ADMIN_USER_ID", error = %e, "ignoring invalid env override"),
            }
        }
        if let Some(v) = env("GENWATCH_INTERVAL_SECS") {
            match v.trim().parse::<u64>() {
                Ok(secs) => self.monitor.interval_secs = secs,
                Err(e) => warn!(key = "GENWATCH_INTERVAL_SECS", error = %e, "ignoring invalid env override"),
            }
        }
    }
}

/// Load `config.toml`, apply env overrides, and validate.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed, or if
/// the result fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with a custom env resolver (for testing).
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_with(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))?
    } else {
        Config::default()
    };
    config.apply_overrides(env);
    config
        .validate()
        .with_context(|| format!("invalid config at {}", path.display()))?;
    Ok(config)
}

/// Locations of every runtime file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Root directory (`~/.genwatch`).
    pub root: PathBuf,
    /// `config.toml`.
    pub config_toml: PathBuf,
    /// `.env` with the bot token.
    pub env_file: PathBuf,
    /// SQLite state database.
    pub state_db: PathBuf,
    /// Rotated JSON logs.
    pub logs_dir: PathBuf,
    /// Status snapshot written after every tick.
    pub status_json: PathBuf,
}

impl RuntimePaths {
    /// Paths rooted at `root`.
    pub fn under(root: PathBuf) -> Self {
        Self {
            config_toml: root.join("config.toml"),
            env_file: root.join(".env"),
            state_db: root.join("data").join("generator.db"),
            logs_dir: root.join("logs"),
            status_json: root.join("status.json"),
            root,
        }
    }
}

/// Resolve runtime paths from the environment.
///
/// # Errors
///
/// Returns an error if `GENWATCH_HOME` is unset and the home directory cannot
/// be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    runtime_paths_with(|key| std::env::var(key).ok())
}

/// [`runtime_paths`] with a custom env resolver (for testing).
///
/// # Errors
///
/// See [`runtime_paths`].
pub fn runtime_paths_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<RuntimePaths> {
    if let Some(root) = env("GENWATCH_HOME").filter(|v| !v.trim().is_empty()) {
        return Ok(RuntimePaths::under(PathBuf::from(root)));
    }
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(RuntimePaths::under(home.home_dir().join(".genwatch")))
}

/// Starter `config.toml` written by `genwatch init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# genwatch configuration

[generator]
name = "Generator"
# Host that answers only while the generator is running.
address = "192.168.1.50"
# "icmp" or "tcp"
probe = "icmp"
tcp_port = 80

[fuel]
tank_capacity = 240.0
consumption_rate = 16.0
initial_fuel = 190.0
low_fuel_hours = 4.0

[monitor]
interval_secs = 60
probe_timeout_ms = 1000

[reports]
daily = true
monthly = true
hour = 7
minute = 0

[telegram]
bot_token_env = "GENWATCH_TELEGRAM_TOKEN"
# channel_id = "@my_generator_channel"
# admin_user_id = 123456789
# bot_url = "https://t.me/my_generator_bot"
"#;
