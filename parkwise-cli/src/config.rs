//! Layered configuration: built-in defaults, then `parkwise.toml`, then `PARKWISE_*`
//! environment variables (nested keys separated by `__`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use parkwise_core::{ManagerConfig, Operator, TariffTable};
use parkwise_device_http::DeviceConfig;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Top-level configuration file.
pub(crate) struct Config {
    /// Session manager tuning.
    #[serde(default)]
    pub manager: ManagerSection,
    /// Lane device endpoint used by `scan`.
    #[serde(default)]
    pub device: Option<DeviceSection>,
    /// Tariff file used instead of the built-in default.
    #[serde(default)]
    pub tariff_file: Option<PathBuf>,
    /// Operator recorded on simulated sessions.
    #[serde(default)]
    pub operator: OperatorSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// `[manager]` table.
pub(crate) struct ManagerSection {
    /// Seconds a scanner has to answer.
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,
    /// Seconds a lot tariff stays cached.
    #[serde(default = "default_cache_ttl")]
    pub tariff_cache_ttl_secs: u64,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            scan_timeout_secs: default_scan_timeout(),
            tariff_cache_ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// `[device]` table.
pub(crate) struct DeviceSection {
    /// Root URL of the device API.
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_device_timeout")]
    pub timeout_secs: u64,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// `[operator]` table.
pub(crate) struct OperatorSection {
    /// Stable operator id.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl Default for OperatorSection {
    fn default() -> Self {
        Self {
            id: "cli".into(),
            name: "Console".into(),
        }
    }
}

fn default_scan_timeout() -> u64 {
    parkwise_core::DEFAULT_SCAN_TIMEOUT.as_secs()
}

fn default_cache_ttl() -> u64 {
    parkwise_core::DEFAULT_TARIFF_CACHE_TTL.as_secs()
}

fn default_device_timeout() -> u64 {
    parkwise_device_http::DEFAULT_TIMEOUT.as_secs()
}

impl Config {
    /// Session manager settings.
    pub(crate) fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            scan_timeout: Duration::from_secs(self.manager.scan_timeout_secs),
            tariff_cache_ttl: Duration::from_secs(self.manager.tariff_cache_ttl_secs),
        }
    }

    /// Device endpoint settings, if a device is configured.
    pub(crate) fn device_config(&self) -> Result<Option<DeviceConfig>> {
        self.device
            .as_ref()
            .map(|device| {
                let base_url = Url::parse(&device.base_url)
                    .with_context(|| format!("invalid device base_url {:?}", device.base_url))?;
                Ok(DeviceConfig {
                    base_url,
                    timeout: Duration::from_secs(device.timeout_secs),
                    bearer_token: device.bearer_token.clone(),
                })
            })
            .transpose()
    }

    /// Operator recorded on sessions.
    pub(crate) fn operator(&self) -> Operator {
        Operator::new(self.operator.id.clone(), self.operator.name.clone())
    }
}

/// Load configuration from `path` (optional) and the environment.
pub(crate) fn load(path: &Path) -> Result<Config> {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PARKWISE_").split("__"))
        .extract()
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Read a tariff table from a TOML file.
pub(crate) fn load_tariff(path: &Path) -> Result<TariffTable> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read tariff file {}", path.display()))?;
    parse_tariff(&raw).with_context(|| format!("invalid tariff file {}", path.display()))
}

/// Parse a tariff table from TOML text.
pub(crate) fn parse_tariff(raw: &str) -> Result<TariffTable> {
    Ok(toml::from_str(raw)?)
}
