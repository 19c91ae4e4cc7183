//! # Node Configuration
//!
//! `config.toml` in the data directory, or wherever `--config` points.
//! Every field has a default, so an empty file is a valid configuration.
//! Command-line flags (and their `VELOCK_*` environment fallbacks) override
//! whatever the file says.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use velock_protocol::math::decimal;
use velock_protocol::{Address, Amount, CatchUpLimits, InflationParams};

/// File name looked up inside the data directory when `--config` is absent.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Everything the node needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Port for the query API.
    pub api_port: u16,
    /// Port for the Prometheus endpoint.
    pub metrics_port: u16,
    /// Where the engine snapshot lives.
    pub data_dir: PathBuf,
    /// Seconds between keeper wake-ups.
    pub keeper_interval_secs: u64,
    /// Seconds between snapshot writes.
    pub snapshot_interval_secs: u64,
    /// Upper bound on sync rounds per keeper wake-up.
    pub max_rounds_per_tick: u32,
    /// Admin of every component on a fresh deployment.
    pub admin: Address,
    pub limits: CatchUpLimits,
    pub inflation: InflationParams,
    /// Gauge types created on a fresh deployment, in order. Type ids are
    /// assigned from zero.
    #[serde(rename = "gauge_type")]
    pub gauge_types: Vec<GaugeTypeConfig>,
    /// Channels registered on a fresh deployment.
    #[serde(rename = "gauge")]
    pub gauges: Vec<GaugeConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaugeTypeConfig {
    pub name: String,
    #[serde(with = "decimal")]
    pub weight: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaugeConfig {
    pub address: Address,
    pub type_id: u32,
    #[serde(with = "decimal", default)]
    pub weight: Amount,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_port: 9841,
            metrics_port: 9842,
            data_dir: PathBuf::from(".velock"),
            keeper_interval_secs: 60,
            snapshot_interval_secs: 300,
            max_rounds_per_tick: 64,
            admin: Address::from_low_u64(1),
            limits: CatchUpLimits::default(),
            inflation: InflationParams::default(),
            gauge_types: Vec::new(),
            gauges: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Parses a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid node configuration")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render node configuration")
    }

    /// Reads and parses the file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Loads `explicit` if given, else `<data_dir>/config.toml` if it
    /// exists, else the defaults. The returned config always points at
    /// `data_dir`.
    pub fn resolve(explicit: Option<&Path>, data_dir: &Path) -> Result<Self> {
        let fallback = data_dir.join(CONFIG_FILE_NAME);
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None if fallback.exists() => Self::load(&fallback)?,
            None => Self::default(),
        };
        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    /// Path of the engine snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(crate::keeper::SNAPSHOT_FILE_NAME)
    }

    /// Rejects settings the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.admin.is_zero(), "admin must not be the zero address");
        anyhow::ensure!(self.keeper_interval_secs > 0, "keeper_interval_secs must be positive");
        anyhow::ensure!(
            self.snapshot_interval_secs > 0,
            "snapshot_interval_secs must be positive"
        );
        anyhow::ensure!(self.max_rounds_per_tick > 0, "max_rounds_per_tick must be positive");
        let n_types = self.gauge_types.len() as u32;
        for gauge in &self.gauges {
            anyhow::ensure!(
                gauge.type_id < n_types,
                "gauge {} refers to undeclared type {}",
                gauge.address,
                gauge.type_id
            );
        }
        Ok(())
    }
}
