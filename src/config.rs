// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// Configuration loaded from a TOML file, via the `config.toml` +
// `toml::from_slice` pattern (see `main.rs`).

use std::env::var;

use serde::Deserialize;

use crate::error::Result;

fn default_session_name_prefix() -> String {
    "murmur".to_string()
}

fn default_ping_interval_secs() -> u64 {
    300
}

fn default_send_retries() -> u32 {
    11
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_session_restart_timeout_secs() -> u64 {
    30
}

fn default_max_idle_secs() -> u64 {
    1800
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename(deserialize = "General"), alias = "general")]
    pub general: General,

    #[serde(rename(deserialize = "Sources"), alias = "sources", default)]
    pub sources: Sources,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    /// `host:port` of the local gateway daemon's control API.
    pub gateway_address: String,

    /// Overrides the data directory. Falls back to `MURMUR_DATADIR`, then
    /// to `.murmur` relative to the working directory.
    pub data_dir: Option<String>,

    #[serde(default = "default_session_name_prefix")]
    pub session_name_prefix: String,

    #[serde(default)]
    pub ignore_unauthorized: bool,

    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_send_retries")]
    pub send_retries: u32,

    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_session_restart_timeout_secs")]
    pub session_restart_timeout_secs: u64,

    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sources {
    /// Present for structural symmetry with the `[Sources]` table other
    /// daemons in this family use; this messaging engine has no remote
    /// CIDR sources to configure.
    #[serde(default)]
    pub remotes: Vec<String>,
}

impl Config {
    pub fn from_toml_bytes(data: &[u8]) -> Result<Self> {
        Ok(toml::from_slice(data)?)
    }

    /// Resolve the data directory: `General.data_dir`, then `MURMUR_DATADIR`,
    /// then the literal default `.murmur`. Full platform-specific
    /// directory resolution is out of scope.
    pub fn data_dir(&self) -> String {
        self.general
            .data_dir
            .clone()
            .or_else(|| var("MURMUR_DATADIR").ok())
            .unwrap_or_else(|| ".murmur".to_string())
    }
}
