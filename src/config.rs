use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Path of the persisted host registry.
    pub data_file: String,
    pub probe: ProbeConf,
    pub command: CommandConf,
    pub wol: Option<WolConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConf {
    /// Seconds between probe cycles.
    pub interval_secs: u64,
    /// Per-host probe timeout in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CommandConf {
    /// Cool-down after a wake/shutdown completes, absorbing double-presses.
    pub cooldown_secs: u64,
    /// Timeout for the shutdown-agent call.
    pub agent_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WolConf {
    /// Broadcast address hint, ex: "192.168.1.255". Falls back to
    /// 255.255.255.255 when absent or unparseable.
    pub broadcast: Option<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_file: "./data/hosts.json".into(),
            probe: ProbeConf::default(),
            command: CommandConf::default(),
            wol: None,
        }
    }
}

impl Default for ProbeConf {
    fn default() -> Self {
        Self { interval_secs: 5, timeout_secs: 2 }
    }
}

impl Default for CommandConf {
    fn default() -> Self {
        Self { cooldown_secs: 2, agent_timeout_secs: 5 }
    }
}

impl KernelConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.command.cooldown_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.command.agent_timeout_secs)
    }
}

/// Loads the YAML config from `LANWARD_CONFIG` (default `lanward.yaml`).
/// Missing or invalid config never aborts startup; defaults apply.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var("LANWARD_CONFIG").unwrap_or_else(|_| "lanward.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return KernelConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!("invalid config {path}: {e}, using defaults");
            KernelConfig::default()
        })
    } else {
        warn!("no {path}, using default config");
        KernelConfig::default()
    }
}
