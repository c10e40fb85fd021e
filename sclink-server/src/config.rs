use std::path::{Path, PathBuf};
use std::time::Duration;

use sclink_osc::TransportConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::heartbeat::BootPolicy;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub osc: TransportConfig,
    pub allocators: AllocatorConfig,
    pub heartbeat: HeartbeatConfig,
    pub outbound: OutboundConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub audio_buses: usize,
    pub reserved_audio_buses: usize,
    pub control_buses: usize,
    pub buffers: usize,
    /// First node id handed out; ids below belong to the server and other clients.
    pub node_id_base: i32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            audio_buses: 65536,
            reserved_audio_buses: 64,
            control_buses: 4096,
            buffers: 4096,
            node_id_base: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub max_missed_replies: u32,
    pub boot_policy: BootPolicy,
    /// Send `/notify 1` when the server boots.
    pub notify_on_boot: bool,
    /// Loaded with `/d_loadDir` on boot.
    pub synthdef_dir: Option<PathBuf>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            max_missed_replies: 12,
            boot_policy: BootPolicy::FreshServer,
            notify_on_boot: true,
            synthdef_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    pub use_latency: bool,
    pub latency_secs: f64,
    pub max_held_messages: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            use_latency: false,
            latency_secs: 0.2,
            max_held_messages: 1000,
        }
    }
}

impl OutboundConfig {
    /// `None` unless `use_latency` is set. A value that is not a usable
    /// duration (infinite, or too large) falls back to the default.
    pub fn latency(&self) -> Option<Duration> {
        if !self.use_latency {
            return None;
        }
        match Duration::try_from_secs_f64(self.latency_secs.max(0.0)) {
            Ok(latency) => Some(latency),
            Err(e) => {
                let fallback = Self::default().latency_secs;
                log::warn!(
                    target: "config",
                    "outbound latency_secs = {} is not usable ({}), using {}",
                    self.latency_secs,
                    e,
                    fallback
                );
                Some(Duration::from_secs_f64(fallback))
            }
        }
    }
}

impl SessionConfig {
    /// Embedded defaults overlaid with the user's config file, if any.
    /// A malformed or unreadable user file is logged and ignored.
    pub fn load() -> Self {
        let mut base: toml::Table = match toml::from_str(DEFAULT_CONFIG) {
            Ok(table) => table,
            Err(e) => {
                log::warn!(target: "config", "embedded config.toml is malformed: {}", e);
                return Self::default();
            }
        };

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<toml::Table>(&contents) {
                        Ok(user) => merge_tables(&mut base, user),
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        match toml::Value::Table(base).try_into() {
            Ok(config) => config,
            Err(e) => {
                log::warn!(target: "config", "config has invalid values, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Reads one file. Keys it leaves out take their default values.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sclink").join("config.toml"))
}

/// Recursive overlay: tables merge key by key, anything else is replaced.
fn merge_tables(base: &mut toml::Table, user: toml::Table) {
    for (key, value) in user {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}
