//! Settings - 設定の読み込み
//!
//! Layers, later wins:
//! 1. built-in defaults (`#[serde(default)]`)
//! 2. optional TOML file
//! 3. environment variables `MFPKIT__<SECTION>__<KEY>` (e.g. `MFPKIT__BACKGROUND__WORKER_COUNT=4`)

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceSettings,
    pub background: BackgroundSettings,
    pub communication: CommunicationSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://embapp-local.toshibatec.co.jp:50187/v1.0".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl DeviceSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSettings {
    pub worker_count: usize,
    /// How long `terminate` waits for in-flight tasks before aborting them.
    pub shutdown_grace_secs: u64,
    /// Upper bound for a task's `on_enqueued` hook.
    pub enqueue_hook_timeout_secs: u64,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            worker_count: 10,
            shutdown_grace_secs: 30,
            enqueue_hook_timeout_secs: 5,
        }
    }
}

impl BackgroundSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn enqueue_hook_timeout(&self) -> Duration {
        Duration::from_secs(self.enqueue_hook_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationSettings {
    /// Bounded wait for the connection-establishment mutex.
    pub connect_wait_secs: u64,
    /// Extra attempts after a stale-connection error.
    pub retry_count: u32,
}

impl Default for CommunicationSettings {
    fn default() -> Self {
        Self {
            connect_wait_secs: 10,
            retry_count: 1,
        }
    }
}

impl CommunicationSettings {
    pub fn connect_wait(&self) -> Duration {
        Duration::from_secs(self.connect_wait_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Loads settings from the optional file plus `MFPKIT__*` environment variables.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(false));
    }
    builder
        .add_source(Environment::with_prefix("MFPKIT").prefix_separator("__").separator("__"))
        .build()?
        .try_deserialize()
}
