use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "detect.toml";
const DEFAULT_CAMERA_NAME: &str = "camera";
const DEFAULT_CLIENT_ID: &str = "detect_events";
const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 250;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    camera: Option<CameraConfigFile>,
    #[serde(alias = "kafka")]
    bus: Option<BusConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BusConfigFile {
    bootstrap_servers: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    flush_timeout_ms: Option<u64>,
    username: Option<String>,
    password: Option<String>,
}

/// Process configuration, built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Used verbatim as `camera_name` in every event.
    pub camera_name: String,
    /// Whether `camera.name` came from the file or environment.
    pub camera_name_configured: bool,
    pub bus: BusSettings,
}

/// Message bus settings (`[kafka]` / `[bus]` table).
#[derive(Debug, Clone)]
pub struct BusSettings {
    pub bootstrap_servers: Option<String>,
    pub topic: Option<String>,
    pub client_id: String,
    pub flush_timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Bus settings with every key telemetry needs present.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub bootstrap_servers: String,
    pub topic: String,
    pub client_id: String,
    pub flush_timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Load from `path`, or `DETECT_CONFIG`, or `detect.toml` in the working directory.
    ///
    /// An explicitly named file must exist; the implicit default may be absent.
    /// Environment overrides are applied after the file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var("DETECT_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty());
        let file_cfg = match (path, env_path.as_deref()) {
            (Some(path), _) => read_config_file(path)?,
            (None, Some(path)) => read_config_file(Path::new(path))?,
            (None, None) => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    read_config_file(default)?
                } else {
                    log::debug!("no {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                    PipelineConfigFile::default()
                }
            }
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Parse TOML text. Used by `load` and by tests.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: PipelineConfigFile = toml::from_str(raw).map_err(|e| ConfigError::Read {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let camera_name = file.camera.and_then(|camera| camera.name);
        let camera_name_configured = camera_name.is_some();
        let bus = file.bus.unwrap_or_default();
        Self {
            camera_name: camera_name.unwrap_or_else(|| DEFAULT_CAMERA_NAME.to_string()),
            camera_name_configured,
            bus: BusSettings {
                bootstrap_servers: bus.bootstrap_servers,
                topic: bus.topic,
                client_id: bus
                    .client_id
                    .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                flush_timeout: Duration::from_millis(
                    bus.flush_timeout_ms.unwrap_or(DEFAULT_FLUSH_TIMEOUT_MS),
                ),
                username: bus.username,
                password: bus.password,
            },
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(name) = std::env::var("DETECT_CAMERA_NAME") {
            if !name.trim().is_empty() {
                self.camera_name = name;
                self.camera_name_configured = true;
            }
        }
        if let Ok(servers) = std::env::var("DETECT_BOOTSTRAP_SERVERS") {
            if !servers.trim().is_empty() {
                self.bus.bootstrap_servers = Some(servers);
            }
        }
        if let Ok(topic) = std::env::var("DETECT_TOPIC") {
            if !topic.trim().is_empty() {
                self.bus.topic = Some(topic);
            }
        }
        if let Ok(timeout) = std::env::var("DETECT_FLUSH_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| ConfigError::Invalid {
                key: "DETECT_FLUSH_TIMEOUT_MS",
                reason: "must be an integer number of milliseconds".to_string(),
            })?;
            self.bus.flush_timeout = Duration::from_millis(millis);
        }
        Ok(())
    }

    /// Check the configuration for the requested mode.
    ///
    /// With telemetry enabled, `camera.name`, `kafka.bootstrap_servers` and
    /// `kafka.topic` are all required.
    pub fn validate(&self, telemetry_enabled: bool) -> Result<(), ConfigError> {
        if self.camera_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "camera.name",
                reason: "must not be empty".to_string(),
            });
        }
        if telemetry_enabled {
            self.telemetry()?;
        }
        Ok(())
    }

    /// Resolve the settings needed to construct a publisher.
    pub fn telemetry(&self) -> Result<TelemetrySettings, ConfigError> {
        if !self.camera_name_configured {
            return Err(ConfigError::Missing("camera.name"));
        }
        let bootstrap_servers = non_empty(self.bus.bootstrap_servers.as_deref())
            .ok_or(ConfigError::Missing("kafka.bootstrap_servers"))?;
        let topic =
            non_empty(self.bus.topic.as_deref()).ok_or(ConfigError::Missing("kafka.topic"))?;
        if self.bus.flush_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "kafka.flush_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(TelemetrySettings {
            bootstrap_servers,
            topic,
            client_id: self.bus.client_id.clone(),
            flush_timeout: self.bus.flush_timeout,
            username: self.bus.username.clone(),
            password: self.bus.password.clone(),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&raw).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
