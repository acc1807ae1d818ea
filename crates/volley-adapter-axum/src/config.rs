use std::net::SocketAddr;
use std::path::Path;

use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;
use validator::Validate;

use volley_core::app::AppConfig;

pub const ENV_ORIGIN: &str = "VOLLEY_ORIGIN";
pub const ENV_PUBLIC_URI: &str = "PUBLIC_URI";
pub const ENV_PORT: &str = "PORT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("invalid value {value:?} for environment variable {name}")]
    Env { name: &'static str, value: String },
}

/// Server settings read from TOML:
///
/// ```toml
/// [server]
/// addr = "127.0.0.1:8787"
///
/// [app]
/// public_uri = "https://api.example.org/"
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    #[validate(nested)]
    pub app: AppConfig,
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub addr: SocketAddr,
    pub enable_ctrl_c: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            enable_ctrl_c: true,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: LogLevel,
    pub echo_stdout: Option<bool>,
}

impl LoggingSection {
    /// Effective filter; `echo_stdout = false` silences the logger.
    pub fn filter(&self) -> LevelFilter {
        if self.echo_stdout.unwrap_or(true) {
            self.level.into()
        } else {
            LevelFilter::Off
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

impl ServerConfig {
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::load_from_str(&contents)
    }

    /// Overlay deployment variables. `PORT` also moves the listening address.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(origin) = lookup(ENV_ORIGIN).filter(|value| !value.is_empty()) {
            self.app.app_origin = Some(origin);
        }
        if let Some(uri) = lookup(ENV_PUBLIC_URI).filter(|value| !value.is_empty()) {
            self.app.public_uri = Some(uri);
        }
        if let Some(port) = lookup(ENV_PORT) {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::Env {
                name: ENV_PORT,
                value: port.clone(),
            })?;
            self.app.port = Some(port);
            self.server.addr.set_port(port);
        }
        Ok(())
    }

    /// [`ServerConfig::apply_env`] against the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|name| std::env::var(name).ok())
    }
}
