//! Configuration for kvfront components
//!
//! Values are layered: built-in defaults, then an optional TOML file named by
//! `KVFRONT_CONFIG`, then process environment variables (`SERVICE_NAME`,
//! `ENVIRONMENT`, `PORT`, `DATABASE_PATH`, ...). A `.env` file in the working
//! directory is loaded into the environment first if present.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "KVFRONT_CONFIG";

/// Process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name reported in telemetry
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment environment reported in telemetry
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Listening port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Listening address
    #[serde(default = "default_bind_host")]
    pub bind_host: IpAddr,

    /// SQLite database file; in-memory when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// How long in-flight calls may run after shutdown is requested
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    /// Deadline for flushing telemetry at shutdown
    #[serde(default = "default_flush_timeout")]
    pub telemetry_flush_timeout_secs: u64,

    /// Logging level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_service_name() -> String {
    "kvfront".to_string()
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_port() -> u16 {
    5051
}
fn default_bind_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_drain_timeout() -> u64 {
    10
}
fn default_flush_timeout() -> u64 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            port: default_port(),
            bind_host: default_bind_host(),
            database_path: None,
            drain_timeout_secs: default_drain_timeout(),
            telemetry_flush_timeout_secs: default_flush_timeout(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from `.env`, the optional config file and the environment.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(Error::InvalidConfig(format!(".env: {}", e))),
        }

        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::from_sources(file, config::Environment::default().try_parsing(true))
    }

    /// Build from an optional TOML file and an environment source.
    pub fn from_sources(file: Option<PathBuf>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.drain_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "drain_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.telemetry_flush_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "telemetry_flush_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn telemetry_flush_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry_flush_timeout_secs)
    }
}
