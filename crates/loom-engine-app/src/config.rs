//! Environment-driven server configuration. Values are parsed with
//! explicit errors at startup; nothing panics on a bad variable.

use std::env;
use std::path::PathBuf;

use loom_engine_core::provider::ExecutionMode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidEnvVar {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Server settings.
///
/// | Variable       | Default     | Meaning                                   |
/// |----------------|-------------|-------------------------------------------|
/// | `HOST`         | `127.0.0.1` | Bind address                              |
/// | `PORT`         | `8080`      | Bind port                                 |
/// | `LOOM_DB_PATH` | unset       | SQLite file; unset runs on in-memory stores |
/// | `LOOM_MODE`    | `live`      | `live` or `playback`                      |
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub db_path: Option<PathBuf>,
    pub mode: ExecutionMode,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port_raw = env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        let port = port_raw
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: "PORT",
                value: port_raw,
                reason: e.to_string(),
            })?;

        let db_path = env::var("LOOM_DB_PATH").ok().map(PathBuf::from);

        let mode_raw = env::var("LOOM_MODE").unwrap_or_else(|_| "live".to_string());
        let mode = mode_raw
            .parse::<ExecutionMode>()
            .map_err(|reason| ConfigError::InvalidEnvVar {
                var: "LOOM_MODE",
                value: mode_raw,
                reason,
            })?;

        Ok(Self {
            host,
            port,
            db_path,
            mode,
        })
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}
