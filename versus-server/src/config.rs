//! Command line and environment configuration of the server.

use axum::http::HeaderValue;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ServerError;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Matchmaking and game relay server for two player versus games")]
pub struct ServerConfig {
    /// Address to bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Origins allowed to call the API, comma separated
    #[arg(
        long,
        env = "CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000,http://localhost:8080"
    )]
    pub cors_origins: Vec<String>,

    /// Seconds without any request or message after which a player is logged out
    #[arg(long, env = "INACTIVITY_TIMEOUT_SECS", default_value_t = 1800)]
    pub inactivity_timeout_secs: u64,

    /// Seconds between two inactivity sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    /// Seconds a finished session is kept for rematch requests
    #[arg(long, env = "SESSION_RETENTION_SECS", default_value_t = 3600)]
    pub session_retention_secs: u64,

    /// Directory with the web client, served for every unknown path
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            cors_origins: vec![
                "http://localhost:3000".into(),
                "http://localhost:8080".into(),
            ],
            inactivity_timeout_secs: 1800,
            sweep_interval_secs: 300,
            session_retention_secs: 3600,
            static_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.port == 0 {
            return Err(invalid("port must not be 0"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("sweep interval must be at least one second"));
        }
        if self.inactivity_timeout_secs == 0 {
            return Err(invalid("inactivity timeout must be at least one second"));
        }
        for origin in &self.cors_origins {
            if origin.trim().is_empty() {
                return Err(invalid("empty entry in the CORS origins"));
            }
            if HeaderValue::from_str(origin.trim()).is_err() {
                return Err(invalid(format!("CORS origin '{origin}' is not a valid header value")));
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The configured origins as header values. Call [`ServerConfig::validate`] first,
    /// entries that do not parse are skipped.
    pub fn allowed_origins(&self) -> Vec<HeaderValue> {
        self.cors_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
            .collect()
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }
}

fn invalid(reason: impl Into<String>) -> ServerError {
    ServerError::InvalidConfig {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_over_defaults() {
        let config = ServerConfig::try_parse_from([
            "versus-server",
            "--port",
            "9000",
            "--cors-origins",
            "http://a.example,http://b.example",
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.cors_origins, ["http://a.example", "http://b.example"]);
        assert!(config.bind_address().ends_with(":9000"));
        assert_eq!(config.allowed_origins().len(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn default_is_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.session_retention(), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_broken_values() {
        let zero_port = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(
            zero_port.validate(),
            Err(ServerError::InvalidConfig { .. })
        ));

        let no_sweep = ServerConfig {
            sweep_interval_secs: 0,
            ..ServerConfig::default()
        };
        assert!(no_sweep.validate().is_err());

        let empty_origin = ServerConfig {
            cors_origins: vec!["http://ok.example".into(), " ".into()],
            ..ServerConfig::default()
        };
        assert!(empty_origin.validate().is_err());
    }
}
