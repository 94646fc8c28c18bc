use std::str::FromStr;

use geoengine_core::settings::Settings;

/// An environment variable that is set but cannot be parsed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{var} must be a valid {expected}, got '{value}'")]
pub struct ConfigLoadError {
    pub var: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Server configuration loaded from environment variables.
///
/// Port and pool size fall back to the values in `settings.yaml`, so a
/// plain `geoengine serve` matches what the GIS plugins expect.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `127.0.0.1`).
    pub host: String,
    /// Bind port (default: `service_port` from settings, `9876`).
    pub port: u16,
    /// Maximum concurrently running jobs (default: `max_workers` from settings, `4`).
    pub max_workers: usize,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for running jobs to stop on shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                      |
    /// |-------------------------|------------------------------|
    /// | `HOST`                  | `127.0.0.1`                  |
    /// | `PORT`                  | `settings.service_port`      |
    /// | `MAX_WORKERS`           | `settings.max_workers`       |
    /// | `CORS_ORIGINS`          | `http://localhost`           |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                         |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                         |
    pub fn from_env(settings: &Settings) -> Result<Self, ConfigLoadError> {
        Self::from_lookup(settings, |var| std::env::var(var).ok())
    }

    /// Same as [`ServerConfig::from_env`] with variables read through `lookup`.
    pub fn from_lookup(
        settings: &Settings,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigLoadError> {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".into());

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port: parse_var(&lookup, "PORT", "u16", settings.service_port)?,
            max_workers: parse_var(&lookup, "MAX_WORKERS", "usize", settings.max_workers)?,
            cors_origins,
            request_timeout_secs: parse_var(&lookup, "REQUEST_TIMEOUT_SECS", "u64", 30)?,
            shutdown_timeout_secs: parse_var(&lookup, "SHUTDOWN_TIMEOUT_SECS", "u64", 30)?,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigLoadError> {
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigLoadError {
            var,
            value: raw,
            expected,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigLoadError> {
        let settings = Settings {
            service_port: 9000,
            max_workers: 3,
            ..Settings::default()
        };
        ServerConfig::from_lookup(&settings, |var| {
            vars.iter().find(|(k, _)| *k == var).map(|(_, v)| v.to_string())
        })
    }

    #[test]
    fn unset_variables_fall_back_to_settings() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.cors_origins, ["http://localhost"]);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn variables_override_settings() {
        let config = load(&[("PORT", "9100"), ("CORS_ORIGINS", "http://a, http://b,")]).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.cors_origins, ["http://a", "http://b"]);
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = load(&[("PORT", "70000")]).unwrap_err();
        assert_eq!(
            err,
            ConfigLoadError {
                var: "PORT",
                value: "70000".into(),
                expected: "u16",
            }
        );
        assert_eq!(err.to_string(), "PORT must be a valid u16, got '70000'");
    }

    #[test]
    fn invalid_timeout_is_an_error() {
        let err = load(&[("SHUTDOWN_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert_eq!(err.var, "SHUTDOWN_TIMEOUT_SECS");
    }
}
