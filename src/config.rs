use std::str::FromStr;
use std::time::Duration;

use crate::{FluxlineError, Result, DEFAULT_PORT};

/// Cluster client configuration. Build one directly or parse the
/// `key=value;…` connection-string form with [`Config::from_connection_string`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Cluster nodes, `host` or `host:port`. One connection is opened per
    /// entry.
    pub hosts: Vec<String>,
    /// Port for hosts that do not carry their own.
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Credit window per connection.
    pub max_outstanding: usize,
    /// Default per-call timeout.
    pub command_timeout: Duration,
    /// Keep per-procedure latency statistics.
    pub statistics: bool,
    /// Permit `@`-prefixed system procedures.
    pub allow_system_calls: bool,
    /// Permit `@AdHoc` queries.
    pub allow_ad_hoc: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hosts: Vec::new(),
            port: DEFAULT_PORT,
            user: String::new(),
            password: String::new(),
            max_outstanding: 3000,
            command_timeout: Duration::from_millis(5000),
            statistics: false,
            allow_system_calls: false,
            allow_ad_hoc: false,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match &*value.to_lowercase() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(FluxlineError::Configuration(format!(
            "option '{key}' expects a boolean, got {value:?}"
        ))),
    }
}

impl Config {
    /// Parses a `key=value;…` connection string. Unknown keys are rejected.
    pub fn from_connection_string(s: &str) -> Result<Config> {
        let mut config = Config::default();
        for entry in s.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                FluxlineError::Configuration(format!("malformed connection option {entry:?}"))
            })?;
            let (key, value) = (key.trim(), value.trim());
            match &*key.to_lowercase() {
                "hosts" => {
                    config.hosts = value
                        .split(',')
                        .map(|h| h.trim().to_string())
                        .filter(|h| !h.is_empty())
                        .collect();
                }
                "port" => {
                    config.port = value.parse().map_err(|_| {
                        FluxlineError::Configuration(format!(
                            "option 'port' expects a port number, got {value:?}"
                        ))
                    })?;
                }
                "user" => config.user = value.to_string(),
                "password" => config.password = value.to_string(),
                "maxoutstandingtransactions" => {
                    config.max_outstanding = value.parse().ok().filter(|v| *v > 0).ok_or_else(
                        || {
                            FluxlineError::Configuration(format!(
                                "option 'MaxOutstandingTransactions' expects a positive integer, got {value:?}"
                            ))
                        },
                    )?;
                }
                "commandtimeout" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        FluxlineError::Configuration(format!(
                            "option 'CommandTimeout' expects milliseconds, got {value:?}"
                        ))
                    })?;
                    config.command_timeout = Duration::from_millis(ms);
                }
                "statistics" => config.statistics = parse_bool(key, value)?,
                "allowsystemcalls" => config.allow_system_calls = parse_bool(key, value)?,
                "allowadhocqueries" => config.allow_ad_hoc = parse_bool(key, value)?,
                _ => {
                    return Err(FluxlineError::Configuration(format!(
                        "unrecognized connection option '{key}'"
                    )))
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(FluxlineError::Configuration(
                "at least one host is required".to_string(),
            ));
        }
        if self.max_outstanding == 0 {
            return Err(FluxlineError::Configuration(
                "MaxOutstandingTransactions must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` for a configured host entry, applying the default port.
    pub(crate) fn endpoint(&self, host: &str) -> String {
        if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl FromStr for Config {
    type Err = FluxlineError;

    fn from_str(s: &str) -> Result<Config> {
        Config::from_connection_string(s)
    }
}
