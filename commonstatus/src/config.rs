//! Exporter configuration
//!
//! Every setting is read once at startup, either from a long flag or from its
//! environment variable, and validated into a [`Config`].

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use clap::{ArgMatches, Parser, parser::ValueSource};

/// Environment variable holding the listen port
pub const ENV_PORT: &str = "COMMONSTATUS_EXPORTER_PORT";
/// Environment variable holding the target fetch timeout, in seconds
pub const ENV_CONNECTION_TIMEOUT: &str = "COMMONSTATUS_CONNECTION_TIMEOUT";
/// Environment variable holding the log level
pub const ENV_LOG_LEVEL: &str = "COMMONSTATUS_EXPORTER_LOG_LEVEL";
/// Environment variable holding the listen address
pub const ENV_LISTEN_ADDR: &str = "COMMONSTATUS_EXPORTER_LISTEN_ADDR";
/// Environment variable holding the connection limit
pub const ENV_CONCURRENCY: &str = "COMMONSTATUS_EXPORTER_CONCURRENCY";

// clap argument ids and their environment variables
const SETTINGS: [(&str, &str); 5] = [
    ("port", ENV_PORT),
    ("connection_timeout", ENV_CONNECTION_TIMEOUT),
    ("log_level", ENV_LOG_LEVEL),
    ("listen_addr", ENV_LISTEN_ADDR),
    ("concurrent_requests_max", ENV_CONCURRENCY),
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors produced by [`Config`]
pub enum Error {
    /// A setting holds a value the exporter cannot run with.
    #[error("invalid {setting} value {value:?}: {reason}")]
    Config {
        /// Environment variable of the setting
        setting: &'static str,
        /// The rejected value
        value: String,
        /// What was wrong with it
        reason: &'static str,
    },
    /// The log level is not one of `DEBUG`, `INFO`, `WARN`, `WARNING` or
    /// `ERROR`. Callers fall back to [`LogLevel::Info`].
    #[error("unknown log level {0:?}")]
    LogLevel(String),
}

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(version, about = "Prometheus exporter for legacy CommonStatus pages")]
/// Command line and environment arguments, before validation
pub struct Args {
    /// Port the HTTP server listens on
    #[arg(long, env = ENV_PORT, default_value_t = 9259)]
    pub port: u16,

    /// Seconds to wait for a target before giving up
    #[arg(long, env = ENV_CONNECTION_TIMEOUT, default_value = "8")]
    pub connection_timeout: String,

    /// One of DEBUG, INFO, WARN, WARNING, ERROR
    #[arg(long, env = ENV_LOG_LEVEL, default_value = "INFO")]
    pub log_level: String,

    /// Address the HTTP server binds to
    #[arg(long, env = ENV_LISTEN_ADDR, default_value = "0.0.0.0")]
    pub listen_addr: IpAddr,

    /// Maximum number of connections served at once
    #[arg(long, env = ENV_CONCURRENCY, default_value_t = 100)]
    pub concurrent_requests_max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Minimum severity of emitted log lines
pub enum LogLevel {
    /// Everything down to debug
    Debug,
    /// Info and above
    #[default]
    Info,
    /// Warnings and errors
    Warn,
    /// Errors only
    Error,
}

impl LogLevel {
    /// The `tracing_subscriber` filter directive for this level
    #[must_use]
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            _ => Err(Error::LogLevel(s.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Validated exporter configuration
pub struct Config {
    /// Address the HTTP server binds to
    pub binding_addr: SocketAddr,
    /// Default deadline for fetching a target
    pub connection_timeout: Duration,
    /// Minimum severity of emitted log lines
    pub log_level: LogLevel,
    /// Maximum number of connections served at once
    pub concurrent_requests_max: usize,
}

impl TryFrom<Args> for Config {
    type Error = Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let connection_timeout =
            parse_timeout(&args.connection_timeout).map_err(|reason| Error::Config {
                setting: ENV_CONNECTION_TIMEOUT,
                value: args.connection_timeout.clone(),
                reason,
            })?;

        if args.concurrent_requests_max == 0 {
            return Err(Error::Config {
                setting: ENV_CONCURRENCY,
                value: "0".to_string(),
                reason: "at least one connection must be allowed",
            });
        }

        Ok(Self {
            binding_addr: SocketAddr::new(args.listen_addr, args.port),
            connection_timeout,
            log_level: args.log_level.parse().unwrap_or_default(),
            concurrent_requests_max: args.concurrent_requests_max,
        })
    }
}

/// Read a timeout given in seconds, fractions allowed.
///
/// # Errors
///
/// Returns a description of the problem if `seconds` is not a finite, strictly
/// positive number.
pub fn parse_timeout(seconds: &str) -> Result<Duration, &'static str> {
    let seconds: f64 = seconds
        .trim()
        .parse()
        .map_err(|_| "not a number of seconds")?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err("must be a positive, finite number of seconds");
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| "out of range")
}

/// Environment variables of the settings that were given neither as flag nor
/// as environment variable, so run with their default value.
#[must_use]
pub fn defaulted_settings(matches: &ArgMatches) -> Vec<&'static str> {
    SETTINGS
        .iter()
        .filter(|(id, _)| matches.value_source(id) == Some(ValueSource::DefaultValue))
        .map(|(_, env)| *env)
        .collect()
}
