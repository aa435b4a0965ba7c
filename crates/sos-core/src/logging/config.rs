//! Log level and format selection.
//!
//! Precedence, lowest first: built-in defaults, `RUST_LOG`, `SOS_LOG`,
//! `SOS_LOG_FORMAT`, then `--log-level` / `--log-format`.

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

pub const ENV_LOG_LEVEL: &str = "SOS_LOG";
pub const ENV_LOG_FORMAT: &str = "SOS_LOG_FORMAT";

/// Where log lines go and how they look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact text on stderr.
    #[default]
    Human,
    /// One JSON object per event on stderr.
    Jsonl,
}

impl LogFormat {
    const NAMES: &'static [(&'static str, LogFormat)] = &[
        ("human", LogFormat::Human),
        ("text", LogFormat::Human),
        ("jsonl", LogFormat::Jsonl),
        ("json", LogFormat::Jsonl),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, clap::ValueEnum)]
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

impl LogLevel {
    const NAMES: &'static [(&'static str, LogLevel)] = &[
        ("trace", LogLevel::Trace),
        ("debug", LogLevel::Debug),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("warning", LogLevel::Warn),
        ("error", LogLevel::Error),
        ("off", LogLevel::Off),
        ("none", LogLevel::Off),
    ];

    /// Default level of an `EnvFilter` directive string such as
    /// `warn,sos_core=debug`: the last directive without a target.
    fn from_directives(directives: &str) -> Option<Self> {
        directives
            .split(',')
            .map(str::trim)
            .filter(|d| !d.contains('='))
            .filter_map(|d| d.parse().ok())
            .last()
    }
}

fn lookup<T: Copy>(names: &[(&str, T)], s: &str) -> Option<T> {
    let s = s.trim();
    names
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(s))
        .map(|(_, value)| *value)
}

fn name_of<T: PartialEq>(names: &'static [(&'static str, T)], value: &T) -> &'static str {
    names
        .iter()
        .find(|(_, v)| v == value)
        .map_or("?", |(name, _)| name)
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(Self::NAMES, s).ok_or_else(|| format!("unknown log format '{}'", s))
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(name_of(Self::NAMES, self))
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(Self::NAMES, s).ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(name_of(Self::NAMES, self))
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Prefix human lines with a timestamp.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::default(),
            level: LogLevel::default(),
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Resolve from the process environment, then apply CLI overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::resolve(|key| std::env::var(key).ok(), cli_level, cli_format)
    }

    /// Resolve against an arbitrary variable source.
    pub fn resolve(
        var: impl Fn(&str) -> Option<String>,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
    ) -> Self {
        let defaults = LogConfig::default();
        let env_level = var(ENV_LOG_LEVEL)
            .and_then(|v| v.parse().ok())
            .or_else(|| var("RUST_LOG").and_then(|v| LogLevel::from_directives(&v)));
        let env_format = var(ENV_LOG_FORMAT).and_then(|v| v.parse().ok());

        LogConfig {
            level: cli_level.or(env_level).unwrap_or(defaults.level),
            format: cli_format.or(env_format).unwrap_or(defaults.format),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_names_round_trip() {
        for (name, level) in LogLevel::NAMES {
            assert_eq!(name.parse::<LogLevel>().unwrap(), *level);
        }
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Jsonl);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_rust_log_default_directive() {
        let config = LogConfig::resolve(vars(&[("RUST_LOG", "warn,sos_core=trace")]), None, None);
        assert_eq!(config.level, LogLevel::Warn);

        let config = LogConfig::resolve(vars(&[("RUST_LOG", "sos_core=trace")]), None, None);
        assert_eq!(config.level, LogLevel::Info);
    }

    #[test]
    fn test_sos_log_beats_rust_log() {
        let env = vars(&[("RUST_LOG", "debug"), (ENV_LOG_LEVEL, "error"), (ENV_LOG_FORMAT, "jsonl")]);
        let config = LogConfig::resolve(env, None, None);
        assert_eq!(config.level, LogLevel::Error);
        assert_eq!(config.format, LogFormat::Jsonl);
    }

    #[test]
    fn test_cli_overrides_win() {
        let env = vars(&[(ENV_LOG_LEVEL, "error"), (ENV_LOG_FORMAT, "human")]);
        let config = LogConfig::resolve(env, Some(LogLevel::Debug), Some(LogFormat::Jsonl));
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Jsonl);
        assert!(config.timestamps);
    }
}
