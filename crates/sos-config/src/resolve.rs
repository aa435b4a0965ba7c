//! Locating the settings file.
//!
//! Candidates are tried in order and the first existing file wins:
//! `--config`, `SOS_INGEST_CONFIG`, `SOS_INGEST_CONFIG_DIR/service.json`,
//! the XDG config directory, `/etc/sos-ingest`. With no file the built-in
//! defaults apply.

use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "SOS_INGEST_CONFIG";
pub const ENV_CONFIG_DIR: &str = "SOS_INGEST_CONFIG_DIR";
/// Overrides the directory of the default database file.
pub const ENV_DATA_DIR: &str = "SOS_INGEST_DATA";

pub const SETTINGS_FILENAME: &str = "service.json";

const APP_NAME: &str = "sos-ingest";

/// The settings file chosen for this run, if any.
#[derive(Debug, Clone, Default)]
pub struct ConfigPath {
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    CliArgument,
    /// `SOS_INGEST_CONFIG` or `SOS_INGEST_CONFIG_DIR`.
    Environment,
    XdgConfig,
    SystemConfig,
    #[default]
    BuiltinDefault,
}

impl ConfigSource {
    pub fn label(self) -> &'static str {
        match self {
            ConfigSource::CliArgument => "CLI argument",
            ConfigSource::Environment => "environment variable",
            ConfigSource::XdgConfig => "XDG config",
            ConfigSource::SystemConfig => "system config",
            ConfigSource::BuiltinDefault => "builtin default",
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

fn candidates(cli_path: Option<&Path>) -> Vec<(PathBuf, ConfigSource)> {
    let env_path = std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from);
    let env_dir = std::env::var_os(ENV_CONFIG_DIR).map(|d| PathBuf::from(d).join(SETTINGS_FILENAME));

    [
        (cli_path.map(Path::to_path_buf), ConfigSource::CliArgument),
        (env_path, ConfigSource::Environment),
        (env_dir, ConfigSource::Environment),
        (
            xdg_config_dir().map(|d| d.join(SETTINGS_FILENAME)),
            ConfigSource::XdgConfig,
        ),
        (
            Some(system_config_dir().join(SETTINGS_FILENAME)),
            ConfigSource::SystemConfig,
        ),
    ]
    .into_iter()
    .filter_map(|(path, source)| path.map(|p| (p, source)))
    .collect()
}

/// Pick the settings file. A `cli_path` that does not exist is skipped;
/// callers that require it must check first.
pub fn resolve_config(cli_path: Option<&Path>) -> ConfigPath {
    candidates(cli_path)
        .into_iter()
        .find(|(path, _)| path.exists())
        .map(|(path, source)| ConfigPath {
            path: Some(path),
            source,
        })
        .unwrap_or_default()
}

pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

pub fn system_config_dir() -> PathBuf {
    Path::new("/etc").join(APP_NAME)
}

/// Directory of the default database file.
pub fn data_dir() -> Option<PathBuf> {
    std::env::var_os(ENV_DATA_DIR)
        .map(PathBuf::from)
        .or_else(|| dirs::data_dir().map(|d| d.join(APP_NAME)))
}
