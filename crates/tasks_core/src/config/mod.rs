use crate::error::AppError;
use crate::storage::json_store::STORE_FILE_NAME;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "TASKS_CONFIG_PATH";
const APP_DIR_NAME: &str = "tasks";
pub const STORE_ENV_VAR: &str = "TASKS_STORE_PATH";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

/// Values supplied on the command line; they win over the config file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub store_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| AppError::validation("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    } else {
        let home =
            std::env::var("HOME").map_err(|_| AppError::validation("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }
}

/// Never fails: a broken or unreachable config yields defaults plus the error.
pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::persistence(format!("{}: {}", path.display(), err)))?;
    let config: Config = serde_json::from_str(&content).map_err(|err| {
        AppError::persistence(format!("invalid JSON in {}: {}", path.display(), err))
    })?;
    Ok(normalize_config(config))
}

fn normalize_config(mut config: Config) -> Config {
    config.log_level = config
        .log_level
        .and_then(|level| canonical_log_level(&level));
    config.store_path = config
        .store_path
        .filter(|path| !path.as_os_str().is_empty());
    config
}

/// Maps user spellings onto the level names the logger understands.
/// Unknown names yield `None`.
pub fn canonical_log_level(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_ascii_lowercase();
    let level = match lowered.as_str() {
        "off" | "none" | "quiet" => "off",
        "error" | "err" => "error",
        "warn" | "warning" => "warn",
        "info" => "info",
        "debug" | "verbose" => "debug",
        "trace" => "trace",
        _ => return None,
    };
    Some(level.to_string())
}

pub fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();
    if let Some(path) = overrides.store_path.as_ref() {
        merged.store_path = Some(path.clone());
    }
    if let Some(level) = overrides.log_level.as_deref()
        && let Some(normalized) = canonical_log_level(level)
    {
        merged.log_level = Some(normalized);
    }
    merged
}

impl Config {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }
}

/// Resolves the task file: explicit override, then `TASKS_STORE_PATH`, then
/// the config file, then `tasks.json` in the working directory.
pub fn resolve_store_path(config: &Config, overrides: &ConfigOverrides) -> PathBuf {
    let env_value = std::env::var(STORE_ENV_VAR).ok();
    resolve_store_path_with(config, overrides, env_value.as_deref())
}

fn resolve_store_path_with(
    config: &Config,
    overrides: &ConfigOverrides,
    env_value: Option<&str>,
) -> PathBuf {
    if let Some(path) = overrides.store_path.as_ref() {
        return path.clone();
    }
    if let Some(value) = env_value
        && !value.trim().is_empty()
    {
        return PathBuf::from(value);
    }
    config
        .store_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(STORE_FILE_NAME))
}
