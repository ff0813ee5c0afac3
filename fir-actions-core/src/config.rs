//! Layered configuration for the actions engine.
//!
//! Uses `figment` to merge built-in defaults, a user-level file, a
//! workspace-level file, `FIR_ACTIONS_*` environment variables and explicit
//! overrides.

use crate::artifacts::ArtifactKind;
use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "FIR_ACTIONS_";
const WORKSPACE_DIR: &str = ".fir-actions";
const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where engine state lives between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot path. Relative paths resolve against the workspace.
    pub state_path: Option<PathBuf>,
    /// Save the snapshot after every successful command.
    pub autosave: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: Some(PathBuf::from(WORKSPACE_DIR).join("state.json")),
            autosave: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub enabled: bool,
    /// Buffered events per subscriber before the slowest one lags.
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub enabled: bool,
    /// Kinds the extractor looks for.
    pub kinds: Vec<ArtifactKind>,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kinds: ArtifactKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write JSON logs to a daily rolling file.
    pub json_file: bool,
    /// Directory for JSON log files; defaults to the user data directory.
    pub log_dir: Option<PathBuf>,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_file: false,
            log_dir: None,
            level: "info".to_string(),
        }
    }
}

impl FirConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.events.enabled && self.events.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "events.channel_capacity must be at least 1".into(),
            });
        }
        if self.artifacts.enabled && self.artifacts.kinds.is_empty() {
            return Err(ConfigError::Invalid {
                message: "artifacts.kinds must not be empty when artifacts are enabled".into(),
            });
        }
        Ok(())
    }

    /// Snapshot path resolved against `workspace`.
    pub fn state_path(&self, workspace: &Path) -> Option<PathBuf> {
        self.store.state_path.as_ref().map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                workspace.join(path)
            }
        })
    }
}

/// Values that win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub state_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "fir", "fir-actions")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// `<workspace>/.fir-actions/config.toml`.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join(CONFIG_FILE)
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (`FIR_ACTIONS_STORE__AUTOSAVE=false`, ...)
/// 3. Workspace config (`.fir-actions/config.toml`)
/// 4. User config (platform config dir, `fir-actions/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<FirConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(FirConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(overrides) = overrides {
        if let Some(path) = &overrides.state_path {
            figment = figment.merge(Serialized::default("store.state_path", path));
        }
        if let Some(level) = &overrides.log_level {
            figment = figment.merge(Serialized::default("logging.level", level));
        }
    }

    let config: FirConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|path| path.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

/// Write the default configuration to the workspace config file.
///
/// Refuses to overwrite an existing file.
pub fn write_default_config(workspace: &Path) -> Result<PathBuf, ConfigError> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Err(ConfigError::Invalid {
            message: format!("{} already exists", path.display()),
        });
    }
    let body = toml::to_string_pretty(&FirConfig::default()).map_err(|e| {
        ConfigError::ParseError {
            message: e.to_string(),
        }
    })?;
    crate::persistence::atomic_write(&path, body.as_bytes()).map_err(|e| ConfigError::Invalid {
        message: format!("cannot write {}: {e}", path.display()),
    })?;
    Ok(path)
}
