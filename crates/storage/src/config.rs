use directories::ProjectDirs;
use doc_model::PortalConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_SCHEMA_VERSION: u32 = 1;

pub const ENV_BACKEND_URL: &str = "DOCPORTAL_BACKEND_URL";
pub const ENV_ANON_KEY: &str = "DOCPORTAL_ANON_KEY";
pub const ENV_VIEWER_ORIGIN: &str = "DOCPORTAL_VIEWER_ORIGIN";
pub const ENV_ACCESS_TOKEN: &str = "DOCPORTAL_ACCESS_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to resolve the configuration directory")]
    NoConfigDirectory,
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported configuration version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u32,
    config: PortalConfig,
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "DocPortal", "DocPortal")
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dirs = project_dirs().ok_or(ConfigError::NoConfigDirectory)?;
    Ok(dirs.config_dir().join("config.json"))
}

/// Reads a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<PortalConfig, ConfigError> {
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(PortalConfig::default());
    }

    let bytes =
        fs::read(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;

    if envelope.version != CONFIG_SCHEMA_VERSION {
        return Err(ConfigError::UnsupportedVersion(envelope.version));
    }

    Ok(envelope.config)
}

pub fn save_config(path: &Path, config: &PortalConfig) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let envelope = ConfigEnvelope { version: CONFIG_SCHEMA_VERSION, config: config.clone() };
    let bytes = serde_json::to_vec_pretty(&envelope)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
    fs::write(path, bytes).map_err(io_err)
}

/// Applies `DOCPORTAL_*` overrides read through `lookup`. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut PortalConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(url) = read(ENV_BACKEND_URL) {
        config.backend.url = Some(url);
    }
    if let Some(key) = read(ENV_ANON_KEY) {
        config.backend.anon_key = Some(key);
    }
    if let Some(token) = read(ENV_ACCESS_TOKEN) {
        config.backend.access_token = Some(token);
    }
    if let Some(origin) = read(ENV_VIEWER_ORIGIN) {
        config.set_viewer_origin(origin);
    }
}

/// Loads `path` (or the default location, when one can be resolved) and layers process
/// environment overrides on top.
pub fn load_with_env(path: Option<&Path>) -> Result<PortalConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => match default_config_path() {
            Ok(path) => load_config(&path)?,
            Err(err) => {
                log::debug!("{err}, using defaults");
                PortalConfig::default()
            }
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}
