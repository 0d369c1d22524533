//! Configuration for procflow paths.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variable (PROCFLOW_HOME)
//! 2. Config file (.procflow/config.yaml)
//! 3. Defaults (~/.procflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .procflow/config.yaml
//! - Paths in the config file are relative to the .procflow/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to the config file's directory)
    pub home: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to procflow home (journals and deployed definitions)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".procflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".procflow");

    let config_file = find_config_file();

    let home = if let Ok(env_home) = std::env::var("PROCFLOW_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        match config.paths.home {
            Some(ref home_path) => resolve_path(config_dir, home_path),
            None => default_home,
        }
    } else {
        default_home
    };

    Ok(ResolvedConfig { home, config_file })
}

/// The resolved configuration, loaded once per process.
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{e:#}")));
    match result {
        Ok(config) => Ok(config),
        Err(message) => anyhow::bail!("Configuration error: {message}"),
    }
}

/// The procflow home directory (created on demand).
pub fn home_dir() -> Result<PathBuf> {
    let home = config()?.home.clone();
    std::fs::create_dir_all(&home)
        .with_context(|| format!("Failed to create home directory: {}", home.display()))?;
    Ok(home)
}

/// Directory holding deployed definition files.
pub fn definitions_dir() -> Result<PathBuf> {
    let dir = home_dir()?.join("definitions");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create definitions directory: {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_path_wins() {
        let base = Path::new("/tmp/.procflow");
        assert_eq!(
            resolve_path(base, "/var/data"),
            PathBuf::from("/var/data")
        );
    }

    #[test]
    fn test_config_file_schema() {
        let config: ConfigFile = serde_yaml::from_str(
            r#"
version: "1"
paths:
  home: state
"#,
        )
        .unwrap();
        assert_eq!(config.paths.home.as_deref(), Some("state"));
    }
}
