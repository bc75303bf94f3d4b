use crate::domain::errors::{ProError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/pro/client.yaml";
pub const DEFAULT_DATA_DIR: &str = "/var/lib/pro-client";

/// Environment overrides recognized by the client. Whatever is in effect is
/// echoed back in `data.meta.environment_vars` of every response, so bug
/// reports carry the exact invocation environment.
pub const RECOGNIZED_ENV_VARS: &[&str] = &[
    "PRO_CONFIG_FILE",
    "PRO_DATA_DIR",
    "PRO_ALLOW_BETA",
    "PRO_ALLOW_NON_ROOT",
    "PRO_LOG_LEVEL",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub allow_beta: bool,
    pub allow_non_root: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_level: String,
    /// Package manager front-end. `null` skips external invocation and only
    /// records the install in the local package state (air-gapped hosts).
    pub apt_cmd: Option<String>,
    /// External tool used by tool-backed services. Same `null` semantics.
    pub livepatch_cmd: Option<String>,
    pub features: Features,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            log_level: "warn".to_string(),
            apt_cmd: Some("apt-get".to_string()),
            livepatch_cmd: Some("canonical-livepatch".to_string()),
            features: Features::default(),
        }
    }
}

impl Config {
    /// Load the config file (if present) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("PRO_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut cfg = Self::read_file(&path)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(ProError::Io)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("PRO_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if env_flag("PRO_ALLOW_BETA") {
            self.features.allow_beta = true;
        }
        if env_flag("PRO_ALLOW_NON_ROOT") {
            self.features.allow_non_root = true;
        }
        if let Ok(level) = std::env::var("PRO_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Name/value pairs of recognized overrides currently set, sorted by name.
    pub fn environment_overrides() -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = RECOGNIZED_ENV_VARS
            .iter()
            .filter_map(|name| {
                std::env::var(name)
                    .ok()
                    .map(|value| (name.to_string(), value))
            })
            .collect();
        vars.sort();
        vars
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_a_config_file() {
        let cfg = Config::default();
        assert_eq!(cfg.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(cfg.apt_cmd.as_deref(), Some("apt-get"));
        assert!(!cfg.features.allow_beta);
    }

    #[test]
    fn explicit_null_disables_external_commands() {
        let cfg: Config = serde_yaml::from_str("apt_cmd: null\nlivepatch_cmd: null\n").unwrap();
        assert_eq!(cfg.apt_cmd, None);
        assert_eq!(cfg.livepatch_cmd, None);
        // untouched fields keep their defaults
        assert_eq!(cfg.log_level, "warn");
    }
}
