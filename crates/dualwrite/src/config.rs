//! Per-resource-type mode assignment.
//!
//! The mode of each resource type comes from outside the controller: a
//! YAML/JSON document, optionally overridden by environment variables
//! (`DUALWRITE_MODE` for the default, `DUALWRITE_MODE_<TYPE>` per type).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use dualwrite_core::StorageAdapter;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{DualWriter, InvalidMode, Mode};

pub const ENV_DEFAULT_MODE: &str = "DUALWRITE_MODE";
pub const ENV_MODE_PREFIX: &str = "DUALWRITE_MODE_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading mode config {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("parsing mode config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{var}: {source}")]
    Env { var: String, source: InvalidMode },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModeConfig {
    #[serde(default = "default_mode")]
    pub default: Mode,
    #[serde(default)]
    pub resources: BTreeMap<String, Mode>,
    /// Environment overrides keyed by `env_key(resource)`.
    #[serde(skip)]
    overrides: BTreeMap<String, Mode>,
}

fn default_mode() -> Mode { Mode::One }

impl Default for ModeConfig {
    fn default() -> Self { Self { default: default_mode(), resources: BTreeMap::new(), overrides: BTreeMap::new() } }
}

/// Environment spelling of a resource type: `playlist-items` → `PLAYLIST_ITEMS`.
pub fn env_key(resource: &str) -> String { resource.to_ascii_uppercase().replace(['-', '.'], "_") }

impl ModeConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> { Ok(serde_yaml::from_str(s)?) }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        let cfg = Self::from_yaml_str(&raw)?;
        info!(path = %path.display(), default = cfg.default.number(), resources = cfg.resources.len(), "mode config loaded");
        Ok(cfg)
    }

    pub fn set(&mut self, resource: impl Into<String>, mode: Mode) { self.resources.insert(resource.into(), mode); }

    pub fn mode_for(&self, resource: &str) -> Mode {
        self.overrides
            .get(&env_key(resource))
            .or_else(|| self.resources.get(resource))
            .copied()
            .unwrap_or(self.default)
    }

    /// Apply `DUALWRITE_MODE*` variables from `vars`; others are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (var, value) in vars {
            let parse = |v: &str| v.parse::<Mode>().map_err(|source| ConfigError::Env { var: var.clone(), source });
            if var == ENV_DEFAULT_MODE {
                self.default = parse(&value)?;
            } else if let Some(suffix) = var.strip_prefix(ENV_MODE_PREFIX) {
                if suffix.is_empty() {
                    continue;
                }
                let mode = parse(&value)?;
                self.overrides.insert(suffix.to_string(), mode);
            }
        }
        Ok(())
    }

    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        self.apply_env(std::env::vars())?;
        Ok(self)
    }

    /// Build the controller for `resource` in its configured mode.
    pub fn writer(
        &self,
        resource: &str,
        source: Arc<dyn StorageAdapter>,
        target: Arc<dyn StorageAdapter>,
    ) -> DualWriter {
        DualWriter::new(self.mode_for(resource), source, target).with_resource(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn yaml_with_defaults() {
        let cfg = ModeConfig::from_yaml_str("resources:\n  dashboards: 3\n  folders: 2\n").unwrap();
        assert_eq!(cfg.default, Mode::One);
        assert_eq!(cfg.mode_for("dashboards"), Mode::Three);
        assert_eq!(cfg.mode_for("folders"), Mode::Two);
        assert_eq!(cfg.mode_for("playlists"), Mode::One);
    }

    #[test]
    fn rejects_out_of_range_modes() {
        assert!(ModeConfig::from_yaml_str("default: 7\n").is_err());
        let mut cfg = ModeConfig::default();
        let err = cfg.apply_env(vars(&[("DUALWRITE_MODE_FOLDERS", "0")])).unwrap_err();
        assert!(err.to_string().starts_with("DUALWRITE_MODE_FOLDERS"), "{err}");
    }

    #[test]
    fn env_overrides_file() {
        let mut cfg = ModeConfig::from_yaml_str("default: 2\nresources:\n  playlist-items: 2\n").unwrap();
        cfg.apply_env(vars(&[
            ("DUALWRITE_MODE", "4"),
            ("DUALWRITE_MODE_PLAYLIST_ITEMS", "3"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();
        assert_eq!(cfg.mode_for("playlist-items"), Mode::Three);
        assert_eq!(cfg.mode_for("other"), Mode::Four);
    }

    #[test]
    fn json_is_accepted() {
        let cfg = ModeConfig::from_yaml_str(r#"{"default": 3, "resources": {"a": 4}}"#).unwrap();
        assert_eq!(cfg.mode_for("a"), Mode::Four);
        assert_eq!(cfg.mode_for("b"), Mode::Three);
    }
}
