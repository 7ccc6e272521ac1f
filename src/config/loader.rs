//! Configuration file discovery and loading.

use crate::config::merger::merge_configs;
use crate::config::schema::PlateflowConfig;
use crate::error::{PlateflowError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-workspace configuration directory.
pub const CONFIG_DIR: &str = ".plateflow";

/// Environment variable overriding `monitoring.interval_secs`.
pub const ENV_MONITOR_INTERVAL: &str = "PLATEFLOW_MONITOR_INTERVAL";
/// Environment variable overriding `monitoring.depth`.
pub const ENV_MONITOR_DEPTH: &str = "PLATEFLOW_MONITOR_DEPTH";
/// Environment variable overriding `store_path`.
pub const ENV_STORE: &str = "PLATEFLOW_STORE";

/// Paths to configuration files in merge order (later overrides earlier).
///
/// 1. Workspace config (`.plateflow/config.yml`)
/// 2. Local overrides (`.plateflow/config.local.yml`)
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub project: Option<PathBuf>,
    pub project_local: Option<PathBuf>,
}

impl ConfigPaths {
    /// Discover config files under the given workspace root.
    pub fn discover(root: &Path) -> Self {
        Self {
            project: existing(root.join(CONFIG_DIR).join("config.yml")),
            project_local: existing(root.join(CONFIG_DIR).join("config.local.yml")),
        }
    }

    /// All existing config paths in merge order.
    pub fn all_existing(&self) -> Vec<&PathBuf> {
        self.project.iter().chain(self.project_local.iter()).collect()
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

/// Load a config file as a raw YAML value, for merging.
pub fn load_config_value(path: &Path) -> Result<serde_yaml::Value> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PlateflowError::ConfigNotFound {
                path: path.to_path_buf(),
            }
        } else {
            PlateflowError::Io(e)
        }
    })?;

    serde_yaml::from_str(&content).map_err(|e| PlateflowError::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load and merge all config files of a workspace, then apply environment
/// overrides.
///
/// Missing files are fine; built-in defaults apply.
pub fn load_merged_config(root: &Path) -> Result<PlateflowConfig> {
    let paths = ConfigPaths::discover(root);
    let mut layers = Vec::new();
    for path in paths.all_existing() {
        tracing::debug!("Loading config layer {}", path.display());
        layers.push(load_config_value(path)?);
    }
    let source = root.join(CONFIG_DIR).join("config.yml");
    finish(merge_configs(&layers), &source)
}

/// Load config with an optional explicit file.
///
/// An explicit file is loaded on its own, without the workspace layers.
pub fn load_config(root: &Path, config_override: Option<&Path>) -> Result<PlateflowConfig> {
    match config_override {
        Some(path) => {
            let value = load_config_value(path)?;
            finish(merge_configs(&[value]), path)
        }
        None => load_merged_config(root),
    }
}

fn finish(merged: serde_yaml::Value, source: &Path) -> Result<PlateflowConfig> {
    let mut config: PlateflowConfig =
        serde_yaml::from_value(merged).map_err(|e| PlateflowError::ConfigParse {
            path: source.to_path_buf(),
            message: format!("Failed to parse merged config: {}", e),
        })?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    config
        .resources
        .check()
        .map_err(|message| PlateflowError::ConfigParse {
            path: source.to_path_buf(),
            message,
        })?;

    Ok(config)
}

/// Apply `PLATEFLOW_*` overrides using the given variable lookup.
pub fn apply_env_overrides<F>(config: &mut PlateflowConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(ENV_MONITOR_INTERVAL) {
        config.monitoring.interval_secs = parse_env(ENV_MONITOR_INTERVAL, &raw)?;
    }
    if let Some(raw) = lookup(ENV_MONITOR_DEPTH) {
        config.monitoring.depth = parse_env(ENV_MONITOR_DEPTH, &raw)?;
    }
    if let Some(raw) = lookup(ENV_STORE) {
        if !raw.trim().is_empty() {
            config.store_path = Some(PathBuf::from(raw));
        }
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| PlateflowError::ConfigParse {
            path: PathBuf::from(format!("${}", key)),
            message: format!("expected a non-negative integer, got '{}'", raw),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_layer(root: &Path, name: &str, content: &str) {
        let dir = root.join(CONFIG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn discover_finds_both_layers_in_order() {
        let temp = TempDir::new().unwrap();
        write_layer(temp.path(), "config.yml", "");
        write_layer(temp.path(), "config.local.yml", "");

        let paths = ConfigPaths::discover(temp.path());
        let all = paths.all_existing();

        assert_eq!(all.len(), 2);
        assert!(all[0].ends_with("config.yml"));
        assert!(all[1].ends_with("config.local.yml"));
    }

    #[test]
    fn no_config_files_means_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_merged_config(temp.path()).unwrap();
        assert_eq!(config.monitoring.depth, PlateflowConfig::default().monitoring.depth);
    }

    #[test]
    fn local_layer_overrides_project_layer() {
        let temp = TempDir::new().unwrap();
        write_layer(
            temp.path(),
            "config.yml",
            "monitoring:\n  interval_secs: 30\n  depth: 2\n",
        );
        write_layer(temp.path(), "config.local.yml", "monitoring:\n  interval_secs: 0\n");

        let config = load_merged_config(temp.path()).unwrap();

        assert_eq!(config.monitoring.interval_secs, 0);
        assert_eq!(config.monitoring.depth, 2);
    }

    #[test]
    fn invalid_yaml_reports_path() {
        let temp = TempDir::new().unwrap();
        write_layer(temp.path(), "config.yml", "monitoring: [unclosed");

        let err = load_merged_config(temp.path()).unwrap_err();
        assert!(matches!(err, PlateflowError::ConfigParse { .. }));
    }

    #[test]
    fn zero_cores_rejected() {
        let temp = TempDir::new().unwrap();
        write_layer(temp.path(), "config.yml", "resources:\n  cores: 0\n");

        let err = load_merged_config(temp.path()).unwrap_err();
        assert!(err.to_string().contains("cores"));
    }

    #[test]
    fn explicit_file_is_loaded_alone() {
        let temp = TempDir::new().unwrap();
        write_layer(temp.path(), "config.yml", "monitoring:\n  depth: 5\n");
        let explicit = temp.path().join("other.yml");
        fs::write(&explicit, "engine:\n  max_in_flight: 1\n").unwrap();

        let config = load_config(temp.path(), Some(&explicit)).unwrap();

        assert_eq!(config.engine.max_in_flight, 1);
        assert_eq!(config.monitoring.depth, 1);
    }

    #[test]
    fn explicit_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = load_config(temp.path(), Some(&temp.path().join("nope.yml"))).unwrap_err();
        assert!(matches!(err, PlateflowError::ConfigNotFound { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            (ENV_MONITOR_INTERVAL, "3"),
            (ENV_MONITOR_DEPTH, "0"),
            (ENV_STORE, "/tmp/jobs.yml"),
        ]
        .into_iter()
        .collect();
        let mut config = PlateflowConfig::default();

        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.monitoring.interval_secs, 3);
        assert_eq!(config.monitoring.depth, 0);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/jobs.yml")));
    }

    #[test]
    fn env_override_rejects_garbage() {
        let mut config = PlateflowConfig::default();
        let err = apply_env_overrides(&mut config, |k| {
            (k == ENV_MONITOR_DEPTH).then(|| "-1".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("PLATEFLOW_MONITOR_DEPTH"));
    }
}
