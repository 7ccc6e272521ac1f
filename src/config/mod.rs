//! Configuration loading for plateflow.
//!
//! - Schema definitions in [`schema`]
//! - File discovery, loading and environment overrides in [`loader`]
//! - Deep merging in [`merger`]
//!
//! # Example
//!
//! ```
//! use plateflow::config::load_merged_config;
//! use tempfile::TempDir;
//! use std::fs;
//!
//! let temp = TempDir::new().unwrap();
//! let dir = temp.path().join(".plateflow");
//! fs::create_dir_all(&dir).unwrap();
//! fs::write(dir.join("config.yml"), "monitoring:\n  depth: 2\n").unwrap();
//!
//! let config = load_merged_config(temp.path()).unwrap();
//! assert_eq!(config.monitoring.depth, 2);
//! ```
//!
//! # Configuration File Locations
//!
//! Merged in this order, later winning:
//! 1. Workspace config (`.plateflow/config.yml`)
//! 2. Local overrides (`.plateflow/config.local.yml`)
//! 3. `PLATEFLOW_MONITOR_INTERVAL`, `PLATEFLOW_MONITOR_DEPTH`, `PLATEFLOW_STORE`

pub mod loader;
pub mod merger;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_value, load_merged_config, ConfigPaths,
    CONFIG_DIR,
};
pub use merger::{deep_merge, merge_configs, merge_parameters};
pub use schema::{
    EngineSettings, MonitoringSettings, PlateflowConfig, ResourceSettings, RunnerKind,
    StageConfig, StageMode, WorkflowConfig, WorkflowStepConfig, CANONICAL_WORKFLOW,
};
