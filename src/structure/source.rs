use std::fs;
use std::path::Path;

use super::StructuralSnapshot;
use crate::error::{PlateflowError, Result};
use crate::workspace::write_atomic;

/// Read a snapshot from a YAML file.
pub fn load_snapshot(path: &Path) -> Result<StructuralSnapshot> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PlateflowError::NotFound {
                what: format!("structure file {}", path.display()),
            }
        } else {
            PlateflowError::Io(e)
        }
    })?;

    let snapshot: StructuralSnapshot =
        serde_yaml::from_str(&content).map_err(|e| PlateflowError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    tracing::debug!(
        "Loaded structure of experiment {} ({} acquisitions, {} images)",
        snapshot.experiment_id,
        snapshot.acquisitions().len(),
        snapshot.image_count()
    );
    Ok(snapshot)
}

/// Write a snapshot as YAML, replacing the file atomically.
pub fn save_snapshot(path: &Path, snapshot: &StructuralSnapshot) -> Result<()> {
    let content = serde_yaml::to_string(snapshot)
        .map_err(|e| anyhow::anyhow!("Failed to serialize structure: {}", e))?;
    write_atomic(path, content.as_bytes())
}
