//! Deep merge of layered configuration values.
//!
//! Configuration comes from several YAML files, and step parameters come
//! from configuration defaults overlaid with `--param` flags. Both use the
//! same rules:
//!
//! - Mappings are merged recursively
//! - Sequences are replaced entirely
//! - A null in the overlay deletes the key from the base
//! - Scalars in the overlay replace the base

use serde_yaml::Value;

/// Deep merge two YAML values, `overlay` winning at every conflict.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut result = base_map.clone();
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    result.remove(key);
                } else if let Some(base_value) = base_map.get(key) {
                    result.insert(key.clone(), deep_merge(base_value, overlay_value));
                } else {
                    result.insert(key.clone(), overlay_value.clone());
                }
            }
            Value::Mapping(result)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Merge configuration layers in order (later overrides earlier).
///
/// Empty files parse to null and are skipped rather than wiping the result.
pub fn merge_configs(configs: &[Value]) -> Value {
    configs
        .iter()
        .filter(|c| !c.is_null())
        .fold(Value::Mapping(Default::default()), |acc, config| {
            deep_merge(&acc, config)
        })
}

/// Deep merge two JSON parameter objects, `overlay` winning.
pub fn merge_parameters(base: &serde_json::Value, overlay: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match (base, overlay) {
        (Json::Object(base_map), Json::Object(overlay_map)) => {
            let mut result = base_map.clone();
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    result.remove(key);
                } else if let Some(base_value) = base_map.get(key) {
                    result.insert(key.clone(), merge_parameters(base_value, overlay_value));
                } else {
                    result.insert(key.clone(), overlay_value.clone());
                }
            }
            Json::Object(result)
        }
        (base, Json::Null) => base.clone(),
        (_, overlay) => overlay.clone(),
    }
}
