//! System config merging
//!
//! Later sources take precedence:
//! 1. /etc/cloud/cloud.cfg (base)
//! 2. /etc/cloud/cloud.cfg.d/*.cfg (sorted alphabetically)
//!
//! Mappings merge recursively; scalars and lists from the overlay replace
//! the base value.

use serde_yaml::Value;
use tracing::debug;

/// Merge two YAML values recursively
pub fn merge_yaml_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        // Both are mappings - merge recursively
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut result = base_map.clone();

            for (key, overlay_value) in overlay_map {
                let merged = match result.get(key) {
                    Some(base_value) => merge_yaml_values(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                result.insert(key.clone(), merged);
            }

            Value::Mapping(result)
        }

        // Overlay is null - keep base value
        (base_value, Value::Null) => base_value.clone(),

        // All other cases - overlay wins
        (_, overlay_value) => overlay_value.clone(),
    }
}

/// Merge documents in order (later documents have higher priority)
pub fn merge_all(values: &[Value]) -> Value {
    values.iter().fold(Value::Null, |merged, value| {
        debug!("Merging system config document");
        merge_yaml_values(&merged, value)
    })
}
