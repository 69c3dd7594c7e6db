//! Override merge algebra for package manifests.
//!
//! An override patches the manifest of a downloaded package before the resolver reads
//! it. Only [`OVERRIDE_KEYS`] may be patched. Objects merge key by key, scalars and
//! arrays replace, and an explicit `null` deletes the field.
//!
//! [`override_package_config`] returns the delta that actually changed something, so
//! an override that restates what the package already ships is never persisted.

use serde_json::{Map, Value};

use super::PackageConfig;
use crate::core::TrellisError;

/// Manifest keys an override may touch.
pub const OVERRIDE_KEYS: [&str; 8] = [
    "main",
    "map",
    "files",
    "ignore",
    "bin",
    "dependencies",
    "peerDependencies",
    "optionalDependencies",
];

/// Fail with [`TrellisError::DisallowedOverride`] naming the first key outside the allow-list.
pub fn validate_override(value: &Value) -> Result<(), TrellisError> {
    let Value::Object(map) = value else {
        return Err(TrellisError::DisallowedOverride {
            key: "<non-object override>".to_string(),
        });
    };
    match map.keys().find(|k| !OVERRIDE_KEYS.contains(&k.as_str())) {
        Some(key) => Err(TrellisError::DisallowedOverride {
            key: key.clone(),
        }),
        None => Ok(()),
    }
}

/// Apply `patch` to `base`, returning the merged config and the applied delta.
///
/// The delta is `None` when the override changes nothing.
pub fn override_package_config(
    base: &PackageConfig,
    patch: &Value,
) -> Result<(PackageConfig, Option<Value>), TrellisError> {
    validate_override(patch)?;
    let Value::Object(patch) = patch else {
        return Ok((base.clone(), None));
    };

    let Value::Object(mut merged) = serde_json::to_value(base)? else {
        return Err(TrellisError::internal("package config did not serialize to an object"));
    };

    let mut delta = Map::new();
    for (key, value) in patch {
        if let Some(applied) = merge_entry(&mut merged, key, value) {
            delta.insert(key.clone(), applied);
        }
    }

    if delta.is_empty() {
        return Ok((base.clone(), None));
    }
    let config: PackageConfig = serde_json::from_value(Value::Object(merged))?;
    Ok((config, Some(Value::Object(delta))))
}

/// Merge `patch` into `target[key]`, returning what changed.
fn merge_entry(target: &mut Map<String, Value>, key: &str, patch: &Value) -> Option<Value> {
    if patch.is_null() {
        return target.remove(key).map(|_| Value::Null);
    }
    if let (Some(Value::Object(existing)), Value::Object(fields)) = (target.get_mut(key), patch) {
        let mut delta = Map::new();
        for (field, value) in fields {
            if let Some(applied) = merge_entry(existing, field, value) {
                delta.insert(field.clone(), applied);
            }
        }
        return (!delta.is_empty()).then_some(Value::Object(delta));
    }
    if target.get(key) == Some(patch) {
        return None;
    }
    let value = strip_nulls(patch);
    if value.as_object().is_some_and(Map::is_empty) && !target.contains_key(key) {
        return None;
    }
    target.insert(key.to_string(), value.clone());
    Some(value)
}

/// Deleting inside a field that does not exist yet is a no-op.
fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
