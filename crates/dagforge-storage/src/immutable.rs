// Merge-patch semantics for partial updates, honoring a static per-collection
// list of fields that may be set on insert but never changed afterward (a
// run's `name`/`workflow`/`source`/`started_at`, for instance).

use serde_json::{Map, Value};

/// Fields that `merge_patch` refuses to change once a document exists,
/// keyed by collection name. Unlisted collections have no immutable fields.
fn immutable_fields(collection: &str) -> &'static [&'static str] {
    match collection {
        "run" => &["name", "workflow", "source", "started_at"],
        "workflow" => &["metadata.name"],
        "config" => &["metadata.name"],
        "trigger_rule" => &["metadata.name"],
        _ => &[],
    }
}

/// Applies `patch` onto `existing`, recursing into nested objects (RFC 7396
/// style, but arrays and scalars are replaced wholesale rather than merged).
/// A `patch` field set to `Value::Null` deletes the corresponding key from
/// `existing`. Fields named in `immutable_fields(collection)` are silently
/// kept at their existing value even if the patch tries to change them.
pub fn merge_patch(collection: &str, existing: &Value, patch: &Value) -> Value {
    let protected = immutable_fields(collection);
    merge(existing, patch, protected, "")
}

fn merge(existing: &Value, patch: &Value, protected: &[&str], prefix: &str) -> Value {
    match (existing, patch) {
        (Value::Object(existing_map), Value::Object(patch_map)) => {
            let mut result = existing_map.clone();
            for (key, patch_value) in patch_map {
                let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                if protected.contains(&path.as_str()) {
                    continue;
                }
                match patch_value {
                    Value::Null => {
                        result.remove(key);
                    }
                    Value::Object(_) => {
                        let nested_existing = existing_map.get(key).cloned().unwrap_or(Value::Object(Map::new()));
                        result.insert(key.clone(), merge(&nested_existing, patch_value, protected, &path));
                    }
                    other => {
                        result.insert(key.clone(), other.clone());
                    }
                }
            }
            Value::Object(result)
        }
        (_, patch_value) => patch_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_overwrites_mutable_top_level_fields() {
        let existing = json!({"name": "r1", "workflow": "wf1", "result": null});
        let patch = json!({"result": {"ok": true}});
        let merged = merge_patch("run", &existing, &patch);
        assert_eq!(merged["result"], json!({"ok": true}));
    }

    #[test]
    fn merge_patch_ignores_changes_to_immutable_fields() {
        let existing = json!({"name": "r1", "workflow": "wf1"});
        let patch = json!({"name": "renamed", "workflow": "other"});
        let merged = merge_patch("run", &existing, &patch);
        assert_eq!(merged["name"], json!("r1"));
        assert_eq!(merged["workflow"], json!("wf1"));
    }

    #[test]
    fn merge_patch_null_deletes_a_key() {
        let existing = json!({"name": "r1", "scratch": "x"});
        let patch = json!({"scratch": null});
        let merged = merge_patch("run", &existing, &patch);
        assert!(!merged.as_object().unwrap().contains_key("scratch"));
    }

    #[test]
    fn merge_patch_recurses_into_nested_objects_protecting_dotted_paths() {
        let existing = json!({"metadata": {"name": "wf1", "annotations": {"team": "ml"}}});
        let patch = json!({"metadata": {"name": "renamed", "annotations": {"team": "infra"}}});
        let merged = merge_patch("workflow", &existing, &patch);
        assert_eq!(merged["metadata"]["name"], json!("wf1"));
        assert_eq!(merged["metadata"]["annotations"]["team"], json!("infra"));
    }
}
