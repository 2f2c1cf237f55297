// Config selector join: given a resource, find every ConfigResource whose
// selector matches it, and merge their `spec.data` left to right.

use serde_json::{Map, Value};

use crate::model::{ConfigResource, ConfigSelector, ResourceMetadata};

fn selector_kind_matches(selector_kind: &Option<String>, resource_kind: &str) -> bool {
    selector_kind
        .as_deref()
        .map(|k| k == resource_kind)
        .unwrap_or(true)
}

/// Does this config's selector match the given resource?
pub fn matches(config: &ConfigResource, resource_kind: &str, resource_metadata: &ResourceMetadata) -> bool {
    match &config.spec.selector {
        None => false,
        Some(ConfigSelector::Name { value, kind }) => {
            selector_kind_matches(kind, resource_kind) && value == &resource_metadata.name
        }
        Some(ConfigSelector::Annotation { value, kind }) => {
            selector_kind_matches(kind, resource_kind)
                && value
                    .iter()
                    .all(|(k, v)| resource_metadata.annotations.get(k) == Some(v))
        }
    }
}

/// Merge every matching config's `spec.data`, last write wins in
/// declaration order (`configs` is assumed to already be in that order).
pub fn merge_configs<'a>(
    configs: impl IntoIterator<Item = &'a ConfigResource>,
    resource_kind: &str,
    resource_metadata: &ResourceMetadata,
) -> Map<String, Value> {
    let mut merged = Map::new();
    for config in configs {
        if matches(config, resource_kind, resource_metadata) {
            for (k, v) in &config.spec.data {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConfigSpec;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn config(selector: Option<ConfigSelector>, data: &[(&str, Value)]) -> ConfigResource {
        ConfigResource {
            doc_id: Uuid::now_v7(),
            metadata: ResourceMetadata::new("cfg"),
            spec: ConfigSpec {
                selector,
                data: data.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            },
        }
    }

    #[test]
    fn name_selector_matches_by_metadata_name() {
        let target = ResourceMetadata::new("my-workflow");
        let cfg = config(
            Some(ConfigSelector::Name {
                value: "my-workflow".to_string(),
                kind: Some("workflow".to_string()),
            }),
            &[("a", Value::from(1))],
        );
        assert!(matches(&cfg, "workflow", &target));
        assert!(!matches(&cfg, "trigger_rule", &target));
    }

    #[test]
    fn annotation_selector_requires_subset() {
        let mut target = ResourceMetadata::new("wf");
        target.annotations = HashMap::from([("team".to_string(), "data".to_string())]);
        let cfg = config(
            Some(ConfigSelector::Annotation {
                value: HashMap::from([("team".to_string(), "data".to_string())]),
                kind: None,
            }),
            &[("x", Value::from(2))],
        );
        assert!(matches(&cfg, "workflow", &target));
    }

    #[test]
    fn merge_is_last_write_wins_in_order() {
        let target = ResourceMetadata::new("wf");
        let selector = Some(ConfigSelector::Name {
            value: "wf".to_string(),
            kind: None,
        });
        let first = config(selector.clone(), &[("a", Value::from(1))]);
        let second = config(selector, &[("a", Value::from(2))]);
        let merged = merge_configs([&first, &second], "workflow", &target);
        assert_eq!(merged.get("a"), Some(&Value::from(2)));
    }
}
