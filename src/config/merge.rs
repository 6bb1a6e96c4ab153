//! Layer merge
//!
//! - Objects: deep-merge by key
//! - Arrays: replace (last wins)
//! - Scalars: override (last wins)

use serde_json::Value;

/// Merge `overlay` onto `base`.
///
/// Null in the overlay overrides, so a layer can clear an inherited value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Merge layers in precedence order (first is base, last wins)
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let result = deep_merge(json!({"timeout_ms": 30000}), json!({"timeout_ms": 5000}));
        assert_eq!(result["timeout_ms"], 5000);
    }

    #[test]
    fn test_sections_merge_by_key() {
        let base = json!({"retry": {"max_retries": 3, "base_delay_ms": 1000}});
        let overlay = json!({"retry": {"max_retries": 5}});
        let result = deep_merge(base, overlay);
        assert_eq!(result["retry"]["max_retries"], 5);
        assert_eq!(result["retry"]["base_delay_ms"], 1000);
    }

    #[test]
    fn test_arrays_replace() {
        let base = json!({"fingerprint": {"ignore_patterns": ["*.map", "*.log", "tmp/**"]}});
        let overlay = json!({"fingerprint": {"ignore_patterns": ["drafts/**"]}});
        let result = deep_merge(base, overlay);
        assert_eq!(result["fingerprint"]["ignore_patterns"], json!(["drafts/**"]));
    }

    #[test]
    fn test_null_clears() {
        let result = deep_merge(json!({"backend": {"region": "eu-west-1"}}), json!({"backend": {"region": null}}));
        assert!(result["backend"]["region"].is_null());
    }

    #[test]
    fn test_layer_precedence() {
        let builtin = json!({"network": "testnet", "storage": {"epochs": 5, "failure_threshold": 0}});
        let host = json!({"storage": {"epochs": 10}});
        let repo = json!({"network": "mainnet"});
        let cli = json!({"storage": {"epochs": 1}});

        let result = merge_layers(vec![builtin, host, repo, cli]);
        assert_eq!(result["network"], "mainnet");
        assert_eq!(result["storage"]["epochs"], 1);
        assert_eq!(result["storage"]["failure_threshold"], 0);
    }
}
