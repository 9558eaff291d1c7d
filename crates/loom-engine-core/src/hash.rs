//! Canonical JSON and the recording fingerprint.
//!
//! The recorder keys entries by a SHA-256 digest over a canonical JSON
//! rendering of the request: object keys are sorted recursively, arrays
//! keep their order, numbers use their serde_json representation. The same
//! logical request must hash byte-identically across processes and runs;
//! that property is what makes playback deterministic.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Render `value` in canonical form: recursively key-sorted objects,
/// order-preserving arrays.
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).expect("string serialization"),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let mut tree = BTreeMap::new();
            for (k, v) in map {
                tree.insert(k, to_canonical_json(v));
            }
            let items: Vec<String> = tree
                .into_iter()
                .map(|(k, v)| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(&k).expect("key serialization"),
                        v
                    )
                })
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// SHA-256 hex digest of the canonical form.
pub fn canonical_digest(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(to_canonical_json(value).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The identity of an agent request for recording purposes.
#[derive(Debug, Clone)]
pub struct RequestFingerprint<'a> {
    pub provider: &'a str,
    pub prompt: &'a str,
    /// Tool names; sorted before hashing so registration order is
    /// irrelevant.
    pub tools: Vec<&'a str>,
    /// Canonical schema form, when the agent declares one.
    pub output_schema: Option<Value>,
    /// Canonicalised provider configuration.
    pub config: Option<Value>,
}

impl RequestFingerprint<'_> {
    /// Stable hash of the request. Equal inputs produce byte-identical
    /// hashes across runs.
    pub fn hash(&self) -> String {
        let mut tools: Vec<&str> = self.tools.clone();
        tools.sort_unstable();
        let identity = json!({
            "provider": self.provider,
            "prompt": self.prompt,
            "tools": tools,
            "output_schema": self.output_schema.clone().unwrap_or(Value::Null),
            "config": self.config.clone().unwrap_or(Value::Null),
        });
        canonical_digest(&identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_sorts_keys_recursively() {
        let a = json!({"b": {"y": 2, "x": 1}, "a": [3, 1]});
        let b = json!({"a": [3, 1], "b": {"x": 1, "y": 2}});
        assert_eq!(to_canonical_json(&a), to_canonical_json(&b));
        assert_eq!(to_canonical_json(&a), r#"{"a":[3,1],"b":{"x":1,"y":2}}"#);
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        assert_ne!(to_canonical_json(&a), to_canonical_json(&b));
    }

    #[test]
    fn fingerprint_ignores_tool_registration_order() {
        let base = RequestFingerprint {
            provider: "scripted",
            prompt: "2+2",
            tools: vec!["calc", "search"],
            output_schema: None,
            config: None,
        };
        let swapped = RequestFingerprint {
            tools: vec!["search", "calc"],
            ..base.clone()
        };
        assert_eq!(base.hash(), swapped.hash());
    }

    #[test]
    fn fingerprint_is_sensitive_to_prompt_and_provider() {
        let base = RequestFingerprint {
            provider: "scripted",
            prompt: "2+2",
            tools: vec![],
            output_schema: None,
            config: None,
        };
        let other_prompt = RequestFingerprint {
            prompt: "3+3",
            ..base.clone()
        };
        let other_provider = RequestFingerprint {
            provider: "other",
            ..base.clone()
        };
        assert_ne!(base.hash(), other_prompt.hash());
        assert_ne!(base.hash(), other_provider.hash());
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let fp = RequestFingerprint {
            provider: "scripted",
            prompt: "2+2",
            tools: vec!["calc"],
            output_schema: Some(json!({"type": "object"})),
            config: Some(json!({"temperature": 0})),
        };
        assert_eq!(fp.hash(), fp.hash());
        assert_eq!(fp.hash().len(), 64);
    }
}
