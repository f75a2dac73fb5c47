//! Metadata standardization transform.
//!
//! Canonicalizes metadata sidecar files so every downstream stage sees the
//! same byte representation for equivalent metadata: UTF-8 BOM stripped,
//! object keys sorted, one stable serialization.

use crate::envelope::{file_cache_data, Envelope};
use crate::stage::{StageContext, StageSettings};
use crate::transforms::{Transform, TransformError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Built-in standardizer for `.json` metadata sidecars.
#[derive(Debug, Default)]
pub struct MetadataStandardizer;

#[async_trait]
impl Transform for MetadataStandardizer {
    fn mandatory_extension(&self) -> &str {
        ".json"
    }

    async fn transform(
        &self,
        envelope: &Envelope,
        _settings: &StageSettings,
        _ctx: &StageContext,
    ) -> Result<Envelope, TransformError> {
        let name = envelope.file_name()?.to_string();
        let raw = envelope.binary_content()?;

        let text = std::str::from_utf8(strip_bom(&raw))
            .map_err(|e| TransformError::InvalidMetadata(e.to_string()))?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| TransformError::InvalidMetadata(e.to_string()))?;

        let mut canonical = to_canonical_json(&value);
        canonical.push('\n');

        Ok(Envelope::new(file_cache_data(
            &name,
            ".json",
            Some("application/json"),
            canonical.as_bytes(),
        )))
    }
}

/// Strip a leading UTF-8 byte order mark, if present.
fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes)
}

/// Serialize a JSON value with object keys sorted, no insignificant
/// whitespace. Arrays keep their order; only object key order is normalized.
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_default(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let mut sorted = BTreeMap::new();
            for (key, item) in map {
                sorted.insert(key, to_canonical_json(item));
            }
            let rendered: Vec<String> = sorted
                .into_iter()
                .map(|(key, item)| {
                    format!("{}:{}", serde_json::to_string(key).unwrap_or_default(), item)
                })
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::file_cache_data;
    use serde_json::json;

    fn envelope_with(name: &str, bytes: &[u8]) -> Envelope {
        Envelope::new(file_cache_data(name, ".json", None, bytes))
    }

    #[tokio::test]
    async fn test_standardize_sorts_keys() {
        let envelope = envelope_with("meta.json", br#"{"z": 1, "a": {"c": 2, "b": 3}}"#);
        let settings = StageSettings::default();
        let ctx = StageContext::new("test-proc");

        let out = MetadataStandardizer
            .transform(&envelope, &settings, &ctx)
            .await
            .expect("standardize should succeed");

        let content = out.binary_content().unwrap();
        assert_eq!(
            String::from_utf8(content).unwrap(),
            "{\"a\":{\"b\":3,\"c\":2},\"z\":1}\n"
        );
        assert_eq!(out.file_name().unwrap(), "meta.json");
        assert!(out.extracted_file_cache_data_object.is_empty());
    }

    #[tokio::test]
    async fn test_standardize_strips_bom() {
        let mut bytes = b"\xef\xbb\xbf".to_vec();
        bytes.extend_from_slice(br#"{"k": true}"#);
        let envelope = envelope_with("meta.json", &bytes);

        let out = MetadataStandardizer
            .transform(&envelope, &StageSettings::default(), &StageContext::new("p"))
            .await
            .unwrap();

        assert_eq!(out.binary_content().unwrap(), b"{\"k\":true}\n");
    }

    #[tokio::test]
    async fn test_standardize_rejects_invalid_json() {
        let envelope = envelope_with("meta.json", b"not json {{{");

        let err = MetadataStandardizer
            .transform(&envelope, &StageSettings::default(), &StageContext::new("p"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransformError::InvalidMetadata(_)));
    }

    #[test]
    fn test_canonical_json_idempotent() {
        let value = json!({"b": [3, 1, 2], "a": {"y": null, "x": "s"}});
        let once = to_canonical_json(&value);
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        assert_eq!(to_canonical_json(&reparsed), once);
    }

    #[test]
    fn test_canonical_json_preserves_array_order() {
        let value = json!([3, 1, 2]);
        assert_eq!(to_canonical_json(&value), "[3,1,2]");
    }

    #[test]
    fn test_mandatory_extension() {
        assert_eq!(MetadataStandardizer.mandatory_extension(), ".json");
    }
}
