//! Metadata enrichment transform.
//!
//! Stamps metadata sidecars with processing provenance: which processor
//! handled the file, under which execution, when, and a digest of the
//! content that was enriched.

use crate::envelope::{file_cache_data, Envelope};
use crate::hashing::sha256_hex;
use crate::stage::{StageContext, StageSettings};
use crate::transforms::{Transform, TransformError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Built-in enricher for `.json` metadata sidecars.
#[derive(Debug, Default)]
pub struct MetadataEnricher;

#[async_trait]
impl Transform for MetadataEnricher {
    fn mandatory_extension(&self) -> &str {
        ".json"
    }

    async fn transform(
        &self,
        envelope: &Envelope,
        _settings: &StageSettings,
        ctx: &StageContext,
    ) -> Result<Envelope, TransformError> {
        let name = envelope.file_name()?.to_string();
        let raw = envelope.binary_content()?;

        let mut value: Value = serde_json::from_slice(&raw)
            .map_err(|e| TransformError::InvalidMetadata(e.to_string()))?;

        let object = value.as_object_mut().ok_or_else(|| {
            TransformError::InvalidMetadata("metadata root must be a JSON object".to_string())
        })?;

        object.insert(
            "provenance".to_string(),
            json!({
                "processorId": ctx.processor_id,
                "executionId": ctx.execution_id,
                "enrichedAtMs": current_timestamp_ms(),
                "contentDigest": format!("sha256:{}", sha256_hex(&raw)),
            }),
        );

        let enriched = serde_json::to_vec_pretty(&value)
            .map_err(|e| TransformError::InvalidMetadata(e.to_string()))?;

        Ok(Envelope::new(file_cache_data(
            &name,
            ".json",
            Some("application/json"),
            &enriched,
        )))
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
