//! Stage executor: the per-stage orchestration loop.
//!
//! An executor parses the incoming envelope array, validates the stage's
//! shape invariant, resolves its transform implementation (once, lazily),
//! transforms envelopes matching the implementation's mandatory extension,
//! passes the rest through unchanged, and reassembles the outgoing array.
//! Every failure is folded into a structured `ProcessedResult`; nothing
//! escapes `execute` as an unhandled fault. Cancelling an invocation is
//! dropping its future; in-flight subprocesses die with it.

use crate::envelope::{parse_envelope_array, Cardinality, Envelope, EnvelopeError};
use crate::metrics::{record_exception, record_invocation, SharedMetrics};
use crate::registry::{resolve_or_default, StageKind};
use crate::transforms::{Transform, TransformError};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Error type for stage execution; converted to a `Failed` result at the
/// public boundary.
#[derive(Debug, Error)]
pub enum StageError {
    /// Envelope parsing or shape validation failed
    #[error("{0}")]
    Envelope(#[from] EnvelopeError),

    /// The stage configuration blob is not usable
    #[error("invalid stage config: {0}")]
    Config(String),

    /// A transform implementation failed
    #[error("{0}")]
    Transform(#[from] TransformError),
}

/// Outcome status of one stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessedStatus {
    Completed,
    Failed,
}

/// Structured outcome of one stage invocation.
///
/// The orchestrator treats every invocation as a value: a failed stage
/// yields a `Failed` result with empty data, never a raised error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedResult {
    pub status: ProcessedStatus,
    pub summary: String,
    pub data: Vec<Envelope>,
}

impl ProcessedResult {
    /// Build a completed result carrying the outgoing envelope array.
    pub fn completed(summary: String, data: Vec<Envelope>) -> Self {
        Self {
            status: ProcessedStatus::Completed,
            summary,
            data,
        }
    }

    /// Build a failed result with empty data.
    pub fn failed(summary: String) -> Self {
        Self {
            status: ProcessedStatus::Failed,
            summary,
            data: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProcessedStatus::Completed
    }
}

/// Per-invocation context passed through the stage chain.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Identity of this processor instance.
    pub processor_id: String,
    /// Correlation id for one pipeline run; tags logs and ledger records.
    pub execution_id: String,
}

impl StageContext {
    /// Create a context with a fresh execution id.
    pub fn new(processor_id: &str) -> Self {
        Self {
            processor_id: processor_id.to_string(),
            execution_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Stage settings extracted from the per-invocation configuration blob.
///
/// The blob is re-read on every invocation; nothing from a previous
/// invocation's configuration is reused except the resolved implementation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageSettings {
    /// Implementation type name; None or empty selects the built-in default.
    pub implementation_type_name: Option<String>,
    /// Conversion arguments for the transcoding stage.
    pub conversion_arguments: Vec<String>,
    /// Explicit transcoder executable path.
    pub executable_path: Option<String>,
    /// Transcode timeout override in seconds.
    pub timeout_secs: Option<u64>,
}

impl StageSettings {
    /// Extract settings from the configuration blob.
    ///
    /// `conversionArguments` is accepted as an array of strings or as one
    /// whitespace-separated string.
    pub fn from_value(config: &Value) -> Result<Self, StageError> {
        let object = config
            .as_object()
            .ok_or_else(|| StageError::Config("expected a JSON object".to_string()))?;

        let implementation_type_name = object
            .get("implementationTypeName")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let conversion_arguments = match object.get("conversionArguments") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => s.split_whitespace().map(String::from).collect(),
            Some(Value::Array(items)) => {
                let mut args = Vec::with_capacity(items.len());
                for item in items {
                    let arg = item.as_str().ok_or_else(|| {
                        StageError::Config(
                            "conversionArguments entries must be strings".to_string(),
                        )
                    })?;
                    args.push(arg.to_string());
                }
                args
            }
            Some(other) => {
                return Err(StageError::Config(format!(
                    "conversionArguments must be a string or array, got {}",
                    other
                )));
            }
        };

        let executable_path = object
            .get("executablePath")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string());

        let timeout_secs = object.get("timeoutSecs").and_then(|v| v.as_u64());

        Ok(Self {
            implementation_type_name,
            conversion_arguments,
            executable_path,
            timeout_secs,
        })
    }
}

/// Executes one pipeline stage over envelope arrays.
///
/// Holds no per-file state; the only thing cached across invocations is the
/// resolved transform implementation. Safe to invoke concurrently.
pub struct StageExecutor {
    kind: StageKind,
    cardinality: Cardinality,
    metrics: SharedMetrics,
    resolved: OnceCell<Arc<dyn Transform>>,
}

impl StageExecutor {
    /// Create an executor for a stage with its declared shape invariant.
    pub fn new(kind: StageKind, cardinality: Cardinality, metrics: SharedMetrics) -> Self {
        Self {
            kind,
            cardinality,
            metrics,
            resolved: OnceCell::new(),
        }
    }

    /// Create an executor with a pre-resolved implementation.
    ///
    /// Bypasses the registry; used when the host composes implementations
    /// directly (and by tests).
    pub fn with_implementation(
        kind: StageKind,
        cardinality: Cardinality,
        metrics: SharedMetrics,
        implementation: Arc<dyn Transform>,
    ) -> Self {
        let resolved = OnceCell::new();
        let _ = resolved.set(implementation);
        Self {
            kind,
            cardinality,
            metrics,
            resolved,
        }
    }

    /// The stage capability this executor serves.
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Execute one stage invocation.
    ///
    /// Never fails loudly: all errors are reported through the returned
    /// `ProcessedResult`, and metrics are recorded exactly once per
    /// invocation on both the success and the failure path.
    pub async fn execute(
        &self,
        envelope_array_json: &str,
        config: &Value,
        ctx: &StageContext,
    ) -> ProcessedResult {
        let started = Instant::now();
        let stage = self.kind.to_string();

        match self.run(envelope_array_json, config, ctx).await {
            Ok((data, processed, transformed)) => {
                let summary = format!("processed {} files, transformed {}", processed, transformed);
                if transformed == 0 {
                    warn!(
                        stage = %stage,
                        execution_id = %ctx.execution_id,
                        "no files matched the mandatory extension; pass-through only"
                    );
                }
                record_invocation(
                    &self.metrics,
                    &stage,
                    processed as u64,
                    transformed as u64,
                    started.elapsed(),
                    &summary,
                )
                .await;
                ProcessedResult::completed(summary, data)
            }
            Err(e) => {
                let summary = format!("stage failed: {}", e);
                error!(
                    stage = %stage,
                    execution_id = %ctx.execution_id,
                    "{}", summary
                );
                record_exception(&self.metrics, &stage, started.elapsed(), &summary).await;
                ProcessedResult::failed(summary)
            }
        }
    }

    /// The fallible inner body of `execute`.
    async fn run(
        &self,
        envelope_array_json: &str,
        config: &Value,
        ctx: &StageContext,
    ) -> Result<(Vec<Envelope>, usize, usize), StageError> {
        let envelopes = parse_envelope_array(envelope_array_json)?;
        self.cardinality.check(&envelopes)?;

        let settings = StageSettings::from_value(config)?;
        let implementation = self.implementation(&settings);
        let extension = implementation.mandatory_extension().to_string();

        let mut data = Vec::with_capacity(envelopes.len());
        let mut transformed = 0usize;

        for envelope in &envelopes {
            if envelope.matches_extension(&extension)? {
                let replacement = implementation.transform(envelope, &settings, ctx).await?;
                data.push(replacement);
                transformed += 1;
            } else {
                data.push(envelope.pass_through());
            }
        }

        Ok((data, envelopes.len(), transformed))
    }

    /// Resolve the transform implementation, memoized for the lifetime of
    /// this executor.
    fn implementation(&self, settings: &StageSettings) -> Arc<dyn Transform> {
        self.resolved
            .get_or_init(|| {
                resolve_or_default(settings.implementation_type_name.as_deref(), self.kind)
            })
            .clone()
    }
}
