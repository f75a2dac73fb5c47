//! Output stage: write processed envelope payloads to the output directory.
//!
//! Each payload is written to a temporary name and renamed into place so a
//! partially written file is never visible under its final name.

use crate::envelope::{parse_envelope_array, Envelope, EnvelopeError};
use crate::metrics::{record_exception, record_invocation, SharedMetrics};
use crate::stage::{ProcessedResult, StageContext};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Error type for output operations
#[derive(Debug, Error)]
pub enum OutputError {
    /// Envelope parsing or content access failed
    #[error("{0}")]
    Envelope(#[from] EnvelopeError),

    /// Filesystem write failed
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// The terminal stage writing envelope payloads to disk.
pub struct OutputStage {
    output_dir: PathBuf,
    metrics: SharedMetrics,
}

impl OutputStage {
    pub fn new(output_dir: PathBuf, metrics: SharedMetrics) -> Self {
        Self {
            output_dir,
            metrics,
        }
    }

    /// Write every envelope with inline content to the output directory.
    ///
    /// Envelopes without inline content (reference-only) are passed over
    /// with a warning. The result's data is the input array unchanged so a
    /// downstream consumer can still observe what was written.
    pub async fn execute(&self, envelope_array_json: &str, ctx: &StageContext) -> ProcessedResult {
        let started = Instant::now();

        match self.run(envelope_array_json).await {
            Ok((envelopes, written)) => {
                let summary = format!("wrote {} of {} files", written, envelopes.len());
                record_invocation(
                    &self.metrics,
                    "output",
                    envelopes.len() as u64,
                    written as u64,
                    started.elapsed(),
                    &summary,
                )
                .await;
                ProcessedResult::completed(summary, envelopes)
            }
            Err(e) => {
                let summary = format!("output failed: {}", e);
                error!(execution_id = %ctx.execution_id, "{}", summary);
                record_exception(&self.metrics, "output", started.elapsed(), &summary).await;
                ProcessedResult::failed(summary)
            }
        }
    }

    async fn run(&self, envelope_array_json: &str) -> Result<(Vec<Envelope>, usize), OutputError> {
        let envelopes = parse_envelope_array(envelope_array_json)?;

        tokio::fs::create_dir_all(&self.output_dir).await?;

        let mut written = 0usize;
        for envelope in &envelopes {
            let name = envelope.file_name()?;

            let content = match envelope.binary_content() {
                Ok(content) => content,
                Err(EnvelopeError::MissingContent(_)) => {
                    warn!(file = %name, "no inline content, nothing to write");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let target = self.output_dir.join(name);
            atomic_write(&target, &content).await?;
            written += 1;
        }

        Ok((envelopes, written))
    }
}

/// Write bytes to `target` via a temporary sibling file and rename.
///
/// Falls back to copy + remove when rename fails (cross-filesystem mounts).
async fn atomic_write(target: &Path, content: &[u8]) -> Result<(), std::io::Error> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let temp = target.with_file_name(format!(".{}.part-{}", file_name, Uuid::new_v4()));

    tokio::fs::write(&temp, content).await?;

    if tokio::fs::rename(&temp, target).await.is_err() {
        tokio::fs::copy(&temp, target).await?;
        tokio::fs::remove_file(&temp).await?;
    }

    Ok(())
}
