//! Audio conversion transform backed by the subprocess transcoding engine.

use crate::envelope::{file_cache_data, Envelope};
use crate::stage::{StageContext, StageSettings};
use crate::transcode::{transcode, TranscodeJob, DEFAULT_TIMEOUT};
use crate::transforms::{Transform, TransformError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Cap on the stderr text carried into an error summary.
const DIAGNOSTIC_LIMIT: usize = 512;

/// Built-in converter for `.wav` audio payloads; output is mp3.
#[derive(Debug, Default)]
pub struct AudioConverter;

#[async_trait]
impl Transform for AudioConverter {
    fn mandatory_extension(&self) -> &str {
        ".wav"
    }

    async fn transform(
        &self,
        envelope: &Envelope,
        settings: &StageSettings,
        ctx: &StageContext,
    ) -> Result<Envelope, TransformError> {
        let name = envelope.file_name()?.to_string();
        let input = envelope.binary_content()?;

        let job = TranscodeJob {
            input,
            conversion_args: settings.conversion_arguments.clone(),
            executable_path: settings.executable_path.clone(),
            timeout: settings
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
        };

        let result = transcode(&job).await;

        if !result.success {
            let reason = if result.timed_out {
                format!(
                    "timed out after {:.1}s ({})",
                    result.elapsed.as_secs_f64(),
                    result.command_line
                )
            } else {
                format!(
                    "exit code {} ({}): {}",
                    result.exit_code,
                    result.command_line,
                    truncate(&result.diagnostic, DIAGNOSTIC_LIMIT)
                )
            };
            return Err(TransformError::Transcode(reason));
        }

        info!(
            execution_id = %ctx.execution_id,
            file = %name,
            elapsed_ms = result.elapsed.as_millis() as u64,
            output_bytes = result.output.len(),
            "audio conversion complete"
        );

        Ok(Envelope::new(file_cache_data(
            &converted_name(&name),
            ".mp3",
            Some("audio/mpeg"),
            &result.output,
        )))
    }
}

/// Replace the claimed extension with `.mp3`, preserving the base name.
fn converted_name(name: &str) -> String {
    let base = name
        .strip_suffix(".wav")
        .or_else(|| name.strip_suffix(".WAV"))
        .unwrap_or(name);
    format!("{}.mp3", base)
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
