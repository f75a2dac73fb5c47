//! Discovery stage: scan source roots and register files exactly once.
//!
//! Discovery walks the configured source directories, filters candidates by
//! extension and size, waits out a stability window so half-written files
//! are never ingested, and asks the registration ledger to admit each
//! candidate. Admitted files become envelopes with inline content; files
//! another pass already claimed are silently skipped. Ledger storage
//! failure fails the whole invocation — discovery cannot safely proceed
//! without the admission guarantee.

use crate::envelope::{file_cache_data, Envelope};
use crate::ledger::{file_identity, LedgerError, RegistrationLedger};
use crate::metrics::{record_exception, record_invocation, SharedMetrics};
use crate::stage::{ProcessedResult, StageContext};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Error type for discovery operations
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Ledger round-trip failed; fatal to the invocation
    #[error("{0}")]
    Ledger(#[from] LedgerError),
}

/// A candidate file found during source scanning.
#[derive(Debug, Clone)]
pub struct ScanCandidate {
    /// Full path to the file.
    pub path: PathBuf,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
    /// Last modified time of the file.
    pub modified_time: SystemTime,
}

/// Result of a stability check on a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    /// File size remained unchanged during the stability window.
    Stable,
    /// File size changed during the stability window.
    Unstable {
        initial_size: u64,
        current_size: u64,
    },
}

/// Checks if a file has one of the configured extensions (case-insensitive).
pub fn is_candidate_file(path: &Path, extensions: &[String]) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_lowercase(),
        None => return false,
    };
    extensions
        .iter()
        .any(|ext| name.ends_with(&ext.to_lowercase()))
}

/// Scans the given source roots for candidate files.
///
/// Recursively walks each root, skipping hidden directories, filtering files
/// by the configured extensions, and capturing size and modified time for
/// stability checking.
pub fn scan_sources(roots: &[PathBuf], extensions: &[String]) -> Vec<ScanCandidate> {
    use walkdir::WalkDir;

    let mut candidates = Vec::new();

    for root in roots {
        if !root.exists() {
            continue;
        }

        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            if entry.file_type().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    // Allow the root directory even if it starts with '.'
                    if name.starts_with('.') && entry.depth() > 0 {
                        return false;
                    }
                }
            }
            true
        });

        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();

            if !entry.file_type().is_file() {
                continue;
            }

            if !is_candidate_file(path, extensions) {
                continue;
            }

            if let Ok(metadata) = entry.metadata() {
                candidates.push(ScanCandidate {
                    path: path.to_path_buf(),
                    size_bytes: metadata.len(),
                    modified_time: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }
    }

    candidates
}

/// Check if a file is stable by comparing its size before and after a wait.
pub async fn check_stability(
    path: &Path,
    initial_size: u64,
    window: Duration,
) -> Result<StabilityResult, std::io::Error> {
    if !window.is_zero() {
        tokio::time::sleep(window).await;
    }

    let metadata = tokio::fs::metadata(path).await?;
    Ok(compare_sizes(initial_size, metadata.len()))
}

/// Compare two file sizes and return the appropriate StabilityResult.
///
/// This is a pure function extracted for property testing.
#[inline]
pub fn compare_sizes(initial_size: u64, current_size: u64) -> StabilityResult {
    if initial_size == current_size {
        StabilityResult::Stable
    } else {
        StabilityResult::Unstable {
            initial_size,
            current_size,
        }
    }
}

/// MIME hint for the extensions this pipeline owns.
fn mime_hint(extension: &str) -> Option<&'static str> {
    match extension {
        ".wav" => Some("audio/wav"),
        ".mp3" => Some("audio/mpeg"),
        ".json" => Some("application/json"),
        ".xml" => Some("application/xml"),
        _ => None,
    }
}

/// The discovery/registration stage.
pub struct DiscoveryStage {
    extensions: Vec<String>,
    min_bytes: u64,
    stability_window: Duration,
    metrics: SharedMetrics,
}

impl DiscoveryStage {
    pub fn new(
        extensions: Vec<String>,
        min_bytes: u64,
        stability_window: Duration,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            extensions,
            min_bytes,
            stability_window,
            metrics,
        }
    }

    /// Run one discovery pass over the source roots.
    ///
    /// Never fails loudly; the outcome is always a `ProcessedResult`. The
    /// data array holds one envelope per newly admitted file, in scan order.
    pub async fn execute(
        &self,
        roots: &[PathBuf],
        ledger: &dyn RegistrationLedger,
        ctx: &StageContext,
    ) -> ProcessedResult {
        let started = Instant::now();

        match self.run(roots, ledger, ctx).await {
            Ok((envelopes, scanned)) => {
                let registered = envelopes.len();
                let summary = format!("scanned {} candidates, registered {}", scanned, registered);
                record_invocation(
                    &self.metrics,
                    "discovery",
                    scanned as u64,
                    registered as u64,
                    started.elapsed(),
                    &summary,
                )
                .await;
                {
                    let mut snapshot = self.metrics.write().await;
                    snapshot.files_registered += registered as u64;
                }
                ProcessedResult::completed(summary, envelopes)
            }
            Err(e) => {
                let summary = format!("discovery failed: {}", e);
                error!(execution_id = %ctx.execution_id, "{}", summary);
                record_exception(&self.metrics, "discovery", started.elapsed(), &summary).await;
                ProcessedResult::failed(summary)
            }
        }
    }

    async fn run(
        &self,
        roots: &[PathBuf],
        ledger: &dyn RegistrationLedger,
        ctx: &StageContext,
    ) -> Result<(Vec<Envelope>, usize), DiscoveryError> {
        let candidates = scan_sources(roots, &self.extensions);
        let scanned = candidates.len();
        let mut envelopes = Vec::new();

        for candidate in candidates {
            if candidate.size_bytes < self.min_bytes {
                debug!(
                    path = %candidate.path.display(),
                    size_bytes = candidate.size_bytes,
                    "skipping file below minimum size"
                );
                continue;
            }

            match check_stability(&candidate.path, candidate.size_bytes, self.stability_window)
                .await
            {
                Ok(StabilityResult::Stable) => {}
                Ok(StabilityResult::Unstable {
                    initial_size,
                    current_size,
                }) => {
                    debug!(
                        path = %candidate.path.display(),
                        initial_size,
                        current_size,
                        "skipping unstable file, will retry next scan"
                    );
                    continue;
                }
                Err(e) => {
                    // The file vanished between scan and check; not an error.
                    warn!(path = %candidate.path.display(), "stability check failed: {}", e);
                    continue;
                }
            }

            let content = match tokio::fs::read(&candidate.path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %candidate.path.display(), "failed to read file: {}", e);
                    continue;
                }
            };

            // Admission is the last step: a file we could not read is left
            // unclaimed for the next pass.
            let identity = file_identity(&candidate.path);
            if !ledger
                .try_admit(&identity, &ctx.processor_id, &ctx.execution_id)
                .await?
            {
                debug!(
                    path = %candidate.path.display(),
                    "already registered, skipping"
                );
                continue;
            }

            let name = candidate
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let extension = name
                .rfind('.')
                .map(|idx| name[idx..].to_lowercase())
                .unwrap_or_default();

            envelopes.push(Envelope::new(file_cache_data(
                &name,
                &extension,
                mime_hint(&extension),
                &content,
            )));
        }

        Ok((envelopes, scanned))
    }
}
