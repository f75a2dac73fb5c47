//! Pipeline runner: the host loop driving the stage chain.
//!
//! One pass runs discovery, then the standardize → enrich → convert chain,
//! then output, handing the envelope array between stages as JSON. A failed
//! stage stops the pass; the failure is reported in the batch report, never
//! raised. Watch mode repeats passes on the configured scan interval.

use crate::discovery::DiscoveryStage;
use crate::envelope::Cardinality;
use crate::ledger::{FileLedger, RegistrationLedger};
use crate::metrics::{collect_system_metrics, new_shared_metrics, SharedMetrics};
use crate::metrics_server::run_metrics_server;
use crate::output::OutputStage;
use crate::registry::StageKind;
use crate::stage::{ProcessedResult, StageContext, StageExecutor};
use mediaflow_config::Config;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Error type for runner operations
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Envelope array could not be re-serialized between stages
    #[error("failed to serialize envelope array: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of one pipeline pass.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Correlation id shared by every stage of the pass.
    pub execution_id: String,
    /// Files newly admitted by this pass.
    pub registered: usize,
    /// (stage, summary) in execution order, including the failing stage.
    pub stage_summaries: Vec<(String, String)>,
    /// True iff every executed stage completed.
    pub completed: bool,
}

/// Owns the configured stage chain and its shared state.
pub struct PipelineRunner {
    config: Config,
    metrics: SharedMetrics,
    ledger: Arc<dyn RegistrationLedger>,
    discovery: DiscoveryStage,
    standardize: StageExecutor,
    enrich: StageExecutor,
    convert: StageExecutor,
    output: OutputStage,
}

impl PipelineRunner {
    /// Build a runner with the durable file-backed ledger from the config.
    pub fn new(config: Config) -> Self {
        let ledger = Arc::new(FileLedger::new(config.state.ledger_dir.clone()));
        Self::with_ledger(config, ledger)
    }

    /// Build a runner over an explicit ledger implementation.
    pub fn with_ledger(config: Config, ledger: Arc<dyn RegistrationLedger>) -> Self {
        let metrics = new_shared_metrics();

        let discovery = DiscoveryStage::new(
            config.source.extensions.clone(),
            config.source.min_bytes,
            Duration::from_secs(config.source.stability_window_secs),
            metrics.clone(),
        );
        let standardize =
            StageExecutor::new(StageKind::Standardize, Cardinality::Any, metrics.clone());
        let enrich = StageExecutor::new(StageKind::Enrich, Cardinality::Any, metrics.clone());
        let convert = StageExecutor::new(StageKind::Convert, Cardinality::Any, metrics.clone());
        let output = OutputStage::new(config.state.output_dir.clone(), metrics.clone());

        Self {
            config,
            metrics,
            ledger,
            discovery,
            standardize,
            enrich,
            convert,
            output,
        }
    }

    /// Get the shared metrics
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// The per-invocation configuration blob for a transform stage.
    fn stage_config(&self, kind: StageKind) -> Value {
        match kind {
            StageKind::Standardize => json!({
                "implementationTypeName": self.config.stages.standardize,
            }),
            StageKind::Enrich => json!({
                "implementationTypeName": self.config.stages.enrich,
            }),
            StageKind::Convert => json!({
                "implementationTypeName": self.config.stages.convert,
                "conversionArguments": self.config.transcode.conversion_args,
                "executablePath": self.config.transcode.executable_path,
                "timeoutSecs": self.config.transcode.timeout_secs,
            }),
        }
    }

    /// Run one full pipeline pass.
    pub async fn run_once(&self) -> Result<BatchReport, RunnerError> {
        let ctx = StageContext::new(&self.config.state.processor_id);
        let mut report = BatchReport {
            execution_id: ctx.execution_id.clone(),
            registered: 0,
            stage_summaries: Vec::new(),
            completed: false,
        };

        info!(execution_id = %ctx.execution_id, "pipeline pass starting");

        let discovered = self
            .discovery
            .execute(&self.config.source.roots, self.ledger.as_ref(), &ctx)
            .await;
        report
            .stage_summaries
            .push(("discovery".to_string(), discovered.summary.clone()));

        if !discovered.is_completed() {
            self.record_batch_failed().await;
            return Ok(report);
        }

        report.registered = discovered.data.len();
        if discovered.data.is_empty() {
            info!(execution_id = %ctx.execution_id, "nothing new to process");
            report.completed = true;
            return Ok(report);
        }

        let mut envelope_json = serde_json::to_string(&discovered.data)?;

        let chain = [
            (StageKind::Standardize, &self.standardize),
            (StageKind::Enrich, &self.enrich),
            (StageKind::Convert, &self.convert),
        ];

        for (kind, executor) in chain {
            let config = self.stage_config(kind);
            let result = executor.execute(&envelope_json, &config, &ctx).await;
            report
                .stage_summaries
                .push((kind.to_string(), result.summary.clone()));

            if !result.is_completed() {
                error!(
                    execution_id = %ctx.execution_id,
                    stage = %kind,
                    "pipeline pass aborted"
                );
                self.record_batch_failed().await;
                return Ok(report);
            }

            envelope_json = serde_json::to_string(&result.data)?;
        }

        let written: ProcessedResult = self.output.execute(&envelope_json, &ctx).await;
        report
            .stage_summaries
            .push(("output".to_string(), written.summary.clone()));

        if !written.is_completed() {
            self.record_batch_failed().await;
            return Ok(report);
        }

        {
            let mut snapshot = self.metrics.write().await;
            snapshot.batches_completed += 1;
        }
        report.completed = true;

        info!(
            execution_id = %ctx.execution_id,
            registered = report.registered,
            "pipeline pass complete"
        );
        Ok(report)
    }

    /// Run passes forever, sleeping the scan interval between them.
    pub async fn watch(&self) -> Result<(), RunnerError> {
        let interval = Duration::from_secs(self.config.source.scan_interval_secs.max(1));
        loop {
            self.run_once().await?;
            tokio::time::sleep(interval).await;
        }
    }

    /// Start the metrics HTTP server as a background task.
    ///
    /// Returns None when the metrics port is 0 (disabled).
    pub fn start_metrics_server(&self) -> Option<tokio::task::JoinHandle<()>> {
        let port = self.config.server.metrics_port;
        if port == 0 {
            return None;
        }
        let metrics = self.metrics.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics, port).await {
                error!("metrics server error: {}", e);
            }
        }))
    }

    /// Start the background task refreshing system metrics.
    pub fn start_metrics_updater(&self) -> tokio::task::JoinHandle<()> {
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            loop {
                let system_metrics = collect_system_metrics();
                {
                    let mut snapshot = metrics.write().await;
                    snapshot.system = system_metrics;
                    snapshot.timestamp_unix_ms = current_timestamp_ms();
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    }

    async fn record_batch_failed(&self) {
        let mut snapshot = self.metrics.write().await;
        snapshot.batches_failed += 1;
    }
}

/// Get current timestamp in milliseconds
fn current_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
