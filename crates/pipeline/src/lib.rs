//! Mediaflow pipeline
//!
//! Multi-stage file-processing pipeline: files discovered from configured
//! source roots are registered exactly once, pushed through an ordered chain
//! of pluggable content transformations over fixed-shape envelopes, and
//! written to the output directory.

pub mod discovery;
pub mod envelope;
pub mod hashing;
pub mod ledger;
pub mod metrics;
pub mod metrics_server;
pub mod output;
pub mod registry;
pub mod runner;
pub mod stage;
pub mod transcode;
pub mod transforms;

pub use discovery::{scan_sources, DiscoveryStage, ScanCandidate};
pub use envelope::{parse_envelope_array, Cardinality, Envelope, EnvelopeError};
pub use ledger::{
    file_identity, FileLedger, LedgerError, MemoryLedger, RegistrationLedger, RegistrationRecord,
};
pub use mediaflow_config as config;
pub use mediaflow_config::Config;
pub use metrics::{
    collect_system_metrics, new_shared_metrics, MetricsSnapshot, SharedMetrics, StageMetrics,
    SystemMetrics,
};
pub use metrics_server::{create_metrics_router, run_metrics_server, ServerError};
pub use output::OutputStage;
pub use registry::{resolve, resolve_or_default, ResolveError, StageKind};
pub use runner::{BatchReport, PipelineRunner, RunnerError};
pub use stage::{
    ProcessedResult, ProcessedStatus, StageContext, StageError, StageExecutor, StageSettings,
};
pub use transcode::{is_available, transcode, TranscodeJob, TranscodeResult};
pub use transforms::{AudioConverter, MetadataEnricher, MetadataStandardizer, Transform};
