//! Transform implementations for the Mediaflow pipeline
//!
//! A transform is a named, stateless unit implementing one content
//! transformation. Each declares the single file extension it claims;
//! envelopes that do not match pass through the stage unchanged.

pub mod convert_audio;
pub mod enrich;
pub mod standardize;

pub use convert_audio::AudioConverter;
pub use enrich::MetadataEnricher;
pub use standardize::MetadataStandardizer;

use crate::envelope::{Envelope, EnvelopeError};
use crate::stage::{StageContext, StageSettings};
use async_trait::async_trait;
use thiserror::Error;

/// Error type for transform operations
#[derive(Debug, Error)]
pub enum TransformError {
    /// Envelope access failed (missing name, missing or invalid content)
    #[error("{0}")]
    Envelope(#[from] EnvelopeError),

    /// Metadata content could not be interpreted
    #[error("invalid metadata content: {0}")]
    InvalidMetadata(String),

    /// The transcoding subprocess failed, timed out, or could not be spawned
    #[error("transcode failed: {0}")]
    Transcode(String),
}

/// The capability every pipeline stage implementation provides.
///
/// Implementations hold no per-file mutable state and are shared read-mostly
/// across invocations of the same stage executor, so they must be safe for
/// concurrent use.
#[async_trait]
pub trait Transform: Send + Sync + std::fmt::Debug {
    /// The file suffix this implementation claims, lowercase, with leading
    /// dot (e.g. ".wav").
    fn mandatory_extension(&self) -> &str;

    /// Transform one matching envelope into its replacement envelope.
    async fn transform(
        &self,
        envelope: &Envelope,
        settings: &StageSettings,
        ctx: &StageContext,
    ) -> Result<Envelope, TransformError>;
}
