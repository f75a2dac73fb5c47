//! Implementation registry: resolve transform implementations by name.
//!
//! Implementations are compiled into the binary and registered in an
//! immutable table at process start; resolution is a table lookup, never a
//! runtime type scan. Resolution failure is a degraded-mode fallback to the
//! stage's built-in default, never fatal.

use crate::transforms::{AudioConverter, MetadataEnricher, MetadataStandardizer, Transform};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// The capability a stage requires from its resolved implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Metadata standardization stage.
    Standardize,
    /// Metadata enrichment stage.
    Enrich,
    /// Audio conversion stage.
    Convert,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Standardize => write!(f, "standardize"),
            StageKind::Enrich => write!(f, "enrich"),
            StageKind::Convert => write!(f, "convert"),
        }
    }
}

/// Error type for implementation resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No implementation is registered under this name
    #[error("implementation not found: '{0}'")]
    ImplementationNotFound(String),

    /// The named implementation serves a different stage capability
    #[error("implementation '{name}' provides the {actual} capability, stage requires {expected}")]
    CapabilityMismatch {
        name: String,
        expected: StageKind,
        actual: StageKind,
    },
}

struct RegistryEntry {
    kind: StageKind,
    constructor: fn() -> Arc<dyn Transform>,
}

/// All implementations compiled into this binary, keyed by type name.
static REGISTRY: Lazy<HashMap<&'static str, RegistryEntry>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, RegistryEntry> = HashMap::new();
    table.insert(
        "MetadataStandardizer",
        RegistryEntry {
            kind: StageKind::Standardize,
            constructor: || Arc::new(MetadataStandardizer),
        },
    );
    table.insert(
        "MetadataEnricher",
        RegistryEntry {
            kind: StageKind::Enrich,
            constructor: || Arc::new(MetadataEnricher),
        },
    );
    table.insert(
        "AudioConverter",
        RegistryEntry {
            kind: StageKind::Convert,
            constructor: || Arc::new(AudioConverter),
        },
    );
    table
});

/// The built-in default implementation for a stage capability.
pub fn default_for(kind: StageKind) -> Arc<dyn Transform> {
    match kind {
        StageKind::Standardize => Arc::new(MetadataStandardizer),
        StageKind::Enrich => Arc::new(MetadataEnricher),
        StageKind::Convert => Arc::new(AudioConverter),
    }
}

/// Resolve an implementation by type name for the given stage capability.
pub fn resolve(type_name: &str, kind: StageKind) -> Result<Arc<dyn Transform>, ResolveError> {
    let entry = REGISTRY
        .get(type_name)
        .ok_or_else(|| ResolveError::ImplementationNotFound(type_name.to_string()))?;

    if entry.kind != kind {
        return Err(ResolveError::CapabilityMismatch {
            name: type_name.to_string(),
            expected: kind,
            actual: entry.kind,
        });
    }

    Ok((entry.constructor)())
}

/// Resolve with the degraded-mode fallback contract.
///
/// An empty or unset name selects the built-in default directly. A failed
/// lookup logs the failure and substitutes the default; it is never fatal to
/// the stage.
pub fn resolve_or_default(type_name: Option<&str>, kind: StageKind) -> Arc<dyn Transform> {
    match type_name {
        None => default_for(kind),
        Some(name) if name.trim().is_empty() => default_for(kind),
        Some(name) => match resolve(name, kind) {
            Ok(implementation) => implementation,
            Err(e) => {
                warn!(stage = %kind, "implementation resolution failed, using built-in default: {}", e);
                default_for(kind)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_implementations() {
        let standardizer = resolve("MetadataStandardizer", StageKind::Standardize).unwrap();
        assert_eq!(standardizer.mandatory_extension(), ".json");

        let enricher = resolve("MetadataEnricher", StageKind::Enrich).unwrap();
        assert_eq!(enricher.mandatory_extension(), ".json");

        let converter = resolve("AudioConverter", StageKind::Convert).unwrap();
        assert_eq!(converter.mandatory_extension(), ".wav");
    }

    #[test]
    fn test_resolve_unknown_name() {
        let err = resolve("NoSuchImplementation", StageKind::Convert).unwrap_err();
        match err {
            ResolveError::ImplementationNotFound(name) => {
                assert_eq!(name, "NoSuchImplementation");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_capability_mismatch() {
        let err = resolve("AudioConverter", StageKind::Standardize).unwrap_err();
        match err {
            ResolveError::CapabilityMismatch {
                name,
                expected,
                actual,
            } => {
                assert_eq!(name, "AudioConverter");
                assert_eq!(expected, StageKind::Standardize);
                assert_eq!(actual, StageKind::Convert);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_or_default_unset_name() {
        let implementation = resolve_or_default(None, StageKind::Convert);
        assert_eq!(implementation.mandatory_extension(), ".wav");

        let implementation = resolve_or_default(Some(""), StageKind::Enrich);
        assert_eq!(implementation.mandatory_extension(), ".json");
    }

    #[test]
    fn test_resolve_or_default_falls_back_on_unknown_name() {
        // Unknown names degrade to the built-in default, never an error.
        let implementation = resolve_or_default(Some("DoesNotExist"), StageKind::Convert);
        assert_eq!(implementation.mandatory_extension(), ".wav");
    }

    #[test]
    fn test_resolve_or_default_falls_back_on_capability_mismatch() {
        let implementation = resolve_or_default(Some("AudioConverter"), StageKind::Standardize);
        assert_eq!(implementation.mandatory_extension(), ".json");
    }

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(format!("{}", StageKind::Standardize), "standardize");
        assert_eq!(format!("{}", StageKind::Enrich), "enrich");
        assert_eq!(format!("{}", StageKind::Convert), "convert");
    }
}
