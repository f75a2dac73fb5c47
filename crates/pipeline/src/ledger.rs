//! Registration ledger: idempotent, concurrency-safe file admission.
//!
//! The ledger guarantees at most one successful admission per file identity
//! per processing epoch, so re-scanning a source directory mid-run never
//! reprocesses an already-claimed file. Records are never mutated or removed
//! within an epoch; resetting the epoch is an explicit external operation
//! (wiping the state directory).

use crate::hashing::sha256_hex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

/// Error type for ledger operations.
///
/// Storage failure is fatal to the discovery invocation: without the
/// admission guarantee it cannot safely proceed, so failures are surfaced,
/// never treated as "not admitted".
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger storage unavailable: {0}")]
    Unavailable(String),
}

/// One admission, recorded on first success and never changed after.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationRecord {
    /// Stable identity derived from the file's full path.
    pub file_identity: String,
    /// Processor instance that admitted the file.
    pub processor_id: String,
    /// Execution the admission happened under.
    pub execution_id: String,
    /// Unix timestamp (milliseconds) of the admission.
    pub registered_at: i64,
}

/// The admission contract every ledger implementation provides.
#[async_trait]
pub trait RegistrationLedger: Send + Sync {
    /// Attempt to admit a file identity.
    ///
    /// Atomic across concurrent callers: for any identity, exactly one call
    /// returns `Ok(true)`; every other concurrent or later call returns
    /// `Ok(false)`.
    async fn try_admit(
        &self,
        file_identity: &str,
        processor_id: &str,
        execution_id: &str,
    ) -> Result<bool, LedgerError>;

    /// Whether an identity has already been admitted.
    async fn is_admitted(&self, file_identity: &str) -> Result<bool, LedgerError>;
}

/// Derive the ledger identity for a file from its durable location.
pub fn file_identity(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Get current timestamp in milliseconds since Unix epoch.
fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// In-memory ledger; admission is decided under one mutex.
///
/// Backs single-process runs and tests. Does not survive restarts.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<HashMap<String, RegistrationRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistrationLedger for MemoryLedger {
    async fn try_admit(
        &self,
        file_identity: &str,
        processor_id: &str,
        execution_id: &str,
    ) -> Result<bool, LedgerError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        if records.contains_key(file_identity) {
            return Ok(false);
        }

        records.insert(
            file_identity.to_string(),
            RegistrationRecord {
                file_identity: file_identity.to_string(),
                processor_id: processor_id.to_string(),
                execution_id: execution_id.to_string(),
                registered_at: current_timestamp_ms(),
            },
        );
        Ok(true)
    }

    async fn is_admitted(&self, file_identity: &str) -> Result<bool, LedgerError> {
        let records = self
            .records
            .lock()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        Ok(records.contains_key(file_identity))
    }
}

/// Durable ledger: one JSON record file per admitted identity.
///
/// The record file name is the SHA-256 of the identity; the file is created
/// with `create_new`, so the filesystem arbitrates concurrent admission —
/// exactly one creator wins, even across processes sharing the state
/// directory.
#[derive(Debug, Clone)]
pub struct FileLedger {
    state_dir: PathBuf,
}

impl FileLedger {
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    /// Path of the record file for an identity.
    fn record_path(&self, file_identity: &str) -> PathBuf {
        self.state_dir
            .join(format!("{}.json", sha256_hex(file_identity.as_bytes())))
    }
}

#[async_trait]
impl RegistrationLedger for FileLedger {
    async fn try_admit(
        &self,
        file_identity: &str,
        processor_id: &str,
        execution_id: &str,
    ) -> Result<bool, LedgerError> {
        std::fs::create_dir_all(&self.state_dir)
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        let path = self.record_path(file_identity);

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(LedgerError::Unavailable(e.to_string())),
        };

        let record = RegistrationRecord {
            file_identity: file_identity.to_string(),
            processor_id: processor_id.to_string(),
            execution_id: execution_id.to_string(),
            registered_at: current_timestamp_ms(),
        };

        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        file.write_all(json.as_bytes())
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        Ok(true)
    }

    async fn is_admitted(&self, file_identity: &str) -> Result<bool, LedgerError> {
        Ok(self.record_path(file_identity).exists())
    }
}

/// Loads all registration records from the state directory.
///
/// Skips files that fail to parse and logs warnings.
pub fn load_records(state_dir: &Path) -> Result<Vec<RegistrationRecord>, std::io::Error> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();

    for entry in std::fs::read_dir(state_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
        {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("failed to load ledger record from {:?}: {}", path, e);
            }
        }
    }

    Ok(records)
}
