//! Metrics module for the Mediaflow pipeline
//!
//! Provides structs for per-stage processing metrics, system metrics, and
//! metrics snapshots with JSON serialization support.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Per-stage processing metrics, updated once per stage invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageMetrics {
    pub stage: String,
    pub invocations: u64,
    pub files_processed: u64,
    pub files_transformed: u64,
    pub failures: u64,
    pub last_duration_ms: u64,
    pub last_summary: String,
}

impl StageMetrics {
    fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            invocations: 0,
            files_processed: 0,
            files_transformed: 0,
            failures: 0,
            last_duration_ms: 0,
            last_summary: String::new(),
        }
    }
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Complete metrics snapshot including stages, system, and aggregate stats
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub stages: Vec<StageMetrics>,
    pub system: SystemMetrics,
    pub files_registered: u64,
    pub batches_completed: u64,
    pub batches_failed: u64,
}

/// Shared metrics state for concurrent access across pipeline components
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            mem_usage_percent: 0.0,
            load_avg_1: 0.0,
            load_avg_5: 0.0,
            load_avg_15: 0.0,
        }
    }
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            timestamp_unix_ms: 0,
            stages: Vec::new(),
            system: SystemMetrics::default(),
            files_registered: 0,
            batches_completed: 0,
            batches_failed: 0,
        }
    }
}

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}

/// Record one completed stage invocation.
pub async fn record_invocation(
    metrics: &SharedMetrics,
    stage: &str,
    files_processed: u64,
    files_transformed: u64,
    duration: Duration,
    summary: &str,
) {
    let mut snapshot = metrics.write().await;
    let entry = stage_entry(&mut snapshot, stage);
    entry.invocations += 1;
    entry.files_processed += files_processed;
    entry.files_transformed += files_transformed;
    entry.last_duration_ms = duration.as_millis() as u64;
    entry.last_summary = summary.to_string();
}

/// Record one failed stage invocation (the exception metric).
pub async fn record_exception(
    metrics: &SharedMetrics,
    stage: &str,
    duration: Duration,
    summary: &str,
) {
    let mut snapshot = metrics.write().await;
    let entry = stage_entry(&mut snapshot, stage);
    entry.invocations += 1;
    entry.failures += 1;
    entry.last_duration_ms = duration.as_millis() as u64;
    entry.last_summary = summary.to_string();
}

/// Find or insert the per-stage entry.
fn stage_entry<'a>(snapshot: &'a mut MetricsSnapshot, stage: &str) -> &'a mut StageMetrics {
    if let Some(idx) = snapshot.stages.iter().position(|s| s.stage == stage) {
        return &mut snapshot.stages[idx];
    }
    snapshot.stages.push(StageMetrics::new(stage));
    snapshot
        .stages
        .last_mut()
        .expect("entry was just pushed")
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_record_invocation_accumulates() {
        let metrics = new_shared_metrics();

        record_invocation(
            &metrics,
            "convert",
            3,
            1,
            Duration::from_millis(250),
            "processed 3 files, transformed 1",
        )
        .await;
        record_invocation(
            &metrics,
            "convert",
            2,
            2,
            Duration::from_millis(100),
            "processed 2 files, transformed 2",
        )
        .await;

        let snapshot = metrics.read().await;
        assert_eq!(snapshot.stages.len(), 1);
        let stage = &snapshot.stages[0];
        assert_eq!(stage.stage, "convert");
        assert_eq!(stage.invocations, 2);
        assert_eq!(stage.files_processed, 5);
        assert_eq!(stage.files_transformed, 3);
        assert_eq!(stage.failures, 0);
        assert_eq!(stage.last_duration_ms, 100);
        assert_eq!(stage.last_summary, "processed 2 files, transformed 2");
    }

    #[tokio::test]
    async fn test_record_exception_counts_failure() {
        let metrics = new_shared_metrics();

        record_exception(
            &metrics,
            "standardize",
            Duration::from_millis(5),
            "stage failed: malformed input",
        )
        .await;

        let snapshot = metrics.read().await;
        assert_eq!(snapshot.stages.len(), 1);
        assert_eq!(snapshot.stages[0].invocations, 1);
        assert_eq!(snapshot.stages[0].failures, 1);
        assert_eq!(snapshot.stages[0].files_processed, 0);
    }

    #[tokio::test]
    async fn test_distinct_stages_get_distinct_entries() {
        let metrics = new_shared_metrics();

        record_invocation(&metrics, "standardize", 1, 1, Duration::ZERO, "ok").await;
        record_invocation(&metrics, "enrich", 1, 1, Duration::ZERO, "ok").await;

        let snapshot = metrics.read().await;
        assert_eq!(snapshot.stages.len(), 2);
    }

    // *For any* metrics snapshot, serializing to JSON and deserializing back
    // produces an equivalent snapshot with all fields preserved.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_metrics_snapshot_round_trip(
            timestamp in any::<i64>(),
            files_registered in any::<u64>(),
            batches_completed in any::<u64>(),
            batches_failed in any::<u64>(),
            cpu_usage in 0.0f32..100.0,
            mem_usage in 0.0f32..100.0,
            stage_count in 0usize..5,
        ) {
            let stages: Vec<StageMetrics> = (0..stage_count).map(|i| StageMetrics {
                stage: format!("stage-{}", i),
                invocations: i as u64,
                files_processed: (i * 3) as u64,
                files_transformed: i as u64,
                failures: 0,
                last_duration_ms: 42,
                last_summary: format!("processed {} files, transformed {}", i * 3, i),
            }).collect();

            let snapshot = MetricsSnapshot {
                timestamp_unix_ms: timestamp,
                stages,
                system: SystemMetrics {
                    cpu_usage_percent: cpu_usage,
                    mem_usage_percent: mem_usage,
                    load_avg_1: 1.0,
                    load_avg_5: 0.5,
                    load_avg_15: 0.25,
                },
                files_registered,
                batches_completed,
                batches_failed,
            };

            let json = serde_json::to_string(&snapshot).expect("serialization should succeed");
            let deserialized: MetricsSnapshot = serde_json::from_str(&json)
                .expect("deserialization should succeed");

            prop_assert_eq!(snapshot, deserialized);
        }
    }
}
