//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Deposit coordination (operations, promotions, lock contention)
//! - Job execution (outcomes, duration)
//! - Message handling (dropped messages)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Deposit coordination
// =============================================================================

/// Operation messages handled, by action and result.
pub static OPERATIONS_HANDLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "deposit_operations_handled_total",
            "Total operation messages handled",
        ),
        &["action", "result"], // result: "applied", "skipped", "lock_unavailable", "error"
    )
    .unwrap()
});

/// Queued deposits promoted to running.
pub static DEPOSITS_PROMOTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "deposit_promotions_total",
        "Total queued deposits promoted to running",
    )
    .unwrap()
});

/// Promotions that failed after the candidate was claimed.
pub static PROMOTION_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "deposit_promotion_failures_total",
        "Total promotions that failed the candidate deposit",
    )
    .unwrap()
});

/// Supervisor lock acquisitions that lost to another holder.
pub static LOCK_CONTENTION: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "deposit_lock_contention_total",
            "Total supervisor lock acquisitions abandoned because the lock was held",
        ),
        &["action"],
    )
    .unwrap()
});

/// Deposits reaching a terminal state.
pub static DEPOSITS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deposit_terminal_total", "Total deposits reaching a terminal state"),
        &["state"], // "finished", "failed"
    )
    .unwrap()
});

/// Deposits currently holding a processing slot.
pub static ACTIVE_DEPOSITS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "deposit_active_deposits",
        "Deposits currently holding a processing slot",
    )
    .unwrap()
});

// =============================================================================
// Job execution
// =============================================================================

/// Jobs executed, by class and outcome.
pub static JOBS_EXECUTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deposit_jobs_executed_total", "Total jobs executed"),
        &["job_class", "outcome"], // outcome: "completed", "failed", "interrupted"
    )
    .unwrap()
});

/// Job duration in seconds.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("deposit_job_duration_seconds", "Duration of job execution").buckets(
            vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0],
        ),
        &["job_class"],
    )
    .unwrap()
});

// =============================================================================
// Messaging
// =============================================================================

/// Messages acknowledged without processing.
pub static MESSAGES_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "deposit_messages_dropped_total",
            "Total messages acknowledged without being processed",
        ),
        &["channel", "reason"], // reason: "malformed", "stale"
    )
    .unwrap()
});

/// Job messages left unacknowledged because the pipeline was not active.
pub static MESSAGES_DEFERRED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "deposit_job_messages_deferred_total",
        "Total job messages left pending while the pipeline was inactive",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Coordination
        Box::new(OPERATIONS_HANDLED.clone()),
        Box::new(DEPOSITS_PROMOTED.clone()),
        Box::new(PROMOTION_FAILURES.clone()),
        Box::new(LOCK_CONTENTION.clone()),
        Box::new(DEPOSITS_FINISHED.clone()),
        Box::new(ACTIVE_DEPOSITS.clone()),
        // Jobs
        Box::new(JOBS_EXECUTED.clone()),
        Box::new(JOB_DURATION.clone()),
        // Messaging
        Box::new(MESSAGES_DROPPED.clone()),
        Box::new(MESSAGES_DEFERRED.clone()),
    ]
}
