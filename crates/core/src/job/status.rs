//! Shared job status record.
//!
//! A [`Status`] is a cheaply cloneable handle to the mutable progress record
//! of one job. The executing job mutates it through the handle; outside
//! observers (HTTP pollers, parent jobs) only ever receive immutable
//! [`StatusSnapshot`] values.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Immutable view of a job's status, safe to hand to pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Human-readable progress message.
    pub message: String,
    /// Progress in [0, 100].
    pub percent_complete: f64,
    /// Whether the job has errored.
    pub error: bool,
    /// Whether the job has finished (successfully or not).
    pub completed: bool,
    /// When the job started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration, set when the job reaches a terminal state.
    pub duration_ms: u64,
    /// Detailed error information for support requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_details: Option<String>,
}

#[derive(Debug)]
struct StatusInner {
    message: String,
    percent_complete: f64,
    error: bool,
    completed: bool,
    started_at: DateTime<Utc>,
    duration_ms: u64,
    exception_details: Option<String>,
}

impl StatusInner {
    fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Mutable progress record shared between a job and its observers.
///
/// Invariants enforced here rather than at call sites:
/// - `percent_complete` stays within [0, 100] and never decreases via
///   [`Status::update`];
/// - once `completed` is set, every mutator is a no-op;
/// - once `error` is set, no success transition is possible: progress updates
///   and [`Status::complete`] are ignored, only failure appends and
///   completion remain.
#[derive(Debug, Clone)]
pub struct Status {
    inner: Arc<RwLock<StatusInner>>,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    /// Create a fresh status record with the start time set to now.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusInner {
                message: String::new(),
                percent_complete: 0.0,
                error: false,
                completed: false,
                started_at: Utc::now(),
                duration_ms: 0,
                exception_details: None,
            })),
        }
    }

    /// Update the progress message and percentage.
    ///
    /// The percentage is clamped to [0, 100] and never moves backwards.
    pub async fn update(&self, message: impl Into<String>, percent: f64) {
        let mut inner = self.inner.write().await;
        if inner.completed || inner.error {
            return;
        }
        inner.message = message.into();
        inner.percent_complete = percent.clamp(inner.percent_complete, 100.0);
    }

    /// Update only the progress message, leaving the percentage untouched.
    pub async fn set_message(&self, message: impl Into<String>) {
        let mut inner = self.inner.write().await;
        if inner.completed || inner.error {
            return;
        }
        inner.message = message.into();
    }

    /// Mark the job as failed. The first failure wins; later failures should
    /// go through [`Status::append_failure`].
    pub async fn fail(&self, message: impl Into<String>) {
        self.fail_inner(message.into(), None).await;
    }

    /// Mark the job as failed, recording error details.
    pub async fn fail_with(
        &self,
        message: impl Into<String>,
        source: &(dyn std::error::Error + Send + Sync),
    ) {
        self.fail_inner(message.into(), Some(source.to_string())).await;
    }

    /// Append a failure to an already-errored status, or fail it outright.
    ///
    /// Used for cleanup problems discovered after a primary failure: the
    /// original failure message is kept and the new one appended, so no
    /// teardown error is ever silently dropped.
    pub async fn append_failure(&self, message: impl Into<String>) {
        let message = message.into();
        let mut inner = self.inner.write().await;
        if inner.completed {
            return;
        }
        if inner.error {
            inner.message = format!("{} {}", inner.message, message);
        } else {
            inner.error = true;
            inner.message = message;
            inner.percent_complete = 100.0;
        }
    }

    /// Mark the job as cancelled: errored and completed without having run.
    ///
    /// Unlike [`Status::fail`] this immediately reaches the terminal state,
    /// because there is no runner left to complete a job that never started.
    pub async fn cancel(&self, message: impl Into<String>) {
        let mut inner = self.inner.write().await;
        if inner.completed {
            return;
        }
        inner.error = true;
        inner.message = message.into();
        inner.percent_complete = 100.0;
        inner.completed = true;
        inner.duration_ms = inner.elapsed_ms();
    }

    /// Mark the job as successfully completed.
    pub async fn complete(&self, message: impl Into<String>) {
        let mut inner = self.inner.write().await;
        if inner.completed || inner.error {
            return;
        }
        inner.message = message.into();
        inner.percent_complete = 100.0;
        inner.completed = true;
        inner.duration_ms = inner.elapsed_ms();
    }

    /// Mark the job as completed without changing message or error flag.
    ///
    /// Called by the job runner after the finalize hook so that every job,
    /// including one whose logic failed, ends up completed exactly once.
    pub async fn mark_completed(&self) {
        let mut inner = self.inner.write().await;
        if inner.completed {
            return;
        }
        inner.completed = true;
        inner.percent_complete = 100.0;
        inner.duration_ms = inner.elapsed_ms();
    }

    async fn fail_inner(&self, message: String, details: Option<String>) {
        let mut inner = self.inner.write().await;
        if inner.completed || inner.error {
            return;
        }
        inner.error = true;
        inner.message = message;
        inner.percent_complete = 100.0;
        if details.is_some() {
            inner.exception_details = details;
        }
    }

    /// Whether the error flag is set.
    pub async fn has_error(&self) -> bool {
        self.inner.read().await.error
    }

    /// Whether the job has reached a terminal state.
    pub async fn is_completed(&self) -> bool {
        self.inner.read().await.completed
    }

    /// Current progress percentage.
    pub async fn percent_complete(&self) -> f64 {
        self.inner.read().await.percent_complete
    }

    /// Take an immutable snapshot of the current state.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read().await;
        StatusSnapshot {
            message: inner.message.clone(),
            percent_complete: inner.percent_complete,
            error: inner.error,
            completed: inner.completed,
            started_at: inner.started_at,
            duration_ms: inner.duration_ms,
            exception_details: inner.exception_details.clone(),
        }
    }
}
