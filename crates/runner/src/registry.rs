//! In-memory registry of run handles: lifecycle state machine, duplicate
//! detection, cancellation, and retention-window eviction.
//!
//! The identifier→handle map is the only shared mutable state between
//! concurrent runs. Every operation takes the map lock, so registering a
//! run and checking "already running" are atomic with respect to each
//! other: two callers racing to start the same identifier cannot both
//! win.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use yolobridge_core::error::RunError;
use yolobridge_core::result::RunResult;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Lifecycle state of one run.
///
/// `Pending → Running → {Succeeded, Failed, TimedOut, Cancelled}`;
/// no transition ever leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::TimedOut | RunState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::TimedOut => "timed_out",
            RunState::Cancelled => "cancelled",
        }
    }
}

/// The channel a run was initiated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Http,
    Sse,
    Stdio,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChannelKind::Http => "http",
            ChannelKind::Sse => "sse",
            ChannelKind::Stdio => "stdio",
        })
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Registry-internal handle for one run.
#[derive(Debug)]
struct RunEntry {
    command: String,
    created_at: DateTime<Utc>,
    state: RunState,
    channel: ChannelKind,
    cancel: CancellationToken,
    result: Option<Arc<RunResult>>,
    finished_at: Option<Instant>,
}

/// Point-in-time copy of a handle, safe to hand to channel adapters.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub state: RunState,
    pub channel: ChannelKind,
    pub command: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<RunResult>>,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The run was live; its cancellation token has been triggered.
    Signalled,
    /// The run already reached a terminal state; cancellation is a no-op
    /// and the stored result is returned unchanged.
    AlreadyTerminal(Arc<RunResult>),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Tracks in-flight and recently finished runs by identifier.
#[derive(Debug)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, RunEntry>>,
    retention: Duration,
}

impl RunRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Register a new run in `Pending` state and return its cancellation
    /// token.
    ///
    /// Fails with `Conflict` while the identifier is still present —
    /// pending, running, or terminal-but-retained. Eviction frees the
    /// identifier for reuse.
    pub fn register(
        &self,
        run_id: &str,
        command: &str,
        channel: ChannelKind,
    ) -> Result<CancellationToken, RunError> {
        let mut runs = self.runs.lock().expect("run registry lock poisoned");
        if let Some(existing) = runs.get(run_id) {
            return Err(RunError::Conflict(format!(
                "run '{run_id}' is already registered (state: {})",
                existing.state.as_str()
            )));
        }
        let cancel = CancellationToken::new();
        runs.insert(
            run_id.to_string(),
            RunEntry {
                command: command.to_string(),
                created_at: Utc::now(),
                state: RunState::Pending,
                channel,
                cancel: cancel.clone(),
                result: None,
                finished_at: None,
            },
        );
        Ok(cancel)
    }

    /// Transition `Pending → Running` after a successful spawn.
    pub fn mark_running(&self, run_id: &str) {
        let mut runs = self.runs.lock().expect("run registry lock poisoned");
        if let Some(entry) = runs.get_mut(run_id) {
            if entry.state == RunState::Pending {
                entry.state = RunState::Running;
            }
        }
    }

    /// Record the terminal state and result of a run.
    ///
    /// Ignored if the run is already terminal (no transition leaves a
    /// terminal state) or was evicted.
    pub fn finish(&self, run_id: &str, state: RunState, result: Arc<RunResult>) {
        debug_assert!(state.is_terminal());
        let mut runs = self.runs.lock().expect("run registry lock poisoned");
        match runs.get_mut(run_id) {
            Some(entry) if !entry.state.is_terminal() => {
                entry.state = state;
                entry.result = Some(result);
                entry.finished_at = Some(Instant::now());
            }
            Some(_) => {
                tracing::warn!(run_id, "Ignoring duplicate terminal transition");
            }
            None => {
                tracing::warn!(run_id, "Finish for unknown (evicted?) run");
            }
        }
    }

    /// Request cancellation of a run.
    ///
    /// Idempotent: cancelling a terminal run is a no-op that returns the
    /// stored terminal result; repeated cancellation of a live run just
    /// re-triggers an already-triggered token.
    pub fn request_cancel(&self, run_id: &str) -> Result<CancelOutcome, RunError> {
        let runs = self.runs.lock().expect("run registry lock poisoned");
        let entry = runs
            .get(run_id)
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;
        if entry.state.is_terminal() {
            if let Some(result) = &entry.result {
                return Ok(CancelOutcome::AlreadyTerminal(Arc::clone(result)));
            }
        }
        entry.cancel.cancel();
        Ok(CancelOutcome::Signalled)
    }

    /// Look up a run by identifier.
    pub fn get(&self, run_id: &str) -> Option<RunSnapshot> {
        let runs = self.runs.lock().expect("run registry lock poisoned");
        runs.get(run_id).map(|entry| RunSnapshot {
            run_id: run_id.to_string(),
            state: entry.state,
            channel: entry.channel,
            command: entry.command.clone(),
            created_at: entry.created_at,
            result: entry.result.clone(),
        })
    }

    /// Evict terminal runs older than the retention window. Returns the
    /// number of evicted handles.
    pub fn evict_expired(&self) -> usize {
        let mut runs = self.runs.lock().expect("run registry lock poisoned");
        let retention = self.retention;
        let before = runs.len();
        runs.retain(|_, entry| match (entry.state.is_terminal(), entry.finished_at) {
            (true, Some(at)) => at.elapsed() < retention,
            _ => true,
        });
        before - runs.len()
    }
}

/// Periodic eviction sweep, run as a background task until cancelled.
///
/// Same shape as any other long-lived maintenance loop: an interval
/// ticker raced against a cancellation token.
pub async fn run_eviction_loop(
    registry: Arc<RunRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    tracing::info!(interval_secs = interval.as_secs(), "Run eviction sweep started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("Run eviction sweep shutting down");
                break;
            }
            _ = ticker.tick() => {
                let evicted = registry.evict_expired();
                if evicted > 0 {
                    tracing::debug!(evicted, "Evicted expired run handles");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
