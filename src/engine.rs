//! The fetch-verify loop for a single work item.
//!
//! A pass walks every file of the item in order: files whose on-disk digest
//! already matches are skipped, the rest are fetched and re-verified. The
//! first failed fetch ends the pass early. Passes repeat over all files until
//! every digest matches or the [`LoopPolicy`] gives up.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::checksum;
use crate::domain::Location;
use crate::error::FetchError;
use crate::resolve::WorkItem;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Pending,
    Checking(usize),
    Fetching(usize),
    Verifying(usize),
    Done(bool),
}

/// Outer ceiling for the fetch-verify loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopPolicy {
    /// Full passes before giving up; `0` retries until verified.
    pub max_attempts: u32,
    /// Wall-clock budget for the whole item.
    pub time_budget: Option<Duration>,
    /// Pause between passes.
    pub retry_delay: Duration,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            time_budget: None,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl LoopPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.max_attempts == 0 && self.time_budget.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The item ceiling was reached without every digest matching.
    RetryExhausted,
    TimedOut,
    /// The archive rejected a request in a way retrying cannot fix.
    Permanent,
    /// Local disk could not be written; the run should stop.
    Filesystem,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::RetryExhausted => "retry exhausted",
            FailureKind::TimedOut => "timed out",
            FailureKind::Permanent => "permanent error",
            FailureKind::Filesystem => "filesystem error",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Result of processing one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub id: String,
    pub status: OutcomeStatus,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
    /// Passes started.
    pub attempts: u32,
    /// Transport calls made.
    pub fetches: u32,
}

impl FetchOutcome {
    pub fn success(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: OutcomeStatus::Success,
            failure: None,
            message: None,
            attempts: 0,
            fetches: 0,
        }
    }

    pub fn failed(id: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: OutcomeStatus::Failed,
            failure: Some(kind),
            message: Some(message.into()),
            attempts: 0,
            fetches: 0,
        }
    }

    fn with_counts(mut self, attempts: u32, fetches: u32) -> Self {
        self.attempts = attempts;
        self.fetches = fetches;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.message) {
            (OutcomeStatus::Success, _) => write!(f, "[OK] {}", self.id),
            (OutcomeStatus::Failed, Some(message)) => write!(f, "[FAIL] {}: {}", self.id, message),
            (OutcomeStatus::Failed, None) => write!(f, "[FAIL] {}", self.id),
        }
    }
}

enum PassResult {
    Verified,
    Unverified(String),
    Fatal(FailureKind, String),
}

struct ItemRun<'a, T> {
    transport: &'a T,
    item: &'a WorkItem,
    fetches: u32,
}

impl<T: Transport> ItemRun<'_, T> {
    fn enter(&self, state: LoopState) {
        tracing::debug!(id = %self.item.id, ?state, "fetch-verify transition");
    }

    async fn pass(&mut self) -> PassResult {
        let mut satisfied = 0usize;
        let mut last_problem = None;
        for (index, pair) in self.item.pairs.iter().enumerate() {
            self.enter(LoopState::Checking(index));
            if checksum::verify(&pair.path, &pair.digest).await {
                satisfied += 1;
                continue;
            }

            self.enter(LoopState::Fetching(index));
            self.fetches += 1;
            if let Err(err) = self.transport.fetch(&pair.location, &pair.path).await {
                if let Some(kind) = fatal_kind(&err) {
                    return PassResult::Fatal(kind, format!("{}: {err}", pair.location));
                }
                return PassResult::Unverified(format!("{}: {err}", pair.location));
            }

            self.enter(LoopState::Verifying(index));
            if checksum::verify(&pair.path, &pair.digest).await {
                satisfied += 1;
            } else {
                last_problem = Some(format!(
                    "digest mismatch for {} (expected {})",
                    pair.path.display(),
                    pair.digest
                ));
            }
        }

        if satisfied == self.item.pairs.len() {
            PassResult::Verified
        } else {
            PassResult::Unverified(last_problem.unwrap_or_else(|| "unverified files".to_string()))
        }
    }
}

fn fatal_kind(err: &FetchError) -> Option<FailureKind> {
    match err {
        FetchError::Cancelled => Some(FailureKind::Cancelled),
        err if err.is_filesystem() => Some(FailureKind::Filesystem),
        FetchError::Exhausted { .. } => None,
        err if !err.is_transient() => Some(FailureKind::Permanent),
        _ => None,
    }
}

/// Drive one work item to a terminal outcome. Never returns an error: every
/// failure is folded into the outcome.
pub async fn run_work_item<T: Transport>(
    transport: &T,
    item: &WorkItem,
    policy: &LoopPolicy,
    cancel: &CancellationToken,
) -> FetchOutcome {
    let started = Instant::now();
    let mut run = ItemRun {
        transport,
        item,
        fetches: 0,
    };
    run.enter(LoopState::Pending);

    let mut attempts = 0u32;
    let mut last_problem = String::from("not attempted");
    loop {
        if cancel.is_cancelled() {
            return FetchOutcome::failed(&item.id, FailureKind::Cancelled, "cancelled")
                .with_counts(attempts, run.fetches);
        }
        if policy.max_attempts != 0 && attempts >= policy.max_attempts {
            tracing::warn!("Giving up on {} after {attempts} attempts", item.id);
            return FetchOutcome::failed(
                &item.id,
                FailureKind::RetryExhausted,
                format!("retry exhausted after {attempts} attempts: {last_problem}"),
            )
            .with_counts(attempts, run.fetches);
        }
        let remaining = match policy.time_budget {
            Some(budget) => match budget.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => Some(remaining),
                _ => {
                    return timed_out(item, attempts, run.fetches, &last_problem);
                }
            },
            None => None,
        };

        attempts += 1;
        let result = match remaining {
            Some(remaining) => tokio::time::timeout(remaining, run.pass()).await.ok(),
            None => Some(run.pass().await),
        };
        let Some(result) = result else {
            return timed_out(item, attempts, run.fetches, &last_problem);
        };

        match result {
            PassResult::Verified => {
                run.enter(LoopState::Done(true));
                return FetchOutcome::success(&item.id).with_counts(attempts, run.fetches);
            }
            PassResult::Fatal(kind, message) => {
                run.enter(LoopState::Done(false));
                tracing::warn!("Failed {}: {message}", item.id);
                return FetchOutcome::failed(&item.id, kind, message)
                    .with_counts(attempts, run.fetches);
            }
            PassResult::Unverified(problem) => {
                tracing::info!("Attempt {attempts} for {} incomplete: {problem}", item.id);
                last_problem = problem;
            }
        }

        if !policy.retry_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(policy.retry_delay) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}

fn timed_out(item: &WorkItem, attempts: u32, fetches: u32, last_problem: &str) -> FetchOutcome {
    tracing::warn!("Time budget for {} exhausted", item.id);
    FetchOutcome::failed(
        &item.id,
        FailureKind::TimedOut,
        format!("time budget exhausted after {attempts} attempts: {last_problem}"),
    )
    .with_counts(attempts, fetches)
}

/// Fetch a file that has no published digest. A file already at `path` is
/// complete, since transfers are only ever placed atomically.
pub async fn fetch_asset<T: Transport>(
    transport: &T,
    id: &str,
    location: &Location,
    path: &Path,
    cancel: &CancellationToken,
) -> FetchOutcome {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        tracing::debug!(id, "already present");
        return FetchOutcome::success(id);
    }
    if cancel.is_cancelled() {
        return FetchOutcome::failed(id, FailureKind::Cancelled, "cancelled");
    }
    match transport.fetch(location, path).await {
        Ok(()) => FetchOutcome::success(id).with_counts(1, 1),
        Err(err) => {
            tracing::warn!("Failed {id}: {err}");
            outcome_for_error(id, &err).with_counts(1, 1)
        }
    }
}

/// Failed outcome for a single transfer that did not succeed.
pub fn outcome_for_error(id: &str, err: &FetchError) -> FetchOutcome {
    let kind = fatal_kind(err).unwrap_or(FailureKind::RetryExhausted);
    FetchOutcome::failed(id, kind, err.to_string())
}
