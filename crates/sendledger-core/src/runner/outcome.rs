//! Run states, per-attempt outcomes and the final summary.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::quota::LimitKind;
use crate::report::format_resume;

/// Run-loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// Not started.
    #[default]
    Idle,
    /// Resolving the pending list and checking windows.
    Preflight,
    /// Attempting deliveries.
    Sending,
    /// Sleeping between batches.
    Cooldown,
    /// Finished cleanly.
    Done,
    /// Stopped on a condition that needs operator attention.
    Aborted,
}

impl RunState {
    /// Returns true for `Done` and `Aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "IDLE",
            Self::Preflight => "PREFLIGHT",
            Self::Sending => "SENDING",
            Self::Cooldown => "COOLDOWN",
            Self::Done => "DONE",
            Self::Aborted => "ABORTED",
        })
    }
}

/// Why a run was aborted. Each carries the failure text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The provider rejected the credentials.
    AuthFailed(String),
    /// The provider reported a hard sending limit.
    HardLimit {
        /// Reply text.
        detail: String,
        /// Estimated time the provider quota frees up.
        resume_at: DateTime<Utc>,
    },
    /// The retry after a throttling reply failed.
    RetryFailed(String),
    /// The retry after a reconnect failed.
    ReconnectFailed(String),
}

impl AbortReason {
    /// The failure text.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::AuthFailed(d)
            | Self::HardLimit { detail: d, .. }
            | Self::RetryFailed(d)
            | Self::ReconnectFailed(d) => d,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AuthFailed(_) => "authentication failed",
            Self::HardLimit { .. } => "provider sending limit reached",
            Self::RetryFailed(_) => "retry after throttling failed",
            Self::ReconnectFailed(_) => "retry after reconnect failed",
        };
        write!(f, "{label}: {}", self.detail())
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every pending recipient was attempted.
    Exhausted,
    /// `max_total` sends reached.
    MaxTotal(u32),
    /// `max_per_run` sends reached.
    MaxPerRun(u32),
    /// A stopping quota scope is full.
    WindowCapReached {
        /// Scope name.
        scope: String,
        /// Cap that is full.
        limit: LimitKind,
        /// When capacity frees up.
        resume_at: DateTime<Utc>,
    },
    /// The cancel flag was set.
    Cancelled,
    /// Preflight-only run.
    Preflight,
    /// Aborted.
    Aborted(AbortReason),
}

impl StopReason {
    /// Terminal state this reason leads to.
    #[must_use]
    pub const fn state(&self) -> RunState {
        match self {
            Self::Aborted(_) => RunState::Aborted,
            _ => RunState::Done,
        }
    }

    /// Resume time for window stops and provider hard limits.
    #[must_use]
    pub const fn resume_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::WindowCapReached { resume_at, .. }
            | Self::Aborted(AbortReason::HardLimit { resume_at, .. }) => Some(*resume_at),
            _ => None,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => f.write_str("pending list exhausted"),
            Self::MaxTotal(n) => write!(f, "reached max_total={n}"),
            Self::MaxPerRun(n) => write!(f, "reached max_per_run={n}"),
            Self::WindowCapReached {
                scope,
                limit,
                resume_at,
            } => write!(
                f,
                "{scope} cap on {limit} reached; resume: {}",
                format_resume(Some(*resume_at))
            ),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Preflight => f.write_str("preflight ok (no sending)"),
            Self::Aborted(reason) => reason.fmt(f),
        }
    }
}

/// How a successful send recovered from a first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovered {
    /// After a dropped connection.
    Reconnect,
    /// After a throttling reply.
    ThrottleRetry,
}

impl Recovered {
    /// Ledger `Info` marker.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Reconnect => "reconnect_ok",
            Self::ThrottleRetry => "throttle_retry_ok",
        }
    }
}

/// Result of one attempt (or of a first failure before its retry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Recorded as `DRYRUN`.
    DryRun,
    /// Delivered.
    Sent(Option<Recovered>),
    /// Rejected as an unknown recipient.
    Invalid(String),
    /// Failed; the run continues with the next recipient.
    Error(String),
    /// Connection dropped; retrying once after reconnecting.
    Disconnected(String),
    /// Throttled; retrying once after the backoff.
    Throttled {
        /// Reply text.
        detail: String,
        /// Backoff before the retry.
        backoff: Duration,
    },
    /// Failed and stopped the run.
    Aborted(AbortReason),
}

/// Progress line for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptReport<'a> {
    /// 1-based position in the pending list.
    pub position: usize,
    /// Pending list length.
    pub total: usize,
    /// Recipient.
    pub recipient: &'a str,
    /// What happened.
    pub outcome: &'a AttemptOutcome,
}

impl fmt::Display for AttemptReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (position, total, to) = (self.position, self.total, self.recipient);
        write!(f, "[{position}/{total}] ")?;
        match self.outcome {
            AttemptOutcome::DryRun => write!(f, "DRYRUN {to}"),
            AttemptOutcome::Sent(None) => write!(f, "SENT {to}"),
            AttemptOutcome::Sent(Some(Recovered::Reconnect)) => write!(f, "SENT (reconnect) {to}"),
            AttemptOutcome::Sent(Some(Recovered::ThrottleRetry)) => write!(f, "SENT (retry) {to}"),
            AttemptOutcome::Invalid(d) => write!(f, "INVALID {to} :: {d}"),
            AttemptOutcome::Error(d) => write!(f, "ERROR {to} :: {d}"),
            AttemptOutcome::Disconnected(_) => {
                write!(f, "DISCONNECTED {to} :: reconnecting and retrying once")
            }
            AttemptOutcome::Throttled { backoff, .. } => {
                write!(f, "THROTTLED {to} :: backoff {}s then retry", backoff.as_secs())
            }
            AttemptOutcome::Aborted(AbortReason::AuthFailed(d)) => {
                write!(f, "AUTH ERROR (stop) {to} :: {d}")
            }
            AttemptOutcome::Aborted(reason) => write!(f, "ERROR (stop) {to} :: {}", reason.detail()),
        }
    }
}

/// End-of-batch line in repeat mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Sent in this batch.
    pub sent: u32,
    /// Sent so far in the run.
    pub total: u32,
    /// Pending items still allowed to go out.
    pub remaining_estimate: usize,
    /// Cooldown before the next batch (zero when the run ends).
    pub next_sleep: Duration,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BATCH: sent={} total={} remaining_estimate={} next_sleep_seconds={}",
            self.sent,
            self.total,
            self.remaining_estimate,
            self.next_sleep.as_secs()
        )
    }
}

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// `Done` or `Aborted`.
    pub state: RunState,
    /// Why the run ended.
    pub stop_reason: StopReason,
    /// Messages delivered.
    pub sent: u32,
    /// Recipients rejected as unknown.
    pub invalid: u32,
    /// `ERROR` rows written.
    pub errors: u32,
    /// `DRYRUN` rows written.
    pub dry_run: u32,
    /// When a full window or the provider quota frees up, if that ended the
    /// run.
    pub resume_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    /// Returns true if the run needs operator attention.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self.state, RunState::Aborted)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DONE: sent={} invalid={} errors={}",
            self.sent, self.invalid, self.errors
        )
    }
}
