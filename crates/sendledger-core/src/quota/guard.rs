//! Admission control.
//!
//! Counting and reserving happen in one ledger critical section, so any
//! number of processes sharing a scope never admit more than the cap within a
//! trailing window. No lock is held while waiting.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info};

use super::policy::{QuotaScope, Saturation};
use super::window::{WindowStats, window_stats};
use crate::clock::Clock;
use crate::error::Result;
use crate::ledger::{Ledger, LedgerEntry};

/// Upper bound of the random delay added to quota waits, in seconds.
pub const WAIT_JITTER_SECS: u64 = 5;

/// Which cap denied admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Event count.
    Messages,
    /// Distinct external recipients.
    UniqueExternal,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Messages => f.write_str("messages"),
            Self::UniqueExternal => f.write_str("unique external recipients"),
        }
    }
}

/// A granted reservation: the `SLOT` row written for one admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Scope name.
    pub scope: String,
    /// Ledger holding the `SLOT` row.
    pub ledger: Ledger,
    /// Timestamp of the `SLOT` row.
    pub reserved_at: DateTime<Utc>,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; a `SLOT` row was appended.
    Granted(Reservation),
    /// Window full; retry at `until`.
    Wait {
        /// Scope that denied admission.
        scope: String,
        /// Earliest time capacity frees up.
        until: DateTime<Utc>,
        /// Cap that denied admission.
        limit: LimitKind,
    },
    /// Window full and the policy stops instead of waiting.
    Deferred {
        /// Scope that denied admission.
        scope: String,
        /// Earliest time capacity frees up.
        resume_at: DateTime<Utc>,
        /// Cap that denied admission.
        limit: LimitKind,
    },
}

/// Outcome of a blocking acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    /// Admitted.
    Granted(Reservation),
    /// The policy stops instead of waiting.
    Deferred {
        /// Scope that denied admission.
        scope: String,
        /// Earliest time capacity frees up.
        resume_at: DateTime<Utc>,
        /// Cap that denied admission.
        limit: LimitKind,
    },
}

impl QuotaScope {
    /// Current window statistics (read under a shared lock).
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub fn stats(&self, now: DateTime<Utc>) -> Result<WindowStats> {
        let entries = self.ledger.read_all()?;
        Ok(window_stats(&entries, &self.policy, now))
    }

    /// Checks admission for `recipient` at `now` and reserves a slot if the
    /// window has room, as one atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Ledger`] if the ledger cannot be locked, read
    /// or written. Admission is never granted without a durable reservation.
    pub fn try_acquire(&self, recipient: &str, now: DateTime<Utc>) -> Result<Admission> {
        try_acquire_in(&self.ledger, std::slice::from_ref(self), recipient, now)
    }

    /// Blocks until admitted, or returns `Deferred` for stopping policies.
    ///
    /// While waiting, sleeps until the oldest event leaves the window (at
    /// least one second) plus up to [`WAIT_JITTER_SECS`] of jitter.
    ///
    /// # Errors
    ///
    /// Same as [`QuotaScope::try_acquire`].
    pub async fn acquire<C: Clock>(&self, recipient: &str, clock: &C) -> Result<Acquired> {
        acquire_in(&self.ledger, std::slice::from_ref(self), recipient, clock).await
    }

    fn denial(&self, entries: &[LedgerEntry], recipient: &str, now: DateTime<Utc>) -> Option<Admission> {
        let stats = window_stats(entries, &self.policy, now);
        let (limit, resume) = if self
            .policy
            .max_events
            .is_some_and(|max| stats.occupancy >= max)
        {
            (LimitKind::Messages, stats.resume_messages)
        } else if self.policy.max_unique_external.is_some_and(|max| {
            self.policy.owned_domains.is_external(recipient)
                && !stats.counts_recipient(recipient)
                && stats.unique_external() >= max
        }) {
            (LimitKind::UniqueExternal, stats.resume_unique_external)
        } else {
            return None;
        };

        // A zero cap has nothing to wait for; retry after the window.
        let at = resume.unwrap_or(now + self.policy.window);
        let scope = self.name.clone();
        Some(match self.policy.saturation {
            Saturation::Wait => Admission::Wait { scope, until: at, limit },
            Saturation::Stop => Admission::Deferred {
                scope,
                resume_at: at,
                limit,
            },
        })
    }
}

/// Scopes whose events live in the same ledger file.
///
/// The group is checked in one critical section and an admission writes a
/// single `SLOT` row, which every policy in the group counts once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeGroup {
    ledger: Ledger,
    scopes: Vec<QuotaScope>,
}

impl ScopeGroup {
    /// Groups scopes by ledger file. Scope order is kept within a group, and
    /// groups follow the order in which their file first appears.
    #[must_use]
    pub fn partition(scopes: Vec<QuotaScope>) -> Vec<Self> {
        let mut groups: Vec<Self> = Vec::new();
        for scope in scopes {
            match groups.iter_mut().find(|g| g.ledger.same_file(&scope.ledger)) {
                Some(group) => group.scopes.push(scope),
                None => groups.push(Self {
                    ledger: scope.ledger.clone(),
                    scopes: vec![scope],
                }),
            }
        }
        groups
    }

    /// The shared ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Scopes in checking order.
    #[must_use]
    pub fn scopes(&self) -> &[QuotaScope] {
        &self.scopes
    }

    /// Checks every scope and reserves one slot for all of them.
    ///
    /// The first scope that is full decides the outcome.
    ///
    /// # Errors
    ///
    /// Same as [`QuotaScope::try_acquire`].
    pub fn try_acquire(&self, recipient: &str, now: DateTime<Utc>) -> Result<Admission> {
        try_acquire_in(&self.ledger, &self.scopes, recipient, now)
    }

    /// Blocking form of [`ScopeGroup::try_acquire`].
    ///
    /// # Errors
    ///
    /// Same as [`QuotaScope::try_acquire`].
    pub async fn acquire<C: Clock>(&self, recipient: &str, clock: &C) -> Result<Acquired> {
        acquire_in(&self.ledger, &self.scopes, recipient, clock).await
    }
}

fn group_name(scopes: &[QuotaScope]) -> String {
    scopes
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join("+")
}

fn try_acquire_in(
    ledger: &Ledger,
    scopes: &[QuotaScope],
    recipient: &str,
    now: DateTime<Utc>,
) -> Result<Admission> {
    ledger.transaction(|txn| {
        if let Some(denied) = scopes
            .iter()
            .find_map(|scope| scope.denial(txn.entries(), recipient, now))
        {
            return Ok(denied);
        }

        txn.append(LedgerEntry::reservation(now))?;
        Ok(Admission::Granted(Reservation {
            scope: group_name(scopes),
            ledger: ledger.clone(),
            reserved_at: now,
        }))
    })
}

async fn acquire_in<C: Clock>(
    ledger: &Ledger,
    scopes: &[QuotaScope],
    recipient: &str,
    clock: &C,
) -> Result<Acquired> {
    loop {
        match try_acquire_in(ledger, scopes, recipient, clock.now())? {
            Admission::Granted(reservation) => {
                debug!(scope = %reservation.scope, "Quota slot reserved");
                return Ok(Acquired::Granted(reservation));
            }
            Admission::Deferred {
                scope,
                resume_at,
                limit,
            } => {
                info!(%scope, %limit, %resume_at, "Quota window full; stopping");
                return Ok(Acquired::Deferred {
                    scope,
                    resume_at,
                    limit,
                });
            }
            Admission::Wait { scope, until, limit } => {
                let wait = wait_duration(until, clock.now());
                info!(
                    %scope,
                    %limit,
                    wait_secs = wait.as_secs(),
                    "Quota window full; waiting for a slot"
                );
                clock.sleep(wait).await;
            }
        }
    }
}

fn wait_duration(until: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let base = (until - now).to_std().unwrap_or_default().max(Duration::from_secs(1));
    let jitter = rand::thread_rng().gen_range(0..=WAIT_JITTER_SECS);
    base + Duration::from_secs(jitter)
}
