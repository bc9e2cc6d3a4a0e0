//! Run Loop / Batch Scheduler.
//!
//! A run moves `Idle -> Preflight -> Sending (-> Cooldown -> Sending)* ->
//! Done | Aborted`. Preflight resolves the pending list once; sending walks
//! it in order, taking a quota reservation before every attempt and applying
//! the classifier's recovery action on failure. The pending list is never
//! reloaded mid-run.

mod backoff;
mod cancel;
mod outcome;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

pub use backoff::{between_messages, reconnect_pause, throttle_backoff};
pub use cancel::CancelFlag;
pub use outcome::{
    AbortReason, AttemptOutcome, AttemptReport, BatchReport, Recovered, RunState, RunSummary,
    StopReason,
};

use crate::campaign::{CampaignConfig, RecipientRecord, RunMode, load_recipients};
use crate::classify::{Recovery, recovery};
use crate::clock::Clock;
use crate::eligibility::{
    ExclusionSources, GlobalDedupe, Resolution, load_account_map, load_exclusions, resolve,
};
use crate::error::Result;
use crate::ledger::{Ledger, LedgerEntry, Status, append_suppressed, slot_token};
use crate::quota::{
    Acquired, LimitKind, QuotaPolicy, QuotaScope, Reservation, Saturation, ScopeGroup, WindowStats,
    window_stats,
};
use crate::render::{Composer, OutgoingMessage};
use crate::transport::Transport;

/// A quota scope as seen at preflight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSnapshot {
    /// The scope.
    pub scope: QuotaScope,
    /// Window statistics at preflight time.
    pub stats: WindowStats,
}

impl ScopeSnapshot {
    /// Returns the stop reason if this is a stopping scope whose window is
    /// already full.
    #[must_use]
    pub fn blocked(&self, now: DateTime<Utc>) -> Option<StopReason> {
        let policy = &self.scope.policy;
        if policy.saturation != Saturation::Stop {
            return None;
        }
        let fallback = now + policy.window;
        let full = if policy.max_events.is_some_and(|max| self.stats.occupancy >= max) {
            Some((LimitKind::Messages, self.stats.resume_messages))
        } else if policy
            .max_unique_external
            .is_some_and(|max| self.stats.unique_external() >= max)
        {
            Some((LimitKind::UniqueExternal, self.stats.resume_unique_external))
        } else {
            None
        };
        full.map(|(limit, resume)| StopReason::WindowCapReached {
            scope: self.scope.name.clone(),
            limit,
            resume_at: resume.unwrap_or(fallback),
        })
    }
}

/// What preflight found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preflight {
    /// Pending list and skip counts.
    pub resolution: Resolution,
    /// Quota scopes with their current windows.
    pub scopes: Vec<ScopeSnapshot>,
    /// Set when a stopping scope is already full.
    pub blocked: Option<StopReason>,
}

/// Progress notifications.
#[derive(Debug)]
pub enum RunEvent<'a> {
    /// Preflight finished.
    Preflight(&'a Preflight),
    /// One attempt finished (or failed before its retry).
    Attempt(AttemptReport<'a>),
    /// A batch finished in repeat mode.
    Batch(BatchReport),
    /// The run ended.
    Stopped(&'a StopReason),
}

type Observer = Box<dyn FnMut(&RunEvent<'_>) + Send>;

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    sent: u32,
    invalid: u32,
    errors: u32,
    dry_run: u32,
}

enum Gate {
    Open(Vec<Reservation>),
    Closed(StopReason),
}

/// Drives one campaign run.
pub struct RunLoop<T, C> {
    config: CampaignConfig,
    composer: Composer,
    ledger: Ledger,
    shared_ledger: Option<Ledger>,
    groups: Vec<ScopeGroup>,
    transport: T,
    clock: C,
    cancel: CancelFlag,
    observer: Option<Observer>,
    state: RunState,
    counters: Counters,
}

impl<T: Transport, C: Clock> RunLoop<T, C> {
    /// Creates a run for a resolved campaign.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Render`] if the template cannot be prepared.
    pub fn new(config: CampaignConfig, transport: T, clock: C) -> Result<Self> {
        let composer = Composer::new(&config.from, &config.unsubscribe, &config.template)?;
        let mut scopes = config.quota_scopes();
        // Stopping scopes first, so a deferral never follows a long wait.
        scopes.sort_by_key(|s| s.policy.saturation != Saturation::Stop);
        Ok(Self {
            groups: ScopeGroup::partition(scopes),
            ledger: config.ledger(),
            shared_ledger: config.files.domain_ledger.as_ref().map(Ledger::new),
            config,
            composer,
            transport,
            clock,
            cancel: CancelFlag::new(),
            observer: None,
            state: RunState::Idle,
            counters: Counters::default(),
        })
    }

    /// Uses an externally owned cancel flag.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Registers a progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: impl FnMut(&RunEvent<'_>) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// The cancel flag.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// The campaign being run.
    #[must_use]
    pub const fn config(&self) -> &CampaignConfig {
        &self.config
    }

    /// The transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Resolves the pending list and snapshots the quota windows.
    ///
    /// Exclusion files are read once here.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient list, a ledger or an exclusion file
    /// cannot be read.
    pub fn preflight(&mut self) -> Result<Preflight> {
        self.state = RunState::Preflight;
        let files = &self.config.files;

        let recipients = load_recipients(&files.recipients)?;
        let global = self.global_dedupe()?;
        let exclusions = load_exclusions(&ExclusionSources {
            ledger: &self.ledger,
            recipients: &files.recipients,
            unsubscribed: &files.unsubscribe_file,
            suppressed: &files.suppress_file,
            global: global.as_ref(),
        })?;
        let resolution = resolve(recipients, &exclusions);

        let now = self.clock.now();
        let mut scopes = Vec::new();
        for scope in self.scopes() {
            scopes.push(ScopeSnapshot {
                stats: scope.stats(now)?,
                scope: scope.clone(),
            });
        }
        let blocked = scopes.iter().find_map(|s| s.blocked(now));

        info!(
            campaign = %self.config.name,
            total = resolution.total,
            pending = resolution.pending.len(),
            skipped = resolution.skipped_total(),
            duplicates = resolution.duplicates,
            "Preflight complete"
        );
        Ok(Preflight {
            resolution,
            scopes,
            blocked,
        })
    }

    /// Runs the campaign to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error if a ledger or exclusion file cannot be read or
    /// written. Quota accounting depends on the ledgers, so the run stops.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let preflight = self.preflight()?;
        self.emit(&RunEvent::Preflight(&preflight));

        let mode = self.config.mode;
        let early = if mode == RunMode::Preflight {
            Some(StopReason::Preflight)
        } else if preflight.resolution.pending.is_empty() {
            Some(StopReason::Exhausted)
        } else if mode == RunMode::Live {
            preflight.blocked.clone()
        } else {
            None
        };
        if let Some(reason) = early {
            return Ok(self.finish(reason));
        }

        let pending = preflight.resolution.pending;
        let reason = if mode == RunMode::DryRun {
            self.dry_run(&pending)?
        } else {
            let result = self.send_all(&pending).await;
            self.transport.reset().await;
            result?
        };
        Ok(self.finish(reason))
    }

    fn global_dedupe(&self) -> Result<Option<GlobalDedupe>> {
        let Some(settings) = &self.config.dedupe else {
            return Ok(None);
        };
        let dedupe = if settings.account_map.is_file() {
            GlobalDedupe::from_account_map(&load_account_map(&settings.account_map)?)
        } else {
            let dir = self
                .config
                .files
                .recipients
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            GlobalDedupe::discover(dir, &settings.ledger_pattern, &settings.recipients_pattern)?
        };
        if dedupe.is_empty() {
            warn!(campaign = %self.config.name, "Global dedupe is on but no campaign files were found");
        }
        Ok(Some(dedupe))
    }

    fn dry_run(&mut self, pending: &[RecipientRecord]) -> Result<StopReason> {
        self.state = RunState::Sending;
        for (i, record) in pending.iter().enumerate() {
            if self.cancelled() {
                return Ok(StopReason::Cancelled);
            }
            self.ledger.append(&LedgerEntry::new(
                self.clock.now(),
                &record.address,
                Status::DryRun,
                "not_sent",
            ))?;
            self.counters.dry_run += 1;
            self.report(i + 1, pending.len(), &record.address, &AttemptOutcome::DryRun);
        }
        Ok(StopReason::Exhausted)
    }

    async fn send_all(&mut self, pending: &[RecipientRecord]) -> Result<StopReason> {
        if let Err(e) = self.transport.connect().await {
            if recovery(&e) == Recovery::AbortAuth {
                return Ok(StopReason::Aborted(AbortReason::AuthFailed(e.to_string())));
            }
            warn!(error = %e, "Initial connect failed; retrying on first send");
        }

        let total = pending.len();
        let repeat = self.config.pacing.repeat;
        let mut index = 0;

        loop {
            let batch_limit = if repeat {
                if let Some(reason) = self.run_cap_reached() {
                    return Ok(reason);
                }
                self.batch_limit()
            } else {
                u32::MAX
            };
            if batch_limit == 0 {
                return Ok(StopReason::Exhausted);
            }

            self.state = RunState::Sending;
            let mut batch_sent = 0;
            let mut stop = None;
            while index < total {
                if let Some(reason) = self.pre_attempt_stop() {
                    stop = Some(reason);
                    break;
                }
                let record = &pending[index];
                index += 1;

                let sent_before = self.counters.sent;
                stop = self.attempt(index, total, record).await?;
                batch_sent += self.counters.sent - sent_before;
                if stop.is_none() {
                    stop = self.run_cap_reached();
                }

                if stop.is_some() || (repeat && batch_sent >= batch_limit) || index >= total {
                    break;
                }
                self.pause(between_messages(&self.config.pacing)).await;
            }
            if stop.is_none() && index >= total {
                stop = Some(StopReason::Exhausted);
            }
            if !repeat {
                return Ok(stop.unwrap_or(StopReason::Exhausted));
            }

            let cooldown = if stop.is_none() {
                self.config.pacing.cooldown
            } else {
                Duration::ZERO
            };
            let remaining = total - index;
            let remaining_estimate = self.config.pacing.max_total.map_or(remaining, |max| {
                remaining.min(usize::try_from(max.saturating_sub(self.counters.sent)).unwrap_or(usize::MAX))
            });
            self.emit(&RunEvent::Batch(BatchReport {
                sent: batch_sent,
                total: self.counters.sent,
                remaining_estimate,
                next_sleep: cooldown,
            }));

            if let Some(reason) = stop {
                return Ok(reason);
            }
            if !cooldown.is_zero() {
                self.state = RunState::Cooldown;
                info!(seconds = cooldown.as_secs(), "Cooling down before next batch");
                self.pause(cooldown).await;
            }
        }
    }

    /// Sends to one recipient, applying recovery on failure. Returns a stop
    /// reason if the run must end.
    async fn attempt(
        &mut self,
        position: usize,
        total: usize,
        record: &RecipientRecord,
    ) -> Result<Option<StopReason>> {
        let to = record.address.as_str();
        let message = self.composer.compose(record);

        let reservations = match self.admit(to).await? {
            Gate::Open(reservations) => reservations,
            Gate::Closed(reason) => return Ok(Some(reason)),
        };
        let error = match self.transport.send_message(&message).await {
            Ok(()) => {
                self.record_sent(to, None, &reservations)?;
                self.report(position, total, to, &AttemptOutcome::Sent(None));
                return Ok(None);
            }
            Err(error) => error,
        };

        let detail = error.to_string();
        let action = recovery(&error);
        debug!(recipient = %to, ?action, %detail, "Send failed");
        match action {
            Recovery::Invalid => {
                self.record(to, Status::Invalid, &detail)?;
                self.counters.invalid += 1;
                if self.config.suppress_invalid {
                    append_suppressed(&self.config.files.suppress_file, to)?;
                }
                self.report(position, total, to, &AttemptOutcome::Invalid(detail));
                Ok(None)
            }
            Recovery::Continue => {
                self.record_error(to, &detail)?;
                self.report(position, total, to, &AttemptOutcome::Error(detail));
                Ok(None)
            }
            Recovery::AbortAuth => {
                self.record_error(to, &format!("auth_failed: {detail}"))?;
                Ok(Some(self.abort(position, total, to, AbortReason::AuthFailed(detail))))
            }
            Recovery::AbortHardLimit => {
                self.record_error(to, &detail)?;
                let resume_at = self.hard_limit_resume()?;
                Ok(Some(self.abort(
                    position,
                    total,
                    to,
                    AbortReason::HardLimit { detail, resume_at },
                )))
            }
            Recovery::Reconnect => {
                self.record_error(to, &format!("disconnected: {detail}"))?;
                self.report(position, total, to, &AttemptOutcome::Disconnected(detail));
                self.transport.reset().await;
                if !self.pause(reconnect_pause(&self.config.pacing)).await {
                    return Ok(Some(StopReason::Cancelled));
                }
                self.retry(position, total, to, &message, Recovered::Reconnect).await
            }
            Recovery::Backoff => {
                self.record_error(to, &detail)?;
                let backoff = throttle_backoff(&self.config.pacing);
                self.report(position, total, to, &AttemptOutcome::Throttled { detail, backoff });
                if !self.pause(backoff).await {
                    return Ok(Some(StopReason::Cancelled));
                }
                self.transport.reset().await;
                if !self.pause(reconnect_pause(&self.config.pacing)).await {
                    return Ok(Some(StopReason::Cancelled));
                }
                self.retry(position, total, to, &message, Recovered::ThrottleRetry).await
            }
        }
    }

    /// The single retry after a reconnect or a throttling reply. Any failure
    /// aborts the run.
    async fn retry(
        &mut self,
        position: usize,
        total: usize,
        to: &str,
        message: &OutgoingMessage,
        kind: Recovered,
    ) -> Result<Option<StopReason>> {
        let reservations = match self.admit(to).await? {
            Gate::Open(reservations) => reservations,
            Gate::Closed(reason) => return Ok(Some(reason)),
        };
        match self.transport.send_message(message).await {
            Ok(()) => {
                self.record_sent(to, Some(kind), &reservations)?;
                self.report(position, total, to, &AttemptOutcome::Sent(Some(kind)));
                Ok(None)
            }
            Err(error) => {
                let detail = error.to_string();
                let (prefix, reason) = match kind {
                    Recovered::Reconnect => ("reconnect_failed", AbortReason::ReconnectFailed(detail.clone())),
                    Recovered::ThrottleRetry => ("retry_failed", AbortReason::RetryFailed(detail.clone())),
                };
                self.record_error(to, &format!("{prefix}: {detail}"))?;
                Ok(Some(self.abort(position, total, to, reason)))
            }
        }
    }

    /// Takes one reservation per quota ledger. A cancel during a quota wait
    /// closes the gate.
    async fn admit(&self, to: &str) -> Result<Gate> {
        let mut granted = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let acquired = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(Gate::Closed(StopReason::Cancelled)),
                acquired = group.acquire(to, &self.clock) => acquired?,
            };
            match acquired {
                Acquired::Granted(reservation) => granted.push(reservation),
                Acquired::Deferred {
                    scope,
                    resume_at,
                    limit,
                } => {
                    return Ok(Gate::Closed(StopReason::WindowCapReached {
                        scope,
                        limit,
                        resume_at,
                    }));
                }
            }
        }
        Ok(Gate::Open(granted))
    }

    /// Sleeps unless cancelled first. Returns false on cancel.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = self.clock.sleep(duration) => true,
        }
    }

    fn scopes(&self) -> impl Iterator<Item = &QuotaScope> {
        self.groups.iter().flat_map(ScopeGroup::scopes)
    }

    /// When the provider quota behind a hard-limit reply should have room
    /// again: the latest point at which a guarded window frees up, or the
    /// campaign ledger's trailing day when no scope has events.
    fn hard_limit_resume(&self) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        let mut latest: Option<DateTime<Utc>> = None;
        for scope in self.scopes() {
            latest = latest.max(scope.stats(now)?.resume_messages);
        }
        if let Some(at) = latest {
            return Ok(at);
        }
        let daily = QuotaPolicy::daily(None, None, self.config.limits.owned_domains.clone());
        let stats = window_stats(&self.ledger.read_all()?, &daily, now);
        Ok(stats.resume_messages.unwrap_or(now + daily.window))
    }

    /// Records a delivery in the campaign ledger and settles every
    /// reservation. A scope ledger other than the campaign ledger gets its
    /// own `SENT` row carrying the slot token.
    fn record_sent(&mut self, to: &str, recovered: Option<Recovered>, reservations: &[Reservation]) -> Result<()> {
        let now = self.clock.now();
        let marker = recovered.map(Recovered::marker);

        let own_slot = reservations
            .iter()
            .find(|r| r.ledger.same_file(&self.ledger))
            .map(|r| slot_token(r.reserved_at));
        self.ledger.append(&LedgerEntry::new(
            now,
            to,
            Status::Sent,
            &join_info(marker, own_slot.as_deref()),
        ))?;

        let mut shared_settled = false;
        for reservation in reservations.iter().filter(|r| !r.ledger.same_file(&self.ledger)) {
            let token = slot_token(reservation.reserved_at);
            reservation
                .ledger
                .append(&LedgerEntry::new(now, to, Status::Sent, &token))?;
            shared_settled |= self
                .shared_ledger
                .as_ref()
                .is_some_and(|shared| reservation.ledger.same_file(shared));
        }
        if let Some(shared) = self.shared_ledger.as_ref().filter(|_| !shared_settled) {
            shared.append(&LedgerEntry::new(now, to, Status::Sent, ""))?;
        }

        self.counters.sent += 1;
        Ok(())
    }

    fn record(&self, to: &str, status: Status, info: &str) -> Result<()> {
        self.ledger
            .append(&LedgerEntry::new(self.clock.now(), to, status, info))
    }

    fn record_error(&mut self, to: &str, info: &str) -> Result<()> {
        self.record(to, Status::Error, info)?;
        self.counters.errors += 1;
        Ok(())
    }

    fn abort(&mut self, position: usize, total: usize, to: &str, reason: AbortReason) -> StopReason {
        warn!(recipient = %to, %reason, "Run aborted");
        self.report(position, total, to, &AttemptOutcome::Aborted(reason.clone()));
        StopReason::Aborted(reason)
    }

    fn batch_limit(&self) -> u32 {
        let pacing = &self.config.pacing;
        let mut limit = pacing.batch_size;
        if let Some(max) = pacing.max_per_run {
            limit = limit.min(max);
        }
        if let Some(max) = pacing.max_total {
            limit = limit.min(max.saturating_sub(self.counters.sent));
        }
        limit
    }

    fn run_cap_reached(&self) -> Option<StopReason> {
        let pacing = &self.config.pacing;
        let sent = self.counters.sent;
        if let Some(max) = pacing.max_per_run.filter(|max| sent >= *max) {
            return Some(StopReason::MaxPerRun(max));
        }
        pacing
            .max_total
            .filter(|max| pacing.repeat && sent >= *max)
            .map(StopReason::MaxTotal)
    }

    fn pre_attempt_stop(&self) -> Option<StopReason> {
        if self.cancelled() {
            return Some(StopReason::Cancelled);
        }
        self.run_cap_reached()
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn report(&mut self, position: usize, total: usize, recipient: &str, outcome: &AttemptOutcome) {
        debug!(position, total, recipient = %recipient, ?outcome, "Attempt finished");
        self.emit(&RunEvent::Attempt(AttemptReport {
            position,
            total,
            recipient,
            outcome,
        }));
    }

    fn emit(&mut self, event: &RunEvent<'_>) {
        if let Some(observer) = self.observer.as_mut() {
            observer(event);
        }
    }

    fn finish(&mut self, reason: StopReason) -> RunSummary {
        self.state = reason.state();
        self.emit(&RunEvent::Stopped(&reason));
        let counters = self.counters;
        info!(
            state = %self.state,
            reason = %reason,
            sent = counters.sent,
            invalid = counters.invalid,
            errors = counters.errors,
            "Run finished"
        );
        RunSummary {
            state: self.state,
            resume_at: reason.resume_at(),
            stop_reason: reason,
            sent: counters.sent,
            invalid: counters.invalid,
            errors: counters.errors,
            dry_run: counters.dry_run,
        }
    }
}

fn join_info(marker: Option<&str>, slot: Option<&str>) -> String {
    match (marker, slot) {
        (Some(m), Some(s)) => format!("{m} {s}"),
        (Some(v), None) | (None, Some(v)) => v.to_string(),
        (None, None) => String::new(),
    }
}
