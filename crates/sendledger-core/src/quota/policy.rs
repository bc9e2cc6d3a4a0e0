//! Rolling-window policies and the scopes they apply to.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::address::OwnedDomains;
use crate::ledger::Ledger;

/// What the guard does when a window is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Saturation {
    /// Sleep until the oldest event leaves the window, then retry.
    #[default]
    Wait,
    /// Give up and report when the window frees up.
    Stop,
}

/// A rolling-window cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Trailing window length.
    pub window: TimeDelta,
    /// Maximum reservations/sends per window, if capped.
    pub max_events: Option<u32>,
    /// Maximum distinct external recipients per window, if capped.
    pub max_unique_external: Option<u32>,
    /// Domains that are not external.
    pub owned_domains: OwnedDomains,
    /// Behavior on saturation.
    pub saturation: Saturation,
}

impl QuotaPolicy {
    /// One-hour message cap that waits for capacity.
    #[must_use]
    pub fn hourly(max_events: u32) -> Self {
        Self {
            window: TimeDelta::hours(1),
            max_events: Some(max_events),
            max_unique_external: None,
            owned_domains: OwnedDomains::default(),
            saturation: Saturation::Wait,
        }
    }

    /// 24-hour message and unique-external caps that stop the run when hit.
    #[must_use]
    pub fn daily(
        max_events: Option<u32>,
        max_unique_external: Option<u32>,
        owned_domains: OwnedDomains,
    ) -> Self {
        Self {
            window: TimeDelta::hours(24),
            max_events,
            max_unique_external,
            owned_domains,
            saturation: Saturation::Stop,
        }
    }

    /// Overrides the saturation behavior.
    #[must_use]
    pub const fn with_saturation(mut self, saturation: Saturation) -> Self {
        self.saturation = saturation;
        self
    }

    /// Returns true if the policy caps anything.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.max_events.is_some() || self.max_unique_external.is_some()
    }
}

/// A policy bound to the ledger that records its events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaScope {
    /// Name used in logs and stop reasons (e.g. `domain-1h`).
    pub name: String,
    /// Ledger shared by every process under this scope.
    pub ledger: Ledger,
    /// The cap.
    pub policy: QuotaPolicy,
}

impl QuotaScope {
    /// Creates a scope.
    #[must_use]
    pub fn new(name: impl Into<String>, ledger: Ledger, policy: QuotaPolicy) -> Self {
        Self {
            name: name.into(),
            ledger,
            policy,
        }
    }
}
