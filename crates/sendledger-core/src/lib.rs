//! # sendledger-core
//!
//! Quota-aware send scheduler for email campaigns.
//!
//! This crate provides:
//! - **Ledger Store** - append-only CSV logs shared between processes under
//!   file locks
//! - **Quota Guard** - rolling-window admission with durable `SLOT`
//!   reservations
//! - **Eligibility Resolver** - pending-list resolution with per-reason skip
//!   counts
//! - **Delivery Classifier** - maps transport failures to recovery actions
//! - **Run Loop** - batches, pacing, cooldowns and run-level caps
//! - Campaign files, template rendering, SMTP and HTTP API transports, and
//!   status/pending reports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod address;
pub mod campaign;
pub mod classify;
pub mod clock;
pub mod eligibility;
mod error;
pub mod ledger;
pub mod quota;
pub mod render;
pub mod report;
pub mod runner;
mod table;
pub mod transport;

pub use address::{OwnedDomains, normalize_address};
pub use campaign::{
    CampaignConfig, CampaignFile, ProfileFields, ProviderKind, RecipientRecord, RunMode,
    ValidationError, ValidationResult, validate_campaign,
};
pub use classify::{Category, Recovery, classify, recovery};
pub use clock::{Clock, MockClock, SystemClock};
pub use eligibility::{Exclusions, Resolution, SkipReason, resolve};
pub use error::{Error, Result};
pub use ledger::{Ledger, LedgerEntry, Status};
pub use quota::{QuotaPolicy, QuotaScope, Saturation, WindowStats};
pub use runner::{CancelFlag, RunEvent, RunLoop, RunState, RunSummary, StopReason};
pub use table::read_address_file;
pub use transport::{ProviderTransport, Transport, TransportError};
