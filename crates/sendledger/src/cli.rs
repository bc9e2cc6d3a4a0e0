//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use sendledger_core::campaign::{DEFAULT_CAMPAIGN_FILE, ProfileFields, ProviderKind, RunMode, SecurityMode};
use sendledger_core::quota::Saturation;
use sendledger_core::transport::SessionPolicy;

/// sendledger - quota-aware email campaign sender
#[derive(Parser, Debug)]
#[command(
    name = "sendledger",
    version,
    about = "Send email campaigns under shared rolling-window quotas",
    long_about = "sendledger walks a campaign's pending recipients, reserving a slot in every \
                  shared quota ledger before each attempt, so several accounts or processes \
                  sending from the same domain never exceed the provider's caps.\n\n\
                  Every send, failure and reservation is appended to CSV ledgers; rerunning a \
                  campaign only contacts recipients that were never handled."
)]
pub struct Cli {
    /// Campaign file
    #[arg(short, long, global = true, default_value = DEFAULT_CAMPAIGN_FILE, env = "SENDLEDGER_CAMPAIGN")]
    pub campaign: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a campaign (or preview it with --dry-run / --preflight)
    Send(Box<SendArgs>),

    /// Show window usage and health for ledgers
    #[command(visible_alias = "st")]
    Status(StatusArgs),

    /// Count what is left to send per campaign
    Pending(PendingArgs),

    /// List the profiles in the campaign file
    Profiles,
}

/// Arguments for `send`. Every field left unset falls back to the profile,
/// then `[defaults]`, then the provider preset.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Profile in the campaign file
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Record DRYRUN rows without sending
    #[arg(long, conflicts_with = "preflight")]
    pub dry_run: bool,

    /// Report the pending list and quota windows, then stop
    #[arg(long)]
    pub preflight: bool,

    /// Provider (private-email, gmail, sendgrid, smtp)
    #[arg(long, value_parser = parse_provider)]
    pub provider: Option<ProviderKind>,

    /// Sender address
    #[arg(long)]
    pub from: Option<String>,

    /// SMTP login
    #[arg(long)]
    pub username: Option<String>,

    /// SMTP password (prefer the profile's password_env)
    #[arg(long, env = "SENDLEDGER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Unsubscribe address
    #[arg(long)]
    pub unsubscribe: Option<String>,

    /// Template name
    #[arg(long)]
    pub template: Option<String>,

    /// Recipient list
    #[arg(long)]
    pub recipients: Option<PathBuf>,

    /// Campaign ledger
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Shared ledger for the hourly cap
    #[arg(long)]
    pub domain_ledger: Option<PathBuf>,

    /// Unsubscribe list
    #[arg(long)]
    pub unsubscribe_file: Option<PathBuf>,

    /// Suppression list
    #[arg(long)]
    pub suppress_file: Option<PathBuf>,

    /// Skip recipients handled or queued by other campaigns
    #[arg(long)]
    pub global_dedupe: bool,

    /// Account map used by --global-dedupe
    #[arg(long)]
    pub account_map: Option<PathBuf>,

    /// SMTP host
    #[arg(long)]
    pub host: Option<String>,

    /// SMTP port
    #[arg(long)]
    pub port: Option<u16>,

    /// SMTP security
    #[arg(long, value_enum, ignore_case = true)]
    pub security: Option<SecurityArg>,

    /// SMTP session policy
    #[arg(long, value_enum, ignore_case = true)]
    pub session: Option<SessionArg>,

    /// Hourly message cap on the domain ledger (0 = off)
    #[arg(long)]
    pub max_messages_1h: Option<u32>,

    /// Daily message cap on the campaign ledger (0 = off)
    #[arg(long)]
    pub max_messages_24h: Option<u32>,

    /// Daily distinct-external-recipient cap (0 = off)
    #[arg(long)]
    pub max_unique_external_24h: Option<u32>,

    /// What to do when the hourly cap is full
    #[arg(long, value_enum, ignore_case = true)]
    pub on_hourly_cap: Option<CapAction>,

    /// What to do when a daily cap is full
    #[arg(long, value_enum, ignore_case = true)]
    pub on_daily_cap: Option<CapAction>,

    /// Domains that do not count as external, comma-separated
    #[arg(long, value_delimiter = ',')]
    pub owned_domains: Option<Vec<String>>,

    /// Stop after this many sends across all batches (repeat mode)
    #[arg(long)]
    pub max_total: Option<u32>,

    /// Stop after this many sends in this run
    #[arg(long)]
    pub max_per_run: Option<u32>,

    /// Sends per batch in repeat mode
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Seconds between messages
    #[arg(long)]
    pub interval: Option<u64>,

    /// Extra random seconds added to each interval
    #[arg(long)]
    pub jitter: Option<u64>,

    /// Seconds to pause between batches
    #[arg(long)]
    pub cooldown: Option<u64>,

    /// Keep sending in batches until the list or a cap is exhausted
    #[arg(long)]
    pub repeat: bool,

    /// Add rejected recipients to the suppression list
    #[arg(long)]
    pub suppress_invalid: bool,
}

impl SendArgs {
    /// Run mode selected by the flags.
    pub const fn mode(&self) -> RunMode {
        if self.preflight {
            RunMode::Preflight
        } else if self.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Live
        }
    }

    /// Flags as the top resolution layer. Switches only override when set.
    pub fn overrides(&self) -> ProfileFields {
        ProfileFields {
            provider: self.provider,
            from: self.from.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            unsubscribe: self.unsubscribe.clone(),
            template: self.template.clone(),
            recipients: self.recipients.clone(),
            ledger: self.ledger.clone(),
            domain_ledger: self.domain_ledger.clone(),
            unsubscribe_file: self.unsubscribe_file.clone(),
            suppress_file: self.suppress_file.clone(),
            global_dedupe: self.global_dedupe.then_some(true),
            account_map: self.account_map.clone(),
            host: self.host.clone(),
            port: self.port,
            security: self.security.map(Into::into),
            session: self.session.map(Into::into),
            max_messages_1h: self.max_messages_1h,
            max_messages_24h: self.max_messages_24h,
            max_unique_external_24h: self.max_unique_external_24h,
            on_hourly_cap: self.on_hourly_cap.map(Into::into),
            on_daily_cap: self.on_daily_cap.map(Into::into),
            owned_domains: self.owned_domains.clone(),
            max_total: self.max_total,
            max_per_run: self.max_per_run,
            batch_size: self.batch_size,
            interval_secs: self.interval,
            jitter_secs: self.jitter,
            cooldown_secs: self.cooldown,
            repeat: self.repeat.then_some(true),
            suppress_invalid: self.suppress_invalid.then_some(true),
            ..ProfileFields::default()
        }
    }
}

/// `--security` values.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityArg {
    /// Plain text
    None,
    /// Upgrade with STARTTLS
    #[value(name = "starttls")]
    StartTls,
    /// Implicit TLS
    Tls,
}

impl From<SecurityArg> for SecurityMode {
    fn from(arg: SecurityArg) -> Self {
        match arg {
            SecurityArg::None => Self::None,
            SecurityArg::StartTls => Self::StartTls,
            SecurityArg::Tls => Self::Tls,
        }
    }
}

/// `--session` values.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionArg {
    /// One connection for the whole run
    Persistent,
    /// A fresh connection per message
    PerMessage,
}

impl From<SessionArg> for SessionPolicy {
    fn from(arg: SessionArg) -> Self {
        match arg {
            SessionArg::Persistent => Self::Persistent,
            SessionArg::PerMessage => Self::PerMessage,
        }
    }
}

/// What to do when a cap is full.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapAction {
    /// Sleep until the window has room
    Wait,
    /// End the run with a resume time
    Stop,
}

impl From<CapAction> for Saturation {
    fn from(arg: CapAction) -> Self {
        match arg {
            CapAction::Wait => Self::Wait,
            CapAction::Stop => Self::Stop,
        }
    }
}

/// Window length for `status`.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WindowArg {
    /// Trailing hour
    #[value(name = "1h")]
    Hour,
    /// Trailing 24 hours
    #[default]
    #[value(name = "24h")]
    Day,
}

/// Arguments for `status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Ledgers to inspect (defaults to every ledger in the account map)
    #[arg(value_name = "LEDGER")]
    pub ledgers: Vec<PathBuf>,

    /// Account map listing campaign ledgers
    #[arg(long, default_value = "account_map.csv")]
    pub account_map: PathBuf,

    /// Shared domain ledger to include
    #[arg(long)]
    pub domain_ledger: Option<PathBuf>,

    /// Window to report
    #[arg(short, long, value_enum, default_value_t)]
    pub window: WindowArg,

    /// Message cap used for the health label
    #[arg(long)]
    pub max_messages: Option<u32>,

    /// Unique-external cap used for the health label (24h window)
    #[arg(long)]
    pub max_unique_external: Option<u32>,

    /// Domains that do not count as external, comma-separated
    #[arg(long, value_delimiter = ',')]
    pub owned_domains: Vec<String>,
}

/// Arguments for `pending`.
#[derive(Args, Debug)]
pub struct PendingArgs {
    /// Account map listing every campaign
    #[arg(long, default_value = "account_map.csv")]
    pub account_map: PathBuf,

    /// Unsubscribe list
    #[arg(long, default_value = "unsubscribed.csv")]
    pub unsubscribe_file: PathBuf,

    /// Suppression list
    #[arg(long, default_value = "suppressed.csv")]
    pub suppress_file: PathBuf,

    /// Print the pending addresses
    #[arg(long)]
    pub list: bool,
}

fn parse_provider(s: &str) -> Result<ProviderKind, String> {
    ProviderKind::parse(s).ok_or_else(|| format!("unknown provider '{s}'"))
}

/// Exit codes.
pub mod exit_codes {
    /// Finished (including window stops, caps and cancellation).
    pub const SUCCESS: i32 = 0;
    /// The run aborted and needs attention.
    pub const ABORTED: i32 = 1;
    /// Configuration or input error.
    pub const CONFIG_ERROR: i32 = 2;
    /// `status` found ledgers needing attention.
    pub const ISSUES_FOUND: i32 = 3;
    /// A ledger, file or network failure stopped the command.
    pub const RUNTIME_ERROR: i32 = 4;
    /// A second Ctrl-C ended the process mid-run.
    pub const INTERRUPTED: i32 = 130;
}
