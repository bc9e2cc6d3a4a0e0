//! Campaign file parsing and resolution.
//!
//! A campaign file holds shared `[defaults]`, named `[templates.*]` and one
//! `[profiles.*]` table per sending account. Resolution layers, highest
//! first: explicit overrides (CLI flags), the selected profile, `[defaults]`,
//! the provider preset, then built-in defaults. The result is one
//! [`CampaignConfig`]; nothing downstream looks at profile names.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sendledger_smtp::{Credentials, Security, SessionConfig};

use super::validation::ValidationError;
use crate::address::{OwnedDomains, domain_of, normalize_address};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::quota::{QuotaPolicy, QuotaScope, Saturation};
use crate::transport::{ApiTransport, ProviderTransport, SENDGRID_ENDPOINT, SessionPolicy, SmtpTransport};

/// Default campaign file name.
pub const DEFAULT_CAMPAIGN_FILE: &str = "sendledger.toml";

/// Mail provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// PrivateEmail SMTP (hourly shared cap, one session per message).
    #[serde(alias = "private")]
    PrivateEmail,
    /// Gmail / Google Workspace SMTP (daily caps, persistent session).
    Gmail,
    /// SendGrid HTTP API.
    Sendgrid,
    /// Any other SMTP server.
    Smtp,
}

impl ProviderKind {
    /// Parses a provider name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "private-email" | "private" => Some(Self::PrivateEmail),
            "gmail" => Some(Self::Gmail),
            "sendgrid" => Some(Self::Sendgrid),
            "smtp" => Some(Self::Smtp),
            _ => None,
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrivateEmail => "private-email",
            Self::Gmail => "gmail",
            Self::Sendgrid => "sendgrid",
            Self::Smtp => "smtp",
        }
    }

    /// Preset defaults for this provider.
    #[must_use]
    pub fn preset(self) -> ProfileFields {
        match self {
            Self::PrivateEmail => ProfileFields {
                host: Some("mail.privateemail.com".into()),
                port: Some(587),
                security: Some(SecurityMode::StartTls),
                session: Some(SessionPolicy::PerMessage),
                max_messages_1h: Some(50),
                ..ProfileFields::default()
            },
            Self::Gmail => ProfileFields {
                host: Some("smtp.gmail.com".into()),
                port: Some(587),
                security: Some(SecurityMode::StartTls),
                session: Some(SessionPolicy::Persistent),
                max_messages_24h: Some(100),
                max_unique_external_24h: Some(100),
                ..ProfileFields::default()
            },
            Self::Sendgrid => ProfileFields {
                api_endpoint: Some(SENDGRID_ENDPOINT.into()),
                api_key_env: Some("SENDGRID_API_KEY".into()),
                ..ProfileFields::default()
            },
            Self::Smtp => ProfileFields {
                port: Some(587),
                security: Some(SecurityMode::StartTls),
                session: Some(SessionPolicy::Persistent),
                ..ProfileFields::default()
            },
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SMTP connection security as written in campaign files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Plain text.
    None,
    /// Upgrade with STARTTLS.
    #[default]
    StartTls,
    /// Implicit TLS.
    Tls,
}

impl From<SecurityMode> for Security {
    fn from(mode: SecurityMode) -> Self {
        match mode {
            SecurityMode::None => Self::None,
            SecurityMode::StartTls => Self::StartTls,
            SecurityMode::Tls => Self::Tls,
        }
    }
}

/// Whether a run talks to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Send.
    #[default]
    Live,
    /// Record `DRYRUN` rows without sending.
    DryRun,
    /// Report the pending list and stop.
    Preflight,
}

/// A message template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    /// Subject template.
    pub subject: String,
    /// Body template.
    pub body: String,
    /// PNG used for the `{SIGIMG}` marker.
    #[serde(default)]
    pub signature: Option<PathBuf>,
}

/// Every field a profile, `[defaults]` or the command line may set.
///
/// Caps of `0` mean "off".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileFields {
    /// Provider.
    pub provider: Option<ProviderKind>,
    /// Sender address.
    pub from: Option<String>,
    /// SMTP login (defaults to the sender).
    pub username: Option<String>,
    /// Environment variable holding the SMTP password.
    pub password_env: Option<String>,
    /// SMTP password. Never read from campaign files.
    #[serde(skip)]
    pub password: Option<String>,
    /// Unsubscribe address (defaults to the sender).
    pub unsubscribe: Option<String>,
    /// Template name.
    pub template: Option<String>,
    /// Recipient list.
    pub recipients: Option<PathBuf>,
    /// Campaign ledger.
    pub ledger: Option<PathBuf>,
    /// Shared ledger for the hourly cap (defaults to the campaign ledger).
    pub domain_ledger: Option<PathBuf>,
    /// Unsubscribe list.
    pub unsubscribe_file: Option<PathBuf>,
    /// Suppression list.
    pub suppress_file: Option<PathBuf>,
    /// Enables cross-account dedupe.
    pub global_dedupe: Option<bool>,
    /// Account map for cross-account dedupe.
    pub account_map: Option<PathBuf>,
    /// Sibling ledger pattern used without an account map.
    pub ledger_pattern: Option<String>,
    /// Sibling recipient-list pattern used without an account map.
    pub recipients_pattern: Option<String>,
    /// SMTP host.
    pub host: Option<String>,
    /// SMTP port.
    pub port: Option<u16>,
    /// SMTP security.
    pub security: Option<SecurityMode>,
    /// SMTP session policy.
    pub session: Option<SessionPolicy>,
    /// Hostname announced in EHLO.
    pub client_hostname: Option<String>,
    /// API endpoint.
    pub api_endpoint: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Hourly message cap on the domain ledger.
    pub max_messages_1h: Option<u32>,
    /// Daily message cap on the campaign ledger.
    pub max_messages_24h: Option<u32>,
    /// Daily distinct-external-recipient cap on the campaign ledger.
    pub max_unique_external_24h: Option<u32>,
    /// What to do when the hourly cap is reached.
    pub on_hourly_cap: Option<Saturation>,
    /// What to do when a daily cap is reached.
    pub on_daily_cap: Option<Saturation>,
    /// Domains that do not count as external (defaults to the sender's).
    pub owned_domains: Option<Vec<String>>,
    /// Cap on sends per run in repeat mode.
    pub max_total: Option<u32>,
    /// Cap on sends per invocation.
    pub max_per_run: Option<u32>,
    /// Messages per batch in repeat mode.
    pub batch_size: Option<u32>,
    /// Seconds between messages.
    pub interval_secs: Option<u64>,
    /// Upper bound of the random delay added to each interval.
    pub jitter_secs: Option<u64>,
    /// Seconds between batches in repeat mode.
    pub cooldown_secs: Option<u64>,
    /// Keep sending in batches until done.
    pub repeat: Option<bool>,
    /// Add invalid recipients to the suppression list.
    pub suppress_invalid: Option<bool>,
}

macro_rules! layer_fields {
    ($top:ident, $base:ident; $($field:ident),* $(,)?) => {
        ProfileFields { $($field: $top.$field.or($base.$field)),* }
    };
}

impl ProfileFields {
    /// Fills unset fields from `base`.
    #[must_use]
    pub fn over(self, base: Self) -> Self {
        let top = self;
        layer_fields!(top, base;
            provider, from, username, password_env, password, unsubscribe, template,
            recipients, ledger, domain_ledger, unsubscribe_file, suppress_file,
            global_dedupe, account_map, ledger_pattern, recipients_pattern,
            host, port, security, session, client_hostname, api_endpoint, api_key_env,
            max_messages_1h, max_messages_24h, max_unique_external_24h,
            on_hourly_cap, on_daily_cap, owned_domains,
            max_total, max_per_run, batch_size, interval_secs, jitter_secs, cooldown_secs,
            repeat, suppress_invalid,
        )
    }

    /// Resolves relative paths against `base`.
    fn rebase(mut self, base: &Path) -> Self {
        for path in [
            &mut self.recipients,
            &mut self.ledger,
            &mut self.domain_ledger,
            &mut self.unsubscribe_file,
            &mut self.suppress_file,
            &mut self.account_map,
        ]
        .into_iter()
        .flatten()
        {
            *path = rebase_path(base, path);
        }
        self
    }
}

fn rebase_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || base.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// A parsed campaign file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CampaignFile {
    /// Shared fields.
    pub defaults: ProfileFields,
    /// Templates by name.
    pub templates: BTreeMap<String, TemplateConfig>,
    /// Profiles by name.
    pub profiles: BTreeMap<String, ProfileFields>,
}

impl CampaignFile {
    /// Loads a campaign file; relative paths inside it resolve against its
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text, path.parent().unwrap_or_else(|| Path::new("")))
    }

    /// Parses campaign file text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Toml`] if the text is not a valid campaign file.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let mut file: Self = toml::from_str(text)?;
        // Shared lists default to files next to the campaign file.
        let defaults = &mut file.defaults;
        defaults.unsubscribe_file.get_or_insert_with(|| PathBuf::from(DEFAULT_UNSUBSCRIBE_FILE));
        defaults.suppress_file.get_or_insert_with(|| PathBuf::from(DEFAULT_SUPPRESS_FILE));
        defaults.account_map.get_or_insert_with(|| PathBuf::from(DEFAULT_ACCOUNT_MAP));
        file.defaults = file.defaults.rebase(base_dir);
        for profile in file.profiles.values_mut() {
            *profile = std::mem::take(profile).rebase(base_dir);
        }
        for template in file.templates.values_mut() {
            if let Some(sig) = &template.signature {
                template.signature = Some(rebase_path(base_dir, sig));
            }
        }
        Ok(file)
    }

    /// Profile names in sorted order.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Resolves a campaign using process environment variables for secrets.
    ///
    /// # Errors
    ///
    /// See [`CampaignFile::resolve_with`].
    pub fn resolve(
        &self,
        profile: Option<&str>,
        overrides: ProfileFields,
        mode: RunMode,
    ) -> Result<CampaignConfig> {
        self.resolve_with(profile, overrides, mode, |name| std::env::var(name).ok())
    }

    /// Resolves a campaign, reading secrets through `env`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown profile, or
    /// [`Error::Validation`] if the resolved configuration is invalid.
    pub fn resolve_with(
        &self,
        profile: Option<&str>,
        overrides: ProfileFields,
        mode: RunMode,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<CampaignConfig> {
        let selected = match profile {
            Some(name) => self
                .profiles
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Config(format!("unknown profile '{name}'")))?,
            None => ProfileFields::default(),
        };

        let layered = overrides.over(selected).over(self.defaults.clone());
        let Some(provider) = layered.provider else {
            return Err(Error::Validation(vec![ValidationError::MissingProvider]));
        };
        let fields = layered.over(provider.preset());

        let template_name = fields.template.clone().unwrap_or_default();
        let template = self.templates.get(&template_name).cloned().unwrap_or_default();
        let name = profile.map_or_else(|| template_name.clone(), str::to_string);

        let config = CampaignConfig::from_fields(name, provider, fields, template, mode, env);
        super::validate_campaign(&config).map_err(Error::Validation)?;
        Ok(config)
    }
}

/// SMTP delivery settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    /// Host.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Security.
    pub security: SecurityMode,
    /// Session policy.
    pub session: SessionPolicy,
    /// Login.
    pub username: String,
    /// Password, when available.
    pub password: Option<String>,
    /// EHLO hostname.
    pub client_hostname: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("session", &self.session)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// HTTP API delivery settings.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// Endpoint URL.
    pub endpoint: String,
    /// API key, when available.
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How messages leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// SMTP mailbox.
    Smtp(SmtpSettings),
    /// HTTP API.
    Api(ApiSettings),
}

/// Files a campaign reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignPaths {
    /// Recipient list.
    pub recipients: PathBuf,
    /// Campaign ledger.
    pub ledger: PathBuf,
    /// Shared hourly-cap ledger, if different from the campaign ledger.
    pub domain_ledger: Option<PathBuf>,
    /// Unsubscribe list.
    pub unsubscribe_file: PathBuf,
    /// Suppression list.
    pub suppress_file: PathBuf,
}

/// Cross-account dedupe inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupeSettings {
    /// Account map; used when it exists.
    pub account_map: PathBuf,
    /// Sibling ledger pattern.
    pub ledger_pattern: String,
    /// Sibling recipient-list pattern.
    pub recipients_pattern: String,
}

/// Rolling-window caps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Hourly message cap.
    pub max_messages_1h: Option<u32>,
    /// Daily message cap.
    pub max_messages_24h: Option<u32>,
    /// Daily distinct-external-recipient cap.
    pub max_unique_external_24h: Option<u32>,
    /// Domains that are not external.
    pub owned_domains: OwnedDomains,
    /// Hourly saturation behavior.
    pub on_hourly_cap: Saturation,
    /// Daily saturation behavior.
    pub on_daily_cap: Saturation,
}

/// Run pacing and run-level caps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    /// Pause between messages.
    pub interval: Duration,
    /// Upper bound of the random delay added to `interval`.
    pub jitter: Duration,
    /// Pause between batches.
    pub cooldown: Duration,
    /// Messages per batch in repeat mode.
    pub batch_size: u32,
    /// Repeat mode.
    pub repeat: bool,
    /// Sends per run in repeat mode.
    pub max_total: Option<u32>,
    /// Sends per invocation.
    pub max_per_run: Option<u32>,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            jitter: Duration::from_secs(DEFAULT_JITTER_SECS),
            cooldown: Duration::ZERO,
            batch_size: DEFAULT_BATCH_SIZE,
            repeat: false,
            max_total: None,
            max_per_run: None,
        }
    }
}

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_JITTER_SECS: u64 = 10;
const DEFAULT_BATCH_SIZE: u32 = 10;
const DEFAULT_UNSUBSCRIBE_FILE: &str = "unsubscribed.csv";
const DEFAULT_SUPPRESS_FILE: &str = "suppressed.csv";
const DEFAULT_ACCOUNT_MAP: &str = "account_map.csv";

/// A fully resolved campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignConfig {
    /// Profile (or template) name, for display only.
    pub name: String,
    /// Provider.
    pub provider: ProviderKind,
    /// Delivery settings.
    pub delivery: Delivery,
    /// Sender address.
    pub from: String,
    /// Unsubscribe address.
    pub unsubscribe: String,
    /// Template name.
    pub template_name: String,
    /// Template.
    pub template: TemplateConfig,
    /// Files.
    pub files: CampaignPaths,
    /// Cross-account dedupe, if enabled.
    pub dedupe: Option<DedupeSettings>,
    /// Caps.
    pub limits: Limits,
    /// Pacing.
    pub pacing: Pacing,
    /// Run mode.
    pub mode: RunMode,
    /// Suppress invalid recipients.
    pub suppress_invalid: bool,
}

fn cap(value: Option<u32>) -> Option<u32> {
    value.filter(|n| *n > 0)
}

impl CampaignConfig {
    fn from_fields(
        name: String,
        provider: ProviderKind,
        fields: ProfileFields,
        template: TemplateConfig,
        mode: RunMode,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let from = fields
            .from
            .as_deref()
            .map(|f| normalize_address(f).unwrap_or_else(|| f.trim().to_string()))
            .unwrap_or_default();
        let unsubscribe = fields
            .unsubscribe
            .as_deref()
            .map(|u| normalize_address(u).unwrap_or_else(|| u.trim().to_string()))
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| from.clone());
        let secret = |var: Option<&String>| {
            var.and_then(|v| env(v.as_str()))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let delivery = if provider == ProviderKind::Sendgrid {
            Delivery::Api(ApiSettings {
                endpoint: fields.api_endpoint.clone().unwrap_or_default(),
                api_key: secret(fields.api_key_env.as_ref()),
            })
        } else {
            Delivery::Smtp(SmtpSettings {
                host: fields.host.clone().unwrap_or_default(),
                port: fields.port.unwrap_or_default(),
                security: fields.security.unwrap_or_default(),
                session: fields.session.unwrap_or_default(),
                username: fields.username.clone().unwrap_or_else(|| from.clone()),
                password: secret(fields.password_env.as_ref())
                    .or_else(|| fields.password.clone().filter(|p| !p.is_empty())),
                client_hostname: fields.client_hostname.clone().unwrap_or_else(|| "localhost".into()),
            })
        };

        let ledger = fields.ledger.clone().unwrap_or_default();
        let domain_ledger = fields.domain_ledger.clone().filter(|p| *p != ledger);

        let owned_domains = match &fields.owned_domains {
            Some(domains) if !domains.is_empty() => OwnedDomains::new(domains),
            _ => OwnedDomains::new(domain_of(&from)),
        };

        let dedupe = fields.global_dedupe.unwrap_or(false).then(|| DedupeSettings {
            account_map: fields
                .account_map
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ACCOUNT_MAP)),
            ledger_pattern: fields.ledger_pattern.clone().unwrap_or_else(|| "*_log.csv".into()),
            recipients_pattern: fields
                .recipients_pattern
                .clone()
                .unwrap_or_else(|| "recipients_*.csv".into()),
        });

        Self {
            name,
            provider,
            delivery,
            from,
            unsubscribe,
            template_name: fields.template.clone().unwrap_or_default(),
            template,
            files: CampaignPaths {
                recipients: fields.recipients.clone().unwrap_or_default(),
                ledger,
                domain_ledger,
                unsubscribe_file: fields
                    .unsubscribe_file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_UNSUBSCRIBE_FILE)),
                suppress_file: fields
                    .suppress_file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SUPPRESS_FILE)),
            },
            dedupe,
            limits: Limits {
                max_messages_1h: cap(fields.max_messages_1h),
                max_messages_24h: cap(fields.max_messages_24h),
                max_unique_external_24h: cap(fields.max_unique_external_24h),
                owned_domains,
                on_hourly_cap: fields.on_hourly_cap.unwrap_or(Saturation::Wait),
                on_daily_cap: fields.on_daily_cap.unwrap_or(Saturation::Stop),
            },
            pacing: Pacing {
                interval: Duration::from_secs(fields.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS)),
                jitter: Duration::from_secs(fields.jitter_secs.unwrap_or(DEFAULT_JITTER_SECS)),
                cooldown: Duration::from_secs(fields.cooldown_secs.unwrap_or(0)),
                batch_size: fields.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
                repeat: fields.repeat.unwrap_or(false),
                max_total: cap(fields.max_total),
                max_per_run: cap(fields.max_per_run),
            },
            mode,
            suppress_invalid: fields.suppress_invalid.unwrap_or(false),
        }
    }

    /// The campaign ledger.
    #[must_use]
    pub fn ledger(&self) -> Ledger {
        Ledger::new(&self.files.ledger)
    }

    /// Quota scopes guarding this campaign's sends.
    ///
    /// The hourly cap lives on the domain ledger (or the campaign ledger when
    /// none is configured); daily caps live on the campaign ledger.
    #[must_use]
    pub fn quota_scopes(&self) -> Vec<QuotaScope> {
        let mut scopes = Vec::new();
        if let Some(max) = self.limits.max_messages_1h {
            let path = self.files.domain_ledger.as_ref().unwrap_or(&self.files.ledger);
            scopes.push(QuotaScope::new(
                "domain-1h",
                Ledger::new(path),
                QuotaPolicy::hourly(max).with_saturation(self.limits.on_hourly_cap),
            ));
        }
        if self.limits.max_messages_24h.is_some() || self.limits.max_unique_external_24h.is_some() {
            scopes.push(QuotaScope::new(
                "account-24h",
                self.ledger(),
                QuotaPolicy::daily(
                    self.limits.max_messages_24h,
                    self.limits.max_unique_external_24h,
                    self.limits.owned_domains.clone(),
                )
                .with_saturation(self.limits.on_daily_cap),
            ));
        }
        scopes
    }

    /// Human-readable host of the delivery endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        match &self.delivery {
            Delivery::Smtp(smtp) => format!("{}:{}", smtp.host, smtp.port),
            Delivery::Api(api) => api.endpoint.clone(),
        }
    }

    /// Builds the transport for this campaign.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the credentials are unavailable.
    pub fn transport(&self) -> Result<ProviderTransport> {
        match &self.delivery {
            Delivery::Smtp(smtp) => {
                let password = smtp
                    .password
                    .clone()
                    .ok_or_else(|| Error::Config("SMTP password unavailable".into()))?;
                let mut session = SessionConfig::new(&smtp.host, smtp.port);
                session.security = smtp.security.into();
                session.credentials = Some(Credentials::new(&smtp.username, password));
                session.client_hostname.clone_from(&smtp.client_hostname);
                Ok(ProviderTransport::Smtp(SmtpTransport::new(session, smtp.session)))
            }
            Delivery::Api(api) => {
                let key = api
                    .api_key
                    .clone()
                    .ok_or_else(|| Error::Config("API key unavailable".into()))?;
                Ok(ProviderTransport::Api(ApiTransport::new(&api.endpoint, key)))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
pub(crate) mod tests {
    use super::*;

    const FILE: &str = r#"
[defaults]
unsubscribe = "unsubscribe@example.com"
interval_secs = 30
owned_domains = ["example.com"]
global_dedupe = true

[templates.pitch]
subject = "About {BookTitle}"
body = "Hi {AuthorName}\n{SIGIMG}"
signature = "sig.png"

[profiles.private_jordan]
provider = "private"
from = "Jordan <Jordan@Example.com>"
password_env = "JORDAN_PW"
template = "pitch"
recipients = "recipients_1.csv"
ledger = "jordan_log.csv"
domain_ledger = "domain_log.csv"

[profiles.gmail_sally]
provider = "gmail"
from = "sally@example.net"
password_env = "SALLY_PW"
template = "pitch"
recipients = "recipients_2.csv"
ledger = "sally_log.csv"
max_unique_external_24h = 0

[profiles.blast]
provider = "sendgrid"
from = "news@example.com"
template = "pitch"
recipients = "/data/all.csv"
ledger = "/data/blast_log.csv"
"#;

    fn env(name: &str) -> Option<String> {
        match name {
            "JORDAN_PW" | "SALLY_PW" => Some("secret".into()),
            "SENDGRID_API_KEY" => Some("SG.key".into()),
            _ => None,
        }
    }

    fn file() -> CampaignFile {
        CampaignFile::parse(FILE, Path::new("/campaigns")).unwrap()
    }

    pub(crate) fn sample_config() -> CampaignConfig {
        file()
            .resolve_with(Some("private_jordan"), ProfileFields::default(), RunMode::Live, env)
            .unwrap()
    }

    #[test]
    fn test_private_preset_and_layers() {
        let config = sample_config();
        assert_eq!(config.provider, ProviderKind::PrivateEmail);
        assert_eq!(config.from, "jordan@example.com");
        assert_eq!(config.unsubscribe, "unsubscribe@example.com");
        assert_eq!(config.endpoint(), "mail.privateemail.com:587");
        assert_eq!(config.limits.max_messages_1h, Some(50));
        assert_eq!(config.limits.max_messages_24h, None);
        assert_eq!(config.pacing.interval, Duration::from_secs(30));
        assert_eq!(config.pacing.jitter, Duration::from_secs(10));
        assert_eq!(config.files.recipients, PathBuf::from("/campaigns/recipients_1.csv"));
        assert_eq!(config.files.domain_ledger, Some(PathBuf::from("/campaigns/domain_log.csv")));
        assert_eq!(config.template.signature, Some(PathBuf::from("/campaigns/sig.png")));
        assert!(config.dedupe.is_some());

        let Delivery::Smtp(smtp) = &config.delivery else {
            panic!("expected SMTP");
        };
        assert_eq!(smtp.session, SessionPolicy::PerMessage);
        assert_eq!(smtp.username, "jordan@example.com");
        assert_eq!(smtp.password.as_deref(), Some("secret"));
        assert!(!format!("{smtp:?}").contains("secret"));
    }

    #[test]
    fn test_overrides_win_and_zero_disables() {
        let overrides = ProfileFields {
            max_messages_1h: Some(0),
            interval_secs: Some(0),
            ..ProfileFields::default()
        };
        let config = file()
            .resolve_with(Some("private_jordan"), overrides, RunMode::Live, env)
            .unwrap();
        assert_eq!(config.limits.max_messages_1h, None);
        assert_eq!(config.pacing.interval, Duration::ZERO);
        assert!(config.quota_scopes().is_empty());
    }

    #[test]
    fn test_scopes_per_provider() {
        let private = sample_config().quota_scopes();
        assert_eq!(private.len(), 1);
        assert_eq!(private[0].ledger.path(), Path::new("/campaigns/domain_log.csv"));
        assert_eq!(private[0].policy.saturation, Saturation::Wait);

        let gmail = file()
            .resolve_with(Some("gmail_sally"), ProfileFields::default(), RunMode::Live, env)
            .unwrap();
        let scopes = gmail.quota_scopes();
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes[0].ledger.path(), Path::new("/campaigns/sally_log.csv"));
        assert_eq!(scopes[0].policy.max_events, Some(100));
        assert_eq!(scopes[0].policy.max_unique_external, None);
        assert_eq!(scopes[0].policy.saturation, Saturation::Stop);
        assert!(!scopes[0].policy.owned_domains.is_external("x@example.com"));
    }

    #[test]
    fn test_sendgrid_reads_api_key() {
        let config = file()
            .resolve_with(Some("blast"), ProfileFields::default(), RunMode::Live, env)
            .unwrap();
        assert_eq!(config.files.ledger, PathBuf::from("/data/blast_log.csv"));
        let Delivery::Api(api) = &config.delivery else {
            panic!("expected API");
        };
        assert_eq!(api.endpoint, SENDGRID_ENDPOINT);
        assert_eq!(api.api_key.as_deref(), Some("SG.key"));
    }

    #[test]
    fn test_missing_secret_fails_validation_unless_dry_run() {
        let no_env = |_: &str| None;
        let err = file()
            .resolve_with(Some("private_jordan"), ProfileFields::default(), RunMode::Live, no_env)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref v) if v == &vec![ValidationError::MissingPassword]));

        assert!(
            file()
                .resolve_with(Some("private_jordan"), ProfileFields::default(), RunMode::DryRun, no_env)
                .is_ok()
        );

        let with_flag = ProfileFields {
            password: Some("flag".into()),
            ..ProfileFields::default()
        };
        let config = file()
            .resolve_with(Some("private_jordan"), with_flag, RunMode::Live, no_env)
            .unwrap();
        assert!(config.transport().is_ok());
    }

    #[test]
    fn test_unknown_profile_and_missing_provider() {
        assert!(matches!(
            file().resolve_with(Some("nope"), ProfileFields::default(), RunMode::Live, env),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            file().resolve_with(None, ProfileFields::default(), RunMode::Live, env),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = CampaignFile::parse("[defaults]\nintervall = 3\n", Path::new("")).unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn test_example_campaign_file_resolves() {
        let example = include_str!("../../../../sendledger.example.toml");
        let file = CampaignFile::parse(example, Path::new("/srv/outreach")).unwrap();
        let no_env = |_: &str| None;

        for name in file.profile_names() {
            file.resolve_with(Some(name), ProfileFields::default(), RunMode::Preflight, no_env)
                .unwrap();
        }

        let jordan = file
            .resolve_with(Some("jordan"), ProfileFields::default(), RunMode::Preflight, no_env)
            .unwrap();
        let casey = file
            .resolve_with(Some("casey"), ProfileFields::default(), RunMode::Preflight, no_env)
            .unwrap();
        assert_eq!(jordan.quota_scopes()[0].ledger, casey.quota_scopes()[0].ledger);
        assert_eq!(
            jordan.files.unsubscribe_file,
            PathBuf::from("/srv/outreach/unsubscribed.csv")
        );

        let gmail = file
            .resolve_with(Some("outreach_gmail"), ProfileFields::default(), RunMode::Preflight, no_env)
            .unwrap();
        assert!(gmail.pacing.repeat);
        assert_eq!(gmail.quota_scopes()[0].policy.saturation, Saturation::Stop);
    }

    #[test]
    fn test_shared_lists_default_next_to_campaign_file() {
        let file = CampaignFile::parse("", Path::new("/campaigns")).unwrap();
        assert_eq!(
            file.defaults.suppress_file,
            Some(PathBuf::from("/campaigns/suppressed.csv"))
        );
        assert_eq!(
            file.defaults.account_map,
            Some(PathBuf::from("/campaigns/account_map.csv"))
        );
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(ProviderKind::parse("private"), Some(ProviderKind::PrivateEmail));
        assert_eq!(ProviderKind::parse("Gmail"), Some(ProviderKind::Gmail));
        assert_eq!(ProviderKind::parse("ses"), None);
    }
}
