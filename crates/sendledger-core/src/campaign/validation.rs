//! Campaign validation.

use super::config::{CampaignConfig, Delivery, RunMode};
use crate::address::normalize_address;

/// Validation error for a resolved campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// No provider selected.
    MissingProvider,
    /// Sender address is empty.
    EmptyFrom,
    /// Sender address format is invalid.
    InvalidFrom,
    /// Unsubscribe address format is invalid.
    InvalidUnsubscribe,
    /// Template missing or empty.
    MissingTemplate,
    /// Recipient list path is empty.
    MissingRecipients,
    /// Ledger path is empty.
    MissingLedger,
    /// SMTP host is empty.
    EmptySmtpHost,
    /// SMTP port is invalid.
    InvalidSmtpPort,
    /// SMTP password is unavailable.
    MissingPassword,
    /// API endpoint is empty.
    EmptyApiEndpoint,
    /// API key is unavailable.
    MissingApiKey,
    /// Repeat mode with a zero batch size.
    ZeroBatchSize,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::MissingProvider => "Provider is required",
            Self::EmptyFrom => "Sender address is required",
            Self::InvalidFrom => "Invalid sender address format",
            Self::InvalidUnsubscribe => "Invalid unsubscribe address format",
            Self::MissingTemplate => "Template is missing or has an empty subject/body",
            Self::MissingRecipients => "Recipient list is required",
            Self::MissingLedger => "Ledger path is required",
            Self::EmptySmtpHost => "SMTP server is required",
            Self::InvalidSmtpPort => "SMTP port must be 1-65535",
            Self::MissingPassword => "SMTP password is required (set password_env or --password)",
            Self::EmptyApiEndpoint => "API endpoint is required",
            Self::MissingApiKey => "API key is required (set api_key_env)",
            Self::ZeroBatchSize => "Batch size must be > 0 in repeat mode",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::MissingProvider => "provider",
            Self::EmptyFrom | Self::InvalidFrom => "from",
            Self::InvalidUnsubscribe => "unsubscribe",
            Self::MissingTemplate => "template",
            Self::MissingRecipients => "recipients",
            Self::MissingLedger => "ledger",
            Self::EmptySmtpHost => "host",
            Self::InvalidSmtpPort => "port",
            Self::MissingPassword => "password_env",
            Self::EmptyApiEndpoint => "api_endpoint",
            Self::MissingApiKey => "api_key_env",
            Self::ZeroBatchSize => "batch_size",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating a campaign.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate a resolved campaign.
///
/// Returns `Ok(())` if valid, or `Err(Vec<ValidationError>)` with all errors.
/// Secrets are only required when the run will contact the provider.
///
/// # Errors
///
/// Returns a vector of `ValidationError` if any fields are invalid.
pub fn validate_campaign(config: &CampaignConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.from.trim().is_empty() {
        errors.push(ValidationError::EmptyFrom);
    } else if normalize_address(&config.from).is_none() {
        errors.push(ValidationError::InvalidFrom);
    }
    if !config.unsubscribe.is_empty() && normalize_address(&config.unsubscribe).is_none() {
        errors.push(ValidationError::InvalidUnsubscribe);
    }

    if config.template.subject.trim().is_empty() || config.template.body.trim().is_empty() {
        errors.push(ValidationError::MissingTemplate);
    }

    if config.files.recipients.as_os_str().is_empty() {
        errors.push(ValidationError::MissingRecipients);
    }
    if config.files.ledger.as_os_str().is_empty() {
        errors.push(ValidationError::MissingLedger);
    }

    let needs_secret = config.mode == RunMode::Live;
    match &config.delivery {
        Delivery::Smtp(smtp) => {
            if smtp.host.trim().is_empty() {
                errors.push(ValidationError::EmptySmtpHost);
            }
            if smtp.port == 0 {
                errors.push(ValidationError::InvalidSmtpPort);
            }
            if needs_secret && smtp.password.as_deref().is_none_or(str::is_empty) {
                errors.push(ValidationError::MissingPassword);
            }
        }
        Delivery::Api(api) => {
            if api.endpoint.trim().is_empty() {
                errors.push(ValidationError::EmptyApiEndpoint);
            }
            if needs_secret && api.api_key.as_deref().is_none_or(str::is_empty) {
                errors.push(ValidationError::MissingApiKey);
            }
        }
    }

    if config.pacing.repeat && config.pacing.batch_size == 0 {
        errors.push(ValidationError::ZeroBatchSize);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
