//! Campaign configuration: campaign files, profiles, templates, recipient
//! lists and validation.

mod config;
mod recipient;
mod validation;

pub use config::{
    ApiSettings, CampaignConfig, CampaignFile, CampaignPaths, DEFAULT_CAMPAIGN_FILE, DedupeSettings,
    Delivery, Limits, Pacing, ProfileFields, ProviderKind, RunMode, SecurityMode, SmtpSettings,
    TemplateConfig,
};
pub use recipient::{RecipientRecord, load_recipients};
pub use validation::{ValidationError, ValidationResult, validate_campaign};
