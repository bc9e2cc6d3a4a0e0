//! `profiles` - list the campaign file's profiles with resolved fields.

use anyhow::{Context, Result};

use sendledger_core::campaign::{CampaignConfig, CampaignFile, ProfileFields, RunMode};

use crate::cli::{Cli, exit_codes};

/// Run the profiles command
pub fn run(cli: &Cli) -> Result<i32> {
    let file = CampaignFile::load(&cli.campaign)
        .with_context(|| format!("loading {}", cli.campaign.display()))?;

    let mut invalid = 0;
    for name in file.profile_names() {
        // Preflight resolution needs no secrets.
        match file.resolve(Some(name), ProfileFields::default(), RunMode::Preflight) {
            Ok(config) => print_profile(&config),
            Err(e) => {
                invalid += 1;
                println!("{name}: INVALID {e}");
            }
        }
    }
    Ok(if invalid == 0 {
        exit_codes::SUCCESS
    } else {
        exit_codes::CONFIG_ERROR
    })
}

fn print_profile(config: &CampaignConfig) {
    let cap = |max: Option<u32>| max.map_or_else(|| "off".to_string(), |m| m.to_string());
    let limits = &config.limits;
    let pacing = &config.pacing;
    println!(
        "{}: provider={} from={} endpoint={} template={}",
        config.name,
        config.provider,
        config.from,
        config.endpoint(),
        config.template_name
    );
    println!(
        "  recipients={} ledger={} domain_ledger={}",
        config.files.recipients.display(),
        config.files.ledger.display(),
        config
            .files
            .domain_ledger
            .as_ref()
            .map_or_else(|| "-".to_string(), |p| p.display().to_string())
    );
    println!(
        "  caps: 1h={} 24h={} unique_external_24h={} interval={}s jitter={}s batch={} repeat={}",
        cap(limits.max_messages_1h),
        cap(limits.max_messages_24h),
        cap(limits.max_unique_external_24h),
        pacing.interval.as_secs(),
        pacing.jitter.as_secs(),
        pacing.batch_size,
        pacing.repeat
    );
}
