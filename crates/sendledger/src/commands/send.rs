//! `send` - run one campaign.

use anyhow::{Context, Result};
use tracing::{info, warn};

use sendledger_core::campaign::{CampaignConfig, CampaignFile, RunMode};
use sendledger_core::clock::{Clock, SystemClock};
use sendledger_core::eligibility::SkipReason;
use sendledger_core::render::OutgoingMessage;
use sendledger_core::report::{format_resume, remaining};
use sendledger_core::runner::{CancelFlag, Preflight, RunEvent, RunLoop, RunSummary};
use sendledger_core::transport::{SendResult, Transport, TransportError};
use sendledger_core::Error;

use crate::cli::{Cli, SendArgs, exit_codes};

/// How many pending addresses a preflight previews.
const PREVIEW: usize = 10;

/// Stands in for the provider in dry-run and preflight runs, which never send.
struct Offline;

impl Transport for Offline {
    async fn connect(&mut self) -> SendResult {
        Ok(())
    }

    async fn send_message(&mut self, _message: &OutgoingMessage) -> SendResult {
        Err(TransportError::connection("no transport in an offline run"))
    }

    async fn reset(&mut self) {}
}

/// Run the send command
pub async fn run(cli: &Cli, args: &SendArgs) -> Result<i32> {
    let file = CampaignFile::load(&cli.campaign)
        .with_context(|| format!("loading {}", cli.campaign.display()))?;
    let config = match file.resolve(args.profile.as_deref(), args.overrides(), args.mode()) {
        Ok(config) => config,
        Err(Error::Validation(errors)) => {
            for e in &errors {
                eprintln!("config error: {}: {}", e.field(), e.message());
            }
            return Ok(exit_codes::CONFIG_ERROR);
        }
        Err(e) => return Err(e).context("resolving campaign"),
    };

    println!(
        "CAMPAIGN: {} provider={} from={} endpoint={} mode={:?}",
        config.name,
        config.provider,
        config.from,
        config.endpoint(),
        config.mode
    );

    let summary = if config.mode == RunMode::Live {
        let transport = config.transport().context("preparing transport")?;
        execute(config, transport).await?
    } else {
        execute(config, Offline).await?
    };

    println!("{summary}");
    Ok(if summary.is_aborted() {
        exit_codes::ABORTED
    } else {
        exit_codes::SUCCESS
    })
}

async fn execute<T: Transport>(config: CampaignConfig, transport: T) -> Result<RunSummary> {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted; stopping before the next attempt (Ctrl-C again to exit now)");
        flag.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted again; exiting");
            std::process::exit(exit_codes::INTERRUPTED);
        }
    });

    let mut run = RunLoop::new(config, transport, SystemClock::new())
        .context("preparing run")?
        .with_cancel(cancel)
        .with_observer(print_event);
    let summary = run.run().await.context("run failed")?;
    info!(state = %summary.state, sent = summary.sent, "Campaign run finished");
    Ok(summary)
}

fn print_event(event: &RunEvent<'_>) {
    match event {
        RunEvent::Preflight(preflight) => print_preflight(preflight),
        RunEvent::Attempt(report) => println!("{report}"),
        RunEvent::Batch(batch) => println!("{batch}"),
        RunEvent::Stopped(reason) => {
            println!("STOP: {reason}");
            if let Some(at) = reason.resume_at() {
                println!(
                    "RESUME: {} (in {})",
                    format_resume(Some(at)),
                    remaining(Some(at), SystemClock::new().now())
                );
            }
        }
    }
}

fn print_preflight(preflight: &Preflight) {
    let resolution = &preflight.resolution;
    println!(
        "PREFLIGHT: total={} pending={} duplicates={} unparsable={}",
        resolution.total,
        resolution.pending.len(),
        resolution.duplicates,
        resolution.unparsable
    );
    let skipped: Vec<String> = SkipReason::ALL
        .into_iter()
        .map(|reason| format!("{}={}", reason.label(), resolution.skipped(reason)))
        .collect();
    println!("  skipped: {}", skipped.join(" "));

    let now = SystemClock::new().now();
    for snapshot in &preflight.scopes {
        let policy = &snapshot.scope.policy;
        let stats = &snapshot.stats;
        let cap = |max: Option<u32>| max.map_or_else(|| "-".to_string(), |m| m.to_string());
        println!(
            "  window {} ({}): messages={}/{} unique_external={}/{} resume={} (in {})",
            snapshot.scope.name,
            snapshot.scope.ledger.path().display(),
            stats.occupancy,
            cap(policy.max_events),
            stats.unique_external(),
            cap(policy.max_unique_external),
            format_resume(stats.resume_messages),
            remaining(stats.resume_messages, now)
        );
    }
    if let Some(reason) = &preflight.blocked {
        println!("  blocked: {reason}");
    }
    for record in resolution.pending.iter().take(PREVIEW) {
        println!("  next: {}", record.address);
    }
    if resolution.pending.len() > PREVIEW {
        println!("  ... and {} more", resolution.pending.len() - PREVIEW);
    }
}
