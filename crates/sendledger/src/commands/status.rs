//! `status` - window usage and health per ledger.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};

use sendledger_core::address::OwnedDomains;
use sendledger_core::clock::{Clock, SystemClock};
use sendledger_core::eligibility::load_account_map;
use sendledger_core::quota::QuotaPolicy;
use sendledger_core::report::{Health, LedgerHealth, StatusReport, format_resume, remaining};

use crate::cli::{StatusArgs, WindowArg, exit_codes};

/// Run the status command
pub fn run(args: &StatusArgs) -> Result<i32> {
    let mut ledgers = if args.ledgers.is_empty() {
        load_account_map(&args.account_map)
            .with_context(|| format!("reading {}", args.account_map.display()))?
            .into_iter()
            .map(|campaign| campaign.ledger)
            .collect()
    } else {
        args.ledgers.clone()
    };
    ledgers.extend(args.domain_ledger.iter().cloned());
    if ledgers.is_empty() {
        bail!(
            "no ledgers given and {} lists none",
            args.account_map.display()
        );
    }

    let policy = policy(args);
    let now = SystemClock::new().now();
    let report = StatusReport::build(&ledgers, &policy, now).context("reading ledgers")?;

    let window = match args.window {
        WindowArg::Hour => "1h",
        WindowArg::Day => "24h",
    };
    println!("STATUS ({window} window, {})", format_resume(Some(now)));
    for row in report.issues().chain(report.healthy()) {
        print_row(row, &policy, now);
    }
    println!("{}", report.summary());

    Ok(if report.issues().next().is_some() {
        exit_codes::ISSUES_FOUND
    } else {
        exit_codes::SUCCESS
    })
}

fn policy(args: &StatusArgs) -> QuotaPolicy {
    let owned = OwnedDomains::new(&args.owned_domains);
    match args.window {
        WindowArg::Hour => QuotaPolicy {
            max_events: args.max_messages,
            owned_domains: owned,
            ..QuotaPolicy::hourly(0)
        },
        WindowArg::Day => QuotaPolicy::daily(args.max_messages, args.max_unique_external, owned),
    }
}

fn print_row(row: &LedgerHealth, policy: &QuotaPolicy, now: DateTime<Utc>) {
    let cap = |max: Option<u32>| max.map_or_else(String::new, |m| format!("/{m}"));
    let resume = row.resume_at();
    println!(
        "{:<13} {}  messages={}{} unique_external={}{} oldest={} resume={} (in {})",
        row.health.label(),
        row.path.display(),
        row.stats.occupancy,
        cap(policy.max_events),
        row.stats.unique_external(),
        cap(policy.max_unique_external),
        format_resume(row.stats.oldest),
        format_resume(resume),
        remaining(resume, now)
    );
    if let Some(info) = row.last_error.as_deref().filter(|_| row.health != Health::Ok) {
        println!("              last error: {info}");
    }
}
