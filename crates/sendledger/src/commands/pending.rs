//! `pending` - what is left to send per campaign.

use anyhow::{Context, Result, bail};

use sendledger_core::eligibility::load_account_map;
use sendledger_core::report::{PendingCounts, pending_report};

use crate::cli::{PendingArgs, exit_codes};

/// Run the pending command
pub fn run(args: &PendingArgs) -> Result<i32> {
    let campaigns = load_account_map(&args.account_map)
        .with_context(|| format!("reading {}", args.account_map.display()))?;
    if campaigns.is_empty() {
        bail!("{} lists no campaigns", args.account_map.display());
    }

    let rows = pending_report(&campaigns, &args.unsubscribe_file, &args.suppress_file)
        .context("counting pending recipients")?;

    let mut totals = PendingCounts::default();
    for row in &rows {
        let name = row.campaign.recipients.display();
        let Some(counts) = &row.counts else {
            println!("{name}: MISSING recipients file");
            continue;
        };
        println!(
            "{name} -> {}: total={} sent_or_invalid={} unsubscribed={} suppressed={} pending={}",
            row.campaign.ledger.display(),
            counts.total,
            counts.handled,
            counts.unsubscribed,
            counts.suppressed,
            counts.pending.len()
        );
        if args.list {
            for address in &counts.pending {
                println!("  {address}");
            }
        }
        totals.total += counts.total;
        totals.handled += counts.handled;
        totals.unsubscribed += counts.unsubscribed;
        totals.suppressed += counts.suppressed;
        totals.pending.extend(counts.pending.iter().cloned());
    }

    println!(
        "TOTAL: campaigns={} total={} sent_or_invalid={} unsubscribed={} suppressed={} pending={}",
        rows.len(),
        totals.total,
        totals.handled,
        totals.unsubscribed,
        totals.suppressed,
        totals.pending.len()
    );
    Ok(exit_codes::SUCCESS)
}
