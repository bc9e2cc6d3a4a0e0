//! Concurrent admission against one shared ledger.
//!
//! Every worker opens its own handle, the way separate processes do, so the
//! only thing keeping the window under its cap is the file lock.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{TimeDelta, TimeZone, Utc};

use sendledger_core::ledger::{Ledger, Status};
use sendledger_core::quota::{Admission, QuotaPolicy, QuotaScope, window_stats};

const WORKERS: usize = 8;
const TRIES: usize = 6;

#[test]
fn test_contending_handles_never_exceed_the_cap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("domain_log.csv");
    let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let scope = QuotaScope::new("domain-1h", Ledger::new(path), QuotaPolicy::hourly(10));
                barrier.wait();
                let mut granted = 0;
                for attempt in 0..TRIES {
                    let to = format!("w{worker}-{attempt}@example.org");
                    if let Admission::Granted(_) = scope.try_acquire(&to, now).unwrap() {
                        granted += 1;
                    }
                }
                granted
            })
        })
        .collect();

    let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(granted, 10);

    let entries = Ledger::new(&path).read_all().unwrap();
    assert_eq!(entries.iter().filter(|e| e.status == Status::Slot).count(), 10);
    let stats = window_stats(&entries, &QuotaPolicy::hourly(10), now);
    assert_eq!(stats.occupancy, 10);
}

#[test]
fn test_window_reopens_after_oldest_reservation_expires() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("domain_log.csv");
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let first = QuotaScope::new("domain-1h", Ledger::new(&path), QuotaPolicy::hourly(2));
    let second = QuotaScope::new("domain-1h", Ledger::new(&path), QuotaPolicy::hourly(2));

    assert!(matches!(first.try_acquire("a@example.org", start).unwrap(), Admission::Granted(_)));
    assert!(matches!(
        second
            .try_acquire("b@example.org", start + TimeDelta::minutes(30))
            .unwrap(),
        Admission::Granted(_)
    ));

    let blocked = first
        .try_acquire("c@example.org", start + TimeDelta::minutes(45))
        .unwrap();
    assert!(matches!(blocked, Admission::Wait { until, .. } if until == start + TimeDelta::hours(1)));

    assert!(matches!(
        second
            .try_acquire("c@example.org", start + TimeDelta::minutes(61))
            .unwrap(),
        Admission::Granted(_)
    ));
}
