//! Conflict detection benchmarks
//!
//! The detector runs on every edit of a proposal form, so evaluation over a
//! busy screen should stay well under a millisecond.
//!
//! Run with: `cargo bench -p marquee-scheduling`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use chrono::{NaiveDate, NaiveTime};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use marquee_core::interval::Interval;
use marquee_core::types::{LedgerEntry, OccupancyStatus, RequestId};
use marquee_scheduling::conflict::{evaluate, next_available_slot};
use marquee_scheduling::SchedulingConfig;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date")
}

/// `count` short showtimes back to back from 09:00, alternating approved/pending
fn busy_ledger(count: u32) -> Vec<LedgerEntry> {
    (0..count)
        .map(|i| {
            let minutes = 9 * 60 + i * 25;
            let start = NaiveTime::from_hms_opt((minutes / 60) % 24, minutes % 60, 0)
                .expect("valid time");
            LedgerEntry {
                request_id: RequestId::new(),
                movie_title: format!("Short {i}"),
                interval: Interval::for_showtime(date(), start, 10, 15),
                status: if i % 2 == 0 {
                    OccupancyStatus::Approved
                } else {
                    OccupancyStatus::Pending
                },
            }
        })
        .collect()
}

fn bench_evaluate(c: &mut Criterion) {
    let config = SchedulingConfig::default();
    let mut group = c.benchmark_group("evaluate");

    for count in [4u32, 16, 36] {
        let entries = busy_ledger(count);
        group.bench_with_input(BenchmarkId::new("hard_conflict", count), &entries, |b, entries| {
            b.iter(|| {
                evaluate(
                    black_box(&config),
                    date(),
                    black_box(NaiveTime::from_hms_opt(9, 5, 0).expect("valid time")),
                    120,
                    entries,
                )
            });
        });
        group.bench_with_input(BenchmarkId::new("clear", count), &entries, |b, entries| {
            b.iter(|| {
                evaluate(
                    black_box(&config),
                    date(),
                    black_box(NaiveTime::from_hms_opt(23, 30, 0).expect("valid time")),
                    10,
                    entries,
                )
            });
        });
    }

    group.finish();
}

fn bench_next_slot(c: &mut Criterion) {
    let config = SchedulingConfig::default();
    let entries = busy_ledger(36);

    c.bench_function("next_available_slot_busy_day", |b| {
        b.iter(|| {
            next_available_slot(
                black_box(&config),
                date(),
                NaiveTime::MIN,
                black_box(90),
                &entries,
            )
        });
    });
}

criterion_group!(benches, bench_evaluate, bench_next_slot);
criterion_main!(benches);
