use chrono::{NaiveDate, NaiveDateTime};
use criterion::{criterion_group, criterion_main, Criterion};
use mprobe::{CalendarTiming, PeriodicTiming, Timing};
use std::hint::black_box;

fn reference() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 15)
        .and_then(|d| d.and_hms_opt(8, 30, 17))
        .unwrap_or_default()
}

fn benchmark_calendar_next_run(c: &mut Criterion) {
    let daily = CalendarTiming::builder()
        .hours([9])
        .minutes([0])
        .seconds([0])
        .build();

    c.bench_function("calendar_daily_next_run", |b| {
        b.iter(|| black_box(&daily).next_run_from(black_box(reference())))
    });

    // Feb 29 on a Monday: no match within the lookahead, every year is walked
    let sparse = CalendarTiming::builder()
        .months([2])
        .days_of_month([29])
        .days_of_week([1])
        .hours([0])
        .minutes([0])
        .seconds([0])
        .build();

    c.bench_function("calendar_sparse_next_run", |b| {
        b.iter(|| black_box(&sparse).next_run_from(black_box(reference())))
    });
}

fn benchmark_preview_sequence(c: &mut Criterion) {
    let timing: Timing = CalendarTiming::builder()
        .minutes([0, 15, 30, 45])
        .seconds([0])
        .build()
        .into();

    c.bench_function("calendar_100_runs", |b| {
        b.iter(|| {
            let mut timing = timing.clone();
            let mut at = reference();
            for _ in 0..100 {
                let Some(next) = timing.next_run_from(at) else {
                    break;
                };
                timing.reset_at(next);
                at = next;
            }
            black_box(at)
        })
    });

    let periodic: Timing = PeriodicTiming::new(60_000).into();
    c.bench_function("periodic_100_runs", |b| {
        b.iter(|| {
            let mut timing = periodic.clone();
            let mut at = reference();
            for _ in 0..100 {
                let Some(next) = timing.next_run_from(at) else {
                    break;
                };
                timing.reset_at(next);
                at = next;
            }
            black_box(at)
        })
    });
}

criterion_group!(benches, benchmark_calendar_next_run, benchmark_preview_sequence);
criterion_main!(benches);
