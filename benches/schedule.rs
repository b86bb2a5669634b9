//! Benchmarks for schedule next-execution calculations.

use chrono::{TimeDelta, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use jobsched::Schedule;
use jobsched::core::duration;
use std::hint::black_box;
use std::time::Duration;

fn bench_next_n_executions(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_n_executions");

    let base_time = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();

    let every_minute = Schedule::cron("0 * * * * *");
    let nightly_in_zone = Schedule::cron_in_zone("0 30 2 * * *", "Europe/Copenhagen");
    let delay_5m = Schedule::delay(Duration::from_secs(300));

    for n in [10, 50, 100].iter() {
        for (name, schedule) in [
            ("cron_minute", &every_minute),
            ("cron_nightly_zoned", &nightly_in_zone),
            ("delay_5m", &delay_5m),
        ] {
            group.bench_with_input(BenchmarkId::new(name, n), n, |b, &n| {
                b.iter(|| {
                    let mut schedule = schedule.clone();
                    let mut now = base_time;
                    for _ in 0..n {
                        now = schedule.next_execution(now).unwrap().unwrap();
                    }
                    black_box(now)
                });
            });
        }
    }

    group.finish();
}

fn bench_rate_after_long_downtime(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_catch_up");

    let anchor = Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();

    for secs in [1u64, 60, 3600].iter() {
        let schedule = Schedule::Rate {
            rate: Duration::from_secs(*secs),
            first_execution: Some(anchor),
        };
        group.bench_with_input(BenchmarkId::from_parameter(secs), &schedule, |b, schedule| {
            b.iter(|| {
                let mut schedule = schedule.clone();
                black_box(schedule.next_execution(now + TimeDelta::milliseconds(1)).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_duration_parse(c: &mut Criterion) {
    c.bench_function("duration_parse", |b| {
        b.iter(|| duration::parse(black_box("P1DT2H30M15.5S")).unwrap());
    });
}

criterion_group!(
    benches,
    bench_next_n_executions,
    bench_rate_after_long_downtime,
    bench_duration_parse
);

criterion_main!(benches);
