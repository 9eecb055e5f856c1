//! Benchmarks for dispatch cycles on the lab reactor.
//!
//! Run with: cargo bench -p cmloop-dispatch --bench dispatch_bench

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;

use cmloop_core::LabClock;
use cmloop_dispatch::{Dispatcher, IdlePriority, IdleStatus};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use web_time::Duration;

// =============================================================================
// Timeouts
// =============================================================================

fn bench_timeouts(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/timeout");

    group.bench_function("add_remove", |b| {
        let clock = LabClock::new();
        let (dispatcher, _) = Dispatcher::lab(&clock);
        b.iter(|| {
            let handle = dispatcher
                .add_timeout_after(Duration::from_millis(10), || {})
                .expect("timeout");
            dispatcher.remove_timeout(black_box(handle)).expect("pending");
        })
    });

    for count in [16usize, 256, 4096] {
        group.bench_function(format!("fire_{count}"), |b| {
            b.iter_batched(
                || {
                    let clock = LabClock::new();
                    let (dispatcher, _) = Dispatcher::lab(&clock);
                    for i in 0..count as u64 {
                        dispatcher
                            .add_timeout(0, (i * 7_919) % 1_000_000, || {})
                            .expect("timeout");
                    }
                    clock.advance(Duration::from_secs(1));
                    dispatcher
                },
                |dispatcher| {
                    dispatcher.do_one_event().expect("cycle");
                    black_box(dispatcher.stats().timeouts_fired)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// =============================================================================
// Idle cycles
// =============================================================================

fn bench_idle(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/idle");

    group.bench_function("recurring_cycle", |b| {
        let clock = LabClock::new();
        let (dispatcher, _) = Dispatcher::lab(&clock);
        let runs = Rc::new(Cell::new(0u64));
        for priority in IdlePriority::ALL {
            let runs = Rc::clone(&runs);
            dispatcher
                .add_idle(
                    move || {
                        runs.set(runs.get() + 1);
                        IdleStatus::MoreWork
                    },
                    priority,
                )
                .expect("idle");
        }
        b.iter(|| black_box(dispatcher.do_one_event().expect("cycle")));
    });

    group.finish();
}

criterion_group!(benches, bench_timeouts, bench_idle);
criterion_main!(benches);
