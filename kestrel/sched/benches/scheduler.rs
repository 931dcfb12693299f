//! Benchmarks for the scheduler hot paths:
//! - selecting the next thread with many ready levels
//! - a yield followed by a context switch
//! - the tick with armed timeouts
//! - uncontended mutex lock/unlock

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use kestrel_sched::{
    ContextPtr, KernelConfig, MutexKind, MutexProtocol, Priority, Scheduler, ThreadConfig,
    ThreadEntry, Timeout,
};

type Sched = Scheduler<32, 8, 32>;

fn worker(priority: u8) -> ThreadConfig {
    ThreadConfig::new("bench", Priority::new(priority), ThreadEntry::new(|a| a, 0))
}

fn populated() -> Sched {
    let mut sched = Sched::new(KernelConfig::default()).expect("valid configuration");
    for i in 0..30u8 {
        sched
            .spawn(worker(1 + i % 31))
            .expect("thread table has room");
    }
    sched.switch_context(ContextPtr::NULL);
    sched
}

fn bench_select_next(c: &mut Criterion) {
    let sched = populated();
    c.bench_function("select_next/30_ready", |b| {
        b.iter(|| black_box(black_box(&sched).select_next()));
    });
}

fn bench_yield_switch(c: &mut Criterion) {
    let mut sched = Sched::new(KernelConfig::default()).expect("valid configuration");
    sched.spawn(worker(4)).expect("thread table has room");
    sched.spawn(worker(4)).expect("thread table has room");
    sched.switch_context(ContextPtr::NULL);

    c.bench_function("switch_context/yield_same_level", |b| {
        b.iter(|| {
            sched.yield_now();
            black_box(sched.switch_context(ContextPtr(black_box(0x2000))))
        });
    });
}

fn bench_tick_with_timers(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    group.bench_function("idle", |b| {
        let mut sched = Sched::new(KernelConfig::default()).expect("valid configuration");
        b.iter(|| sched.tick());
    });
    group.bench_function("16_sleepers", |b| {
        let mut sched = Sched::new(KernelConfig::default()).expect("valid configuration");
        for _ in 0..16 {
            sched.spawn(worker(2)).expect("thread table has room");
        }
        sched.switch_context(ContextPtr::NULL);
        for i in 0..16u32 {
            let _ = sched.sleep(Timeout::After(1_000_000 + i));
            sched.switch_context(ContextPtr::NULL);
        }
        b.iter(|| sched.tick());
    });
    group.finish();
}

fn bench_uncontended_mutex(c: &mut Criterion) {
    let mut sched = Sched::new(KernelConfig::default()).expect("valid configuration");
    sched.spawn(worker(3)).expect("thread table has room");
    sched.switch_context(ContextPtr::NULL);
    let m = sched
        .create_mutex(MutexKind::Normal, MutexProtocol::Inheritance)
        .expect("object table has room");

    c.bench_function("mutex/lock_unlock", |b| {
        b.iter(|| {
            let _ = sched.mutex_lock(black_box(m), Timeout::Forever);
            sched.mutex_unlock(m).expect("caller owns the mutex");
        });
    });
}

criterion_group!(
    benches,
    bench_select_next,
    bench_yield_switch,
    bench_tick_with_timers,
    bench_uncontended_mutex
);
criterion_main!(benches);
