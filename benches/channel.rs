use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::thread;
use std::time::{Duration, Instant};
use tee_manager::prelude::*;

const ITEMS: u64 = 100_000;

fn bench_local_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_local");
    group.measurement_time(Duration::from_secs(5));

    for span in [1usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(span), &span, |b, &span| {
            let m = Manager::new();
            b.iter(|| {
                let ch = Channel::new(&m, 256, []);
                let tx = ch.clone();
                m.spawn_later(async move {
                    for i in 0..ITEMS / span as u64 {
                        let from = i * span as u64;
                        tx.send(from..from + span as u64).await.unwrap();
                    }
                })
                .detach();
                m.block_on(async move {
                    let mut left = ITEMS as usize / span * span;
                    while left > 0 {
                        let n = ch.receive(span.min(left)).await.unwrap();
                        left -= n.len();
                    }
                });
            });
        });
    }
    group.finish();
}

fn bench_async_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_async");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    group.bench_function("one_producer_one_consumer", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let m = Manager::new();
                let ch = AsyncChannel::<u64>::new(&m, 1024);
                let share = ch.share();
                let start = Instant::now();
                let producer = thread::spawn(move || {
                    let m = Manager::new();
                    let ch = share.attach(&m);
                    m.block_on(async move {
                        for i in (0..ITEMS).step_by(64) {
                            ch.send(i..i + 64).await.unwrap();
                        }
                    });
                });
                let ch2 = ch.clone();
                m.block_on(async move {
                    let mut got = Vec::new();
                    while (got.len() as u64) < ITEMS {
                        if ch2.accept_into(&mut got, 4096) == 0 {
                            ch2.listen().await.unwrap();
                        }
                    }
                });
                total += start.elapsed();
                producer.join().unwrap();
                ch.close();
            }
            total
        });
    });
    group.finish();
}

criterion_group!(benches, bench_local_channel, bench_async_channel);
criterion_main!(benches);
