use criterion::{Criterion, criterion_group, criterion_main};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tee_manager::prelude::*;

fn bench_resume(c: &mut Criterion) {
    let mut group = c.benchmark_group("resume");
    group.measurement_time(Duration::from_secs(5));

    // 1. Bind, resolve and take with no task involved.
    group.bench_function("settle_unobserved", |b| {
        let m = Manager::new();
        let mut fut = Future::<u64>::new();
        b.iter(|| {
            m.make_future(&mut fut).resolve(1);
            fut.try_take()
        });
    });

    // 2. A suspended task resumed inline by `resolve`, re-binding each time.
    group.bench_function("inline_resume", |b| {
        let m = Manager::new();
        b.iter_custom(|iters| {
            let slot: Rc<RefCell<Option<Promise<u64>>>> = Rc::new(RefCell::new(None));
            let (h, task_slot) = (m.handle(), Rc::clone(&slot));
            let task = m.spawn_now(async move {
                let mut fut = Future::new();
                for _ in 0..iters {
                    *task_slot.borrow_mut() = Some(h.make_future(&mut fut));
                    let _ = (&mut fut).await;
                }
            });
            let start = Instant::now();
            let mut n = 0;
            loop {
                let next = slot.borrow_mut().take();
                match next {
                    Some(p) => {
                        p.resolve(n);
                        n += 1;
                    }
                    None => break,
                }
            }
            let elapsed = start.elapsed();
            assert!(task.is_done());
            elapsed
        });
    });

    // 3. Cross-thread completion through the remote queues.
    group.bench_function("async_promise", |b| {
        let m = Manager::new();
        b.iter(|| {
            let mut fut = AsyncFuture::<u64>::new();
            let promise = m.make_async_future(&mut fut);
            std::thread::scope(|s| {
                s.spawn(move || promise.resolve(7));
            });
            m.block_on(async move { (&mut fut).await })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_resume);
criterion_main!(benches);
