mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

use tee_manager::{AsyncChannel, AsyncFuture, AsyncSemaphore, Error, Manager};

use common::{init_test_logging, quick_manager};

#[test]
fn racing_settlers_settle_exactly_once() {
    let m = quick_manager();
    for round in 0..50u32 {
        let mut fut = AsyncFuture::<u32>::new();
        let promise = Arc::new(m.make_async_future(&mut fut));
        let barrier = Arc::new(Barrier::new(8));
        let workers: Vec<_> = (0..8u32)
            .map(|i| {
                let (promise, barrier) = (Arc::clone(&promise), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    if i % 2 == 0 {
                        promise.resolve(round * 100 + i)
                    } else {
                        promise.reject(Error::Code(i as i32))
                    }
                })
            })
            .collect();
        let wins = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
        drop(promise);
        let v = m.block_on(async move { (&mut fut).await });
        match v {
            Ok(x) => assert_eq!(x / 100, round),
            Err(Error::Code(c)) => assert_eq!(c % 2, 1),
            Err(e) => panic!("unexpected {e:?}"),
        }
    }
    assert_eq!(m.stats().live_awaiters, 0);
}

#[test]
fn producers_and_consumers_move_every_item_once() {
    init_test_logging();
    const PRODUCERS: u64 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u64 = 25_000;
    const CHUNK: u64 = 100;

    let m = quick_manager();
    let ch = AsyncChannel::<u64>::new(&m, 1024);

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let share = ch.share();
            thread::spawn(move || {
                let m = quick_manager();
                let ch = share.attach(&m);
                m.block_on(async move {
                    let mut got = Vec::new();
                    loop {
                        if ch.accept_into(&mut got, 4096) > 0 {
                            continue;
                        }
                        if ch.listen().await.is_err() {
                            break;
                        }
                    }
                    got
                })
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let share = ch.share();
            thread::spawn(move || {
                let m = quick_manager();
                let ch = share.attach(&m);
                m.block_on(async move {
                    let base = p * PER_PRODUCER;
                    for start in (0..PER_PRODUCER).step_by(CHUNK as usize) {
                        let from = base + start;
                        ch.send(from..from + CHUNK).await.unwrap();
                    }
                });
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    while ch.size() > 0 {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(ch.close());

    let mut all: Vec<u64> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .collect();
    assert_eq!(all.len() as u64, PRODUCERS * PER_PRODUCER);
    all.sort_unstable();
    assert!(all.iter().copied().eq(0..PRODUCERS * PER_PRODUCER));
}

#[test]
fn post_round_trips_through_another_manager() {
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let server = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("server".into())
            .spawn(move || {
                let m = quick_manager();
                tx.send(m.remote()).unwrap();
                while !stop.load(Ordering::Acquire) {
                    m.drive();
                }
            })
            .unwrap()
    };
    let remote = rx.recv().unwrap();

    let m = quick_manager();
    let mut name = m.post(&remote, || thread::current().name().map(str::to_owned));
    let mut sum = m.post(&remote, || (1..=10u32).sum::<u32>());
    let mut boom = m.post(&remote, || -> u8 { panic!("boom") });
    let out = m.block_on(async move {
        ((&mut name).await, (&mut sum).await, (&mut boom).await)
    });
    assert_eq!(out, (Ok(Some("server".to_owned())), Ok(55), Err(Error::Panicked)));

    stop.store(true, Ordering::Release);
    remote.wake();
    server.join().unwrap();
}

#[test]
fn semaphore_bounds_concurrency_across_threads() {
    const PERMITS: usize = 2;
    let m = Manager::new();
    let sem = AsyncSemaphore::new(&m, PERMITS);
    let holding = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let share = sem.share();
            let (holding, peak) = (Arc::clone(&holding), Arc::clone(&peak));
            thread::spawn(move || {
                let m = quick_manager();
                let sem = share.attach(&m);
                let h = m.handle();
                m.block_on(async move {
                    for _ in 0..5 {
                        sem.acquire(1).await.unwrap();
                        let now = holding.fetch_add(1, Ordering::AcqRel) + 1;
                        peak.fetch_max(now, Ordering::AcqRel);
                        h.sleep(Duration::from_millis(1)).await.unwrap();
                        holding.fetch_sub(1, Ordering::AcqRel);
                        sem.release(1);
                    }
                });
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert!(peak.load(Ordering::Acquire) <= PERMITS);
    assert_eq!(sem.available(), PERMITS);
}
