use std::env;
use std::thread;
use std::time::Instant;

use tee_manager::{AsyncChannel, Manager};

fn main() {
    let items: u64 = env::var("ITER")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1_000_000);
    let producers: u64 = env::var("PRODUCERS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);

    let m = Manager::new();
    let ch = AsyncChannel::<u64>::new(&m, 1024);
    let per = items / producers.max(1);
    let start = Instant::now();
    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let share = ch.share();
            thread::spawn(move || {
                let m = Manager::new();
                let ch = share.attach(&m);
                m.block_on(async move {
                    let mut i = 0;
                    while i < per {
                        let n = (per - i).min(128);
                        let from = p * per + i;
                        if ch.send(from..from + n).await.is_err() {
                            break;
                        }
                        i += n;
                    }
                });
            })
        })
        .collect();

    let rx = ch.clone();
    let want = per * producers;
    let sum = m.block_on(async move {
        let mut buf = Vec::with_capacity(4096);
        let (mut got, mut sum) = (0u64, 0u64);
        while got < want {
            buf.clear();
            if rx.accept_into(&mut buf, 4096) == 0 {
                if rx.listen().await.is_err() {
                    break;
                }
                continue;
            }
            got += buf.len() as u64;
            sum = buf.iter().fold(sum, |s, v| s.wrapping_add(*v));
        }
        sum
    });
    for h in handles {
        let _ = h.join();
    }
    ch.close();
    println!("channel_sum={sum} elapsed_ms={}", start.elapsed().as_millis());
}
