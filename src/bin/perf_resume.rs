use std::env;
use std::time::Instant;

use tee_manager::{Future, Manager};

fn main() {
    let iterations: u64 = env::var("ITER")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1_000_000);

    let m = Manager::new();
    let mut fut = Future::<u64>::new();
    let start = Instant::now();
    let mut sum = 0u64;
    for i in 0..iterations {
        m.make_future(&mut fut).resolve(i);
        if let Some(Ok(v)) = fut.try_take() {
            sum += v;
        }
    }
    let elapsed = start.elapsed();
    println!(
        "resume_sum={sum} ns_per_op={:.1} pool_high_water={}",
        elapsed.as_nanos() as f64 / iterations.max(1) as f64,
        m.stats().pool_high_water
    );
}
