//! Counting and periodic timing helpers for tasks. Single-thread.

use std::fmt;
use std::time::{Duration, Instant};

use crate::future::{Clock, Future, Promise};
use crate::manager::Handle;

/// Counts up to a stop value and signals when it is reached.
pub struct Counter {
    stop: usize,
    sum: usize,
    on_reach: Option<Promise<()>>,
}

impl Counter {
    /// Counter that is reached once `stop` has been counted.
    pub const fn new(stop: usize) -> Self {
        Self {
            stop,
            sum: 0,
            on_reach: None,
        }
    }

    /// Add `n`. Returns `false`, counting nothing, if already reached.
    pub fn count(&mut self, n: usize) -> bool {
        if self.is_reached() {
            return false;
        }
        self.sum = self.sum.saturating_add(n);
        if self.is_reached() {
            self.signal();
        }
        true
    }

    /// Jump straight to the stop value. Returns `false` if already reached.
    pub fn stop(&mut self) -> bool {
        if self.is_reached() {
            return false;
        }
        self.sum = self.stop;
        self.signal();
        true
    }

    fn signal(&mut self) {
        if let Some(p) = self.on_reach.take() {
            p.resolve(());
        }
    }

    /// Restart counting from `sum`.
    pub fn reset(&mut self, sum: usize) {
        self.sum = sum;
    }

    /// Amount counted so far.
    #[inline]
    pub fn sum(&self) -> usize {
        self.sum
    }

    /// Has the stop value been reached?
    #[inline]
    pub fn is_reached(&self) -> bool {
        self.sum >= self.stop
    }

    /// Future resolved when the counter is reached; resolved at once if it
    /// already is. A previously returned future is abandoned.
    pub fn on_reach(&mut self, handle: &Handle) -> Future<()> {
        let mut fut = Future::new();
        let promise = handle.make_future(&mut fut);
        if self.is_reached() {
            promise.resolve(());
        } else {
            self.on_reach = Some(promise);
        }
        fut
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("sum", &self.sum)
            .field("stop", &self.stop)
            .finish()
    }
}

/// Periodic ticks without drift.
///
/// Tick `k` is due at `start + period * k` regardless of how late earlier
/// ticks were observed; a tick that is already due yields a clock that is
/// ready at once. After `stop` ticks every further tick rejects with
/// [`Error::Timeout`](crate::Error::Timeout).
///
/// ```
/// use std::time::Duration;
/// use tee_manager::{Countdown, Manager};
///
/// let m = Manager::new();
/// let h = m.handle();
/// let ticks = m.block_on(async move {
///     let mut down = Countdown::new(3);
///     down.start(Duration::from_millis(1));
///     let mut n = 0;
///     while down.tick(&h).await.is_ok() {
///         n += 1;
///     }
///     n
/// });
/// assert_eq!(ticks, 3);
/// ```
pub struct Countdown {
    counter: Counter,
    start: Instant,
    period: Duration,
}

impl Countdown {
    /// Countdown of `stop` ticks. Call [`start`](Self::start) before ticking.
    pub fn new(stop: usize) -> Self {
        Self {
            counter: Counter::new(stop),
            start: Instant::now(),
            period: Duration::ZERO,
        }
    }

    /// Restart from zero ticks with the given period, now.
    pub fn start(&mut self, period: Duration) {
        self.period = period;
        self.reset(0);
    }

    /// Restart from `ticks` already elapsed, now.
    pub fn reset(&mut self, ticks: usize) {
        self.counter.reset(ticks);
        self.start = Instant::now();
    }

    /// Clock for the next tick.
    pub fn tick(&mut self, handle: &Handle) -> Clock {
        let mut clock = Clock::new();
        let ticks = u32::try_from(self.counter.sum() + 1).unwrap_or(u32::MAX);
        let due = self.start + self.period.saturating_mul(ticks);
        if !self.counter.count(1) {
            handle.make_expired_clock(&mut clock, false);
            return clock;
        }
        let now = Instant::now();
        if now >= due {
            handle.make_expired_clock(&mut clock, true);
        } else {
            handle.make_clock_at(&mut clock, due, true);
        }
        clock
    }

    /// Period between ticks.
    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Have all ticks been handed out?
    #[inline]
    pub fn is_reached(&self) -> bool {
        self.counter.is_reached()
    }

    /// See [`Counter::on_reach`].
    pub fn on_reach(&mut self, handle: &Handle) -> Future<()> {
        self.counter.on_reach(handle)
    }
}

impl fmt::Debug for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Countdown")
            .field("ticks", &self.counter.sum())
            .field("stop", &self.counter.stop)
            .field("period", &self.period)
            .finish()
    }
}

/// Forward timer measuring laps.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stopwatch {
    previous: Option<Instant>,
}

impl Stopwatch {
    /// A stopwatch that has not been started.
    pub const fn new() -> Self {
        Self { previous: None }
    }

    /// Start (or restart) now.
    pub fn start(&mut self) {
        self.previous = Some(Instant::now());
    }

    /// Time since the previous lap or start; starts the watch and returns
    /// zero if it was not running.
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        match self.previous.replace(now) {
            Some(prev) => now - prev,
            None => Duration::ZERO,
        }
    }

    /// Time since the previous lap or start, without recording a lap.
    pub fn elapsed(&self) -> Duration {
        self.previous.map_or(Duration::ZERO, |p| p.elapsed())
    }

    /// Stop.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
