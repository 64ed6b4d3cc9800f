//! The per-thread manager and its scheduling loop.
//!
//! A [`Manager`] owns everything one thread schedules: the awaiter pool, the
//! task table, the timer map, the local resolve queue and the cross-thread
//! lists. Tasks reach it through a cloned [`Handle`]; other threads reach it
//! through a [`RemoteHandle`].
//!
//! One call to [`Manager::drive`] is one iteration:
//!
//! 1. start spawned tasks, rerun resumptions deferred by the inline depth
//!    limit, run posted jobs;
//! 2. fold in cross-thread resolutions;
//! 3. fold in cross-thread rejections;
//! 4. fold in abandoned cross-thread promises;
//! 5. settle the local resolve queue in push order;
//! 6. fire expired clocks in deadline order, one at a time;
//! 7. destroy frames that cancelled themselves while executing;
//!
//! then park until the earliest clock, a cross-thread wake, or the quantum,
//! unless step 1-7 produced work for the next iteration.

pub(crate) mod core;
mod remote;

use std::cell::Cell;
use std::fmt;
use std::future::Future as StdFuture;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Poll, Wake, Waker};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::affinity::pin_current_thread;
use crate::awaiter::{Awaiter, AwaiterKey, Completion, Holders, Resumption, Settle, TaskKey};
use crate::config::ManagerConfig;
use crate::error::Error;
use crate::future::{Clock, Future, Promise};
use crate::latch::Latch;
use crate::util::thread_id;

use self::core::Core;
pub use remote::{Parker, RemoteHandle, ThreadParker};
pub(crate) use remote::{Remote, RemotePayload};

/// Tasks are resumed through manager bookkeeping, never through wakers; this
/// one only satisfies the `Context` argument of `poll`.
struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
    fn wake_by_ref(self: &Arc<Self>) {}
}

pub(crate) struct Shared {
    pub(crate) core: Latch<Core>,
    pub(crate) remote: Arc<Remote>,
    pub(crate) config: ManagerConfig,
    current: Cell<Option<TaskKey>>,
    depth: Cell<usize>,
    waker: Waker,
    id: usize,
}

/// Snapshot of a manager's bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Awaiters currently allocated.
    pub live_awaiters: usize,
    /// Largest number of simultaneously live awaiters seen.
    pub pool_high_water: usize,
    /// Pool slots currently allocated, live or vacant.
    pub pool_slots: usize,
    /// Tasks not yet destroyed.
    pub tasks: usize,
    /// Clocks waiting in the timer map.
    pub armed_clocks: usize,
}

/// Single-thread reference to a manager, cloned into tasks.
#[derive(Clone)]
pub struct Handle {
    pub(crate) shared: Rc<Shared>,
}

/// Owner of one thread's scheduling state.
///
/// Dropping the manager destroys every task frame it still holds and drops
/// posted jobs that never ran.
pub struct Manager {
    handle: Handle,
}

impl Manager {
    /// Manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    /// Manager parking the calling thread with [`ThreadParker`].
    pub fn with_config(config: ManagerConfig) -> Self {
        Self::with_parker(config, ThreadParker::current())
    }

    /// Manager using a custom blocking-wait provider.
    pub fn with_parker(config: ManagerConfig, parker: impl Parker) -> Self {
        let id = thread_id::current();
        if let Some(pin) = &config.pin {
            if let Err(err) = pin_current_thread(pin) {
                warn!(manager = id, ?pin, %err, "failed to pin manager thread");
            }
        }
        debug!(manager = id, ?config, "manager started");
        let shared = Shared {
            core: Latch::new(Core::new(&config)),
            remote: Arc::new(Remote::new(Box::new(parker))),
            config,
            current: Cell::new(None),
            depth: Cell::new(0),
            waker: Waker::from(Arc::new(NoopWake)),
            id,
        };
        Self {
            handle: Handle {
                shared: Rc::new(shared),
            },
        }
    }

    /// A handle for use inside tasks.
    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Run one scheduling iteration, parking afterwards if nothing is ready.
    ///
    /// # Panics
    ///
    /// If called from inside a task of this manager.
    pub fn drive(&self) {
        let h = &self.handle;
        assert!(
            h.shared.current.get().is_none(),
            "Manager::drive called from inside a task"
        );

        // (1)
        let mut started = 0usize;
        while let Some(task) = h.with_core(|c| c.starts.pop_front()) {
            h.poll_task(task);
            started += 1;
        }
        let ready = h.with_core(|c| std::mem::take(&mut c.ready));
        let rerun = ready.len();
        for task in ready {
            h.poll_task(task);
        }
        let mut jobs = 0usize;
        while let Some(job) = h.shared.remote.jobs.pop() {
            job(h);
            jobs += 1;
        }

        // (2) (3) (4)
        let resolved = h.shared.remote.resolved.take_all();
        let rejected = h.shared.remote.rejected.take_all();
        let remote_settled = resolved.len() + rejected.len();
        for (raw, payload) in resolved {
            h.settle_remote(raw, Completion::Resolved(payload));
        }
        for (raw, err) in rejected {
            h.settle_remote(raw, Completion::Rejected(err));
        }
        let abandoned = h.shared.remote.decommissioned.take_all();
        for &raw in &abandoned {
            h.settle_remote(raw, Completion::Rejected(Error::Abandoned));
        }

        // (5)
        let local = h.with_core(|c| std::mem::take(&mut c.local));
        let local_settled = local.len();
        for key in local {
            if let Some(task) = h.with_core(|c| c.promote(key)) {
                h.run_task(task);
            }
        }

        // (6)
        let now = Instant::now();
        let mut fired = 0usize;
        while h.fire_next_clock(now) {
            fired += 1;
        }

        // (7)
        let deferred = h.with_core(|c| std::mem::take(&mut c.deferred));
        let destroyed = deferred.len();
        drop(deferred);

        trace!(
            manager = h.shared.id,
            started,
            rerun,
            jobs,
            remote_settled,
            abandoned = abandoned.len(),
            local_settled,
            fired,
            destroyed,
            "drive"
        );

        let quantum_end = now + h.shared.config.max_quantum;
        let deadline = h.with_core(|c| {
            if c.has_ready_work() {
                None
            } else {
                Some(c.next_deadline().map_or(quantum_end, |d| d.min(quantum_end)))
            }
        });
        if let Some(deadline) = deadline {
            h.shared.remote.park_until(deadline);
        }
    }

    /// Run `fut` as a task and drive until it completes.
    pub fn block_on<F>(&self, fut: F) -> F::Output
    where
        F: StdFuture + 'static,
        F::Output: 'static,
    {
        let out = Rc::new(Cell::new(None));
        let slot = Rc::clone(&out);
        let task = self.handle.spawn_now(async move {
            slot.set(Some(fut.await));
        });
        while !task.is_done() {
            self.drive();
        }
        match out.take() {
            Some(v) => v,
            None => unreachable!("finished task stored no output"),
        }
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Manager {
    type Target = Handle;

    #[inline]
    fn deref(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        let h = &self.handle;
        // Frames hold futures and promises that re-enter the core when
        // dropped, so everything is moved out first and dropped unlatched.
        let (tasks, deferred, selects, awaiters) = h.with_core(Core::clear);
        let frames = tasks.len() + deferred.len();
        drop(tasks);
        drop(deferred);
        drop(selects);
        drop(awaiters);
        let mut jobs = 0usize;
        while let Some(job) = h.shared.remote.jobs.pop() {
            drop(job);
            jobs += 1;
        }
        // Dropped frames may have staged abandonments; nobody will drive them.
        let leftovers = h.with_core(Core::clear);
        drop(leftovers);
        debug!(manager = h.shared.id, frames, jobs, "manager stopped");
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("id", &self.handle.shared.id)
            .field("stats", &self.handle.stats())
            .finish()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.shared.id)
            .finish()
    }
}

impl Handle {
    #[inline]
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        self.shared.core.with(f)
    }

    /// Do both handles refer to the same manager?
    #[inline]
    pub fn same_manager(&self, other: &Handle) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Cross-thread face of this manager.
    #[inline]
    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            remote: Arc::clone(&self.shared.remote),
        }
    }

    /// Configuration the manager was built with.
    #[inline]
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Bookkeeping snapshot.
    pub fn stats(&self) -> ManagerStats {
        self.with_core(|c| ManagerStats {
            live_awaiters: c.awaiters.live(),
            pool_high_water: c.awaiters.high_water(),
            pool_slots: c.awaiters.slots(),
            tasks: c.tasks.len(),
            armed_clocks: c.armed_clocks(),
        })
    }

    /// Bind `fut` to a fresh pending awaiter and return its promise.
    ///
    /// A future whose previous result was already taken is rearmed in place
    /// instead of taking another pool slot.
    pub fn make_future<T: 'static>(&self, fut: &mut Future<T>) -> Promise<T> {
        let key = self.acquire(fut.binding_mut());
        Promise::bound(self.clone(), key)
    }

    /// Rebind `slot` to a fresh manual awaiter, recycling the old one when
    /// possible.
    pub(crate) fn acquire(&self, slot: &mut Option<(Handle, AwaiterKey)>) -> AwaiterKey {
        if let Some((owner, key)) = slot.take() {
            let reused = if owner.same_manager(self) {
                self.with_core(|c| {
                    let reusable = c.awaiters.get(key).is_some_and(Awaiter::is_reusable);
                    if reusable {
                        c.awaiters.rekey(key, Awaiter::manual())
                    } else {
                        None
                    }
                })
            } else {
                None
            };
            match reused {
                Some((fresh_key, old)) => {
                    drop(old);
                    *slot = Some((owner, fresh_key));
                    return fresh_key;
                }
                None => owner.release_future(key),
            }
        }
        let key = self.with_core(|c| c.awaiters.insert(Awaiter::manual()));
        *slot = Some((self.clone(), key));
        key
    }

    /// Arm `clock` to fire after `after`.
    ///
    /// On natural expiry the clock rejects with [`Error::Timeout`], or
    /// resolves when `resolve_on_fire` is set. A clock fired early with
    /// [`Clock::set`] always resolves.
    pub fn make_clock(&self, clock: &mut Clock, after: Duration, resolve_on_fire: bool) {
        self.make_clock_at(clock, Instant::now() + after, resolve_on_fire);
    }

    /// Arm `clock` for an absolute deadline.
    pub fn make_clock_at(&self, clock: &mut Clock, deadline: Instant, resolve_on_fire: bool) {
        let slot = clock.binding_mut();
        if let Some((owner, key)) = slot.take() {
            owner.release_future(key);
        }
        let key = self.with_core(|c| c.arm_clock(deadline, resolve_on_fire));
        *slot = Some((self.clone(), key));
    }

    /// Bind `clock` to a deadline that has already passed: it is settled
    /// before anyone awaits it.
    pub fn make_expired_clock(&self, clock: &mut Clock, resolve: bool) {
        let slot = clock.binding_mut();
        if let Some((owner, key)) = slot.take() {
            owner.release_future(key);
        }
        let key = self.with_core(|c| {
            let mut aw = Awaiter::clock(None, resolve);
            aw.holders = Holders::Future;
            aw.settle = Settle::Ready(if resolve {
                Completion::unit()
            } else {
                Completion::Rejected(Error::Timeout)
            });
            c.awaiters.insert(aw)
        });
        *slot = Some((self.clone(), key));
    }

    /// Clock rejecting with [`Error::Timeout`] after `after`.
    pub fn timeout(&self, after: Duration) -> Clock {
        let mut clock = Clock::new();
        self.make_clock(&mut clock, after, false);
        clock
    }

    /// Clock resolving after `after`.
    pub fn sleep(&self, after: Duration) -> Clock {
        let mut clock = Clock::new();
        self.make_clock(&mut clock, after, true);
        clock
    }

    /// Future settled through the local resolve queue: awaiting it lets every
    /// other runnable task go first.
    pub fn yield_now(&self) -> Future<()> {
        let mut fut = Future::new();
        self.make_future(&mut fut).resolve_later(());
        fut
    }

    /// Settle from a promise. `later` routes through the local resolve queue.
    pub(crate) fn settle(&self, key: AwaiterKey, completion: Completion, later: bool) -> bool {
        let mut completion = Some(completion);
        let (accepted, wake, dead) = self.with_core(|c| {
            let accepted = c.accepts(key);
            let mut wake = None;
            if accepted {
                if let Some(done) = completion.take() {
                    if later {
                        c.stage(key, done);
                    } else {
                        wake = c.settle_now(key, done);
                    }
                }
            }
            (accepted, wake, c.release_promise(key))
        });
        drop(completion);
        drop(dead);
        if let Some(task) = wake {
            self.run_task(task);
        }
        accepted
    }

    fn settle_remote(&self, raw: u64, completion: Completion) {
        self.settle(AwaiterKey::unpack(raw), completion, false);
    }

    /// Early firing of an armed clock.
    pub(crate) fn set_clock(&self, key: AwaiterKey, later: bool) -> bool {
        let (ok, wake, dead) = self.with_core(|c| {
            let occupied = c.awaiters.get(key).is_none_or(Awaiter::is_occupied);
            if occupied || !c.disarm_clock(key) {
                return (false, None, None);
            }
            let mut wake = None;
            if later {
                c.stage(key, Completion::unit());
            } else {
                wake = c.settle_now(key, Completion::unit());
            }
            (true, wake, c.release_promise(key))
        });
        drop(dead);
        if let Some(task) = wake {
            self.run_task(task);
        }
        ok
    }

    fn fire_next_clock(&self, now: Instant) -> bool {
        let mut fired = false;
        let (wake, dead) = self.with_core(|c| {
            let Some((key, completion)) = c.pop_expired(now) else {
                return (None, None);
            };
            fired = true;
            let open = c.awaiters.get(key).is_some_and(|aw| !aw.is_occupied());
            let wake = if open { c.settle_now(key, completion) } else { None };
            (wake, c.release_promise(key))
        });
        drop(dead);
        if let Some(task) = wake {
            self.run_task(task);
        }
        fired
    }

    pub(crate) fn release_future(&self, key: AwaiterKey) {
        let dead = self.with_core(|c| c.release_future(key));
        drop(dead);
    }

    /// Poll step shared by every awaitable: take the result if it is ready,
    /// otherwise register the current task for resumption.
    pub(crate) fn poll_awaiter(&self, key: AwaiterKey) -> Poll<Completion> {
        let Some(task) = self.current_task() else {
            panic!("future awaited outside of a task of its manager");
        };
        self.with_core(|c| {
            let Some(aw) = c.awaiters.get_mut(key) else {
                panic!("future polled after its manager was torn down");
            };
            if let Some(done) = aw.take_ready() {
                if matches!(aw.resumption, Resumption::Resume(_)) {
                    aw.resumption = Resumption::None;
                }
                return Poll::Ready(done);
            }
            if matches!(aw.settle, Settle::Taken(_)) {
                panic!("future polled again after its result was taken");
            }
            match aw.resumption {
                Resumption::None => aw.resumption = Resumption::Resume(task),
                Resumption::Resume(t) if t == task => {}
                _ => panic!("future is already awaited by another task or combinator"),
            }
            Poll::Pending
        })
    }

    #[inline]
    pub(crate) fn current_task(&self) -> Option<TaskKey> {
        self.shared.current.get()
    }

    /// Resume `task` inline, or queue it when the inline depth is exhausted.
    pub(crate) fn run_task(&self, task: TaskKey) {
        if self.shared.depth.get() >= self.shared.config.max_inline_depth {
            self.with_core(|c| c.ready.push_back(task));
            return;
        }
        self.poll_task(task);
    }

    /// Poll `task` once with it installed as the current task.
    pub(crate) fn poll_task(&self, task: TaskKey) {
        let Some(mut frame) = self.with_core(|c| c.take_frame(task)) else {
            return;
        };
        let prev = self.shared.current.replace(Some(task));
        self.shared.depth.set(self.shared.depth.get() + 1);
        let mut cx = std::task::Context::from_waker(&self.shared.waker);
        let poll = frame.as_mut().poll(&mut cx);
        self.shared.depth.set(self.shared.depth.get() - 1);
        self.shared.current.set(prev);
        let finished = self.with_core(|c| c.return_frame(task, frame, poll.is_ready()));
        drop(finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn make_future_recycles_taken_awaiter() {
        let m = Manager::new();
        let mut fut = Future::<u32>::new();
        for i in 0..100 {
            m.make_future(&mut fut).resolve(i);
            assert_eq!(fut.try_take(), Some(Ok(i)));
        }
        let stats = m.stats();
        assert_eq!(stats.pool_high_water, 1);
        assert_eq!(stats.live_awaiters, 1);
        drop(fut);
        assert_eq!(m.stats().live_awaiters, 0);
    }

    #[test]
    fn drive_parks_until_next_clock() {
        let m = Manager::with_config(ManagerConfig::default().max_quantum(Duration::from_secs(5)));
        let clock = m.sleep(Duration::from_millis(30));
        let start = Instant::now();
        m.drive();
        assert!(start.elapsed() < Duration::from_secs(2));
        while !clock.is_set() {
            m.drive();
        }
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn local_queue_settles_within_the_same_iteration() {
        let m = Manager::with_config(ManagerConfig::default().max_quantum(Duration::from_millis(5)));
        let log = Rc::new(RefCell::new(Vec::new()));
        let (h, l) = (m.handle(), Rc::clone(&log));
        m.spawn_later(async move {
            l.borrow_mut().push(1);
            let mut y = h.yield_now();
            (&mut y).await.unwrap();
            l.borrow_mut().push(2);
        })
        .detach();
        m.drive();
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert_eq!(m.stats().tasks, 0);
    }

    #[test]
    fn drop_tears_down_suspended_tasks() {
        let dropped = Rc::new(Cell::new(false));
        struct Guard(Rc<Cell<bool>>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }
        let m = Manager::new();
        let h = m.handle();
        let g = Guard(Rc::clone(&dropped));
        let task = m.spawn_now(async move {
            let _g = g;
            let mut never = Future::<()>::new();
            let _p = h.make_future(&mut never);
            let _ = (&mut never).await;
        });
        assert!(!task.is_done());
        drop(m);
        assert!(dropped.get());
        drop(task);
    }

    #[test]
    #[should_panic(expected = "outside of a task")]
    fn awaiting_outside_a_task_panics() {
        let m = Manager::new();
        let mut fut = Future::<()>::new();
        let _p = m.make_future(&mut fut);
        let mut cx = std::task::Context::from_waker(Waker::noop());
        let _ = std::pin::Pin::new(&mut fut).poll(&mut cx);
    }
}
