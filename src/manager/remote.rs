//! The thread-safe face of a manager: cross-thread completion lists, posted
//! jobs, and the park/unpark seam.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::Thread;
use std::time::Instant;

use crossbeam_queue::SegQueue;

use super::Handle;
use crate::error::Error;
use crate::util::SpinLock;
use crate::util::thread_id;

/// Blocking-wait provider used by [`Manager::drive`](crate::Manager::drive)
/// when no work is ready.
///
/// `park_until` is only ever called on the manager's own thread; `unpark`
/// may be called from any thread and must make the current or the next
/// `park_until` return promptly.
pub trait Parker: Send + Sync + 'static {
    /// Block until `deadline` or until [`Parker::unpark`] is called.
    fn park_until(&self, deadline: Instant);
    /// Wake the owning thread.
    fn unpark(&self);
}

/// [`Parker`] built on `std::thread::park_timeout` with a sticky
/// notification flag, so an unpark that races ahead of the park is not lost.
pub struct ThreadParker {
    thread: Thread,
    notified: AtomicBool,
}

impl ThreadParker {
    /// Parker for the calling thread.
    pub fn current() -> Self {
        Self {
            thread: std::thread::current(),
            notified: AtomicBool::new(false),
        }
    }
}

impl Parker for ThreadParker {
    fn park_until(&self, deadline: Instant) {
        loop {
            if self.notified.swap(false, Ordering::AcqRel) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::park_timeout(deadline - now);
        }
    }

    #[inline]
    fn unpark(&self) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

pub(crate) type Job = Box<dyn FnOnce(&Handle) + Send>;

pub(crate) type RemotePayload = Box<dyn Any + Send>;

/// Shared with every async promise and remote handle of one manager.
pub(crate) struct Remote {
    owner: usize,
    pub(crate) jobs: SegQueue<Job>,
    pub(crate) resolved: SpinLock<Vec<(u64, RemotePayload)>>,
    pub(crate) rejected: SpinLock<Vec<(u64, Error)>>,
    pub(crate) decommissioned: SpinLock<Vec<u64>>,
    parker: Box<dyn Parker>,
}

impl Remote {
    pub(crate) fn new(parker: Box<dyn Parker>) -> Self {
        Self {
            owner: thread_id::current(),
            jobs: SegQueue::new(),
            resolved: SpinLock::new(Vec::new()),
            rejected: SpinLock::new(Vec::new()),
            decommissioned: SpinLock::new(Vec::new()),
            parker,
        }
    }

    #[inline]
    pub(crate) fn push_resolved(&self, raw: u64, payload: RemotePayload) {
        self.resolved.lock().push((raw, payload));
        self.parker.unpark();
    }

    #[inline]
    pub(crate) fn push_rejected(&self, raw: u64, err: Error) {
        self.rejected.lock().push((raw, err));
        self.parker.unpark();
    }

    #[inline]
    pub(crate) fn push_decommissioned(&self, raw: u64) {
        self.decommissioned.lock().push(raw);
        self.parker.unpark();
    }

    #[inline]
    pub(crate) fn push_job(&self, job: Job) {
        self.jobs.push(job);
        self.parker.unpark();
    }

    #[inline]
    pub(crate) fn park_until(&self, deadline: Instant) {
        self.parker.park_until(deadline);
    }

    #[inline]
    pub(crate) fn wake(&self) {
        self.parker.unpark();
    }

    #[inline]
    pub(crate) fn owner(&self) -> usize {
        self.owner
    }
}

/// `Send + Sync` handle for reaching a manager from other threads.
#[derive(Clone)]
pub struct RemoteHandle {
    pub(crate) remote: Arc<Remote>,
}

impl RemoteHandle {
    /// Interrupt the manager's park, if it is parked.
    #[inline]
    pub fn wake(&self) {
        self.remote.wake();
    }

    /// Is the calling thread the one that owns this manager?
    #[inline]
    pub fn is_owner_thread(&self) -> bool {
        self.remote.owner() == thread_id::current()
    }

    /// Do both handles address the same manager?
    #[inline]
    pub fn same_manager(&self, other: &RemoteHandle) -> bool {
        Arc::ptr_eq(&self.remote, &other.remote)
    }

    /// Run `f` on the manager's thread during step (1) of its next iteration.
    ///
    /// If the manager is dropped first, `f` is dropped without running.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce(&Handle) + Send + 'static,
    {
        self.remote.push_job(Box::new(f));
    }

    /// Start a detached task on the manager's thread. `f` runs there and
    /// builds the task, so the task itself need not be `Send`.
    pub fn spawn<F, Fut>(&self, f: F)
    where
        F: FnOnce(Handle) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        self.execute(move |h| h.async_spawn(f(h.clone())));
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("owner", &self.remote.owner())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unpark_before_park_is_not_lost() {
        let p = ThreadParker::current();
        p.unpark();
        let start = Instant::now();
        p.park_until(start + Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn park_times_out() {
        let p = ThreadParker::current();
        let start = Instant::now();
        p.park_until(start + Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn unpark_from_other_thread() {
        let p = Arc::new(ThreadParker::current());
        let p2 = Arc::clone(&p);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            p2.unpark();
        });
        let start = Instant::now();
        p.park_until(start + Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(4));
        t.join().unwrap();
    }
}
