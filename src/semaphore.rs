//! Cross-thread counting semaphore with suspending acquire.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use crate::async_future::{AsyncFuture, AsyncPromise};
use crate::error::Error;
use crate::manager::Handle;
use crate::util::SpinLock;

struct Waiter {
    need: usize,
    promise: AsyncPromise<()>,
}

struct SemState {
    tokens: usize,
    waiters: VecDeque<Waiter>,
}

struct Control {
    state: SpinLock<SemState>,
    initial: usize,
    closed: AtomicBool,
}

impl Control {
    fn take_waiters(&self, reset: bool) -> VecDeque<Waiter> {
        let mut st = self.state.lock();
        if reset {
            st.tokens = self.initial;
        }
        std::mem::take(&mut st.waiters)
    }
}

/// Counting semaphore shared across managers.
///
/// Tokens released on any thread complete waiting acquirers on theirs.
/// Obtain an endpoint for another thread with [`share`](Self::share).
pub struct AsyncSemaphore {
    control: Arc<Control>,
    handle: Handle,
}

/// `Send` form of an [`AsyncSemaphore`], not yet bound to a manager.
#[derive(Clone)]
pub struct SemaphoreShare {
    control: Arc<Control>,
}

impl AsyncSemaphore {
    /// Semaphore holding `initial` tokens.
    pub fn new(handle: &Handle, initial: usize) -> Self {
        Self {
            control: Arc::new(Control {
                state: SpinLock::new(SemState {
                    tokens: initial,
                    waiters: VecDeque::new(),
                }),
                initial,
                closed: AtomicBool::new(false),
            }),
            handle: handle.clone(),
        }
    }

    /// Endpoint that can be moved to another thread.
    pub fn share(&self) -> SemaphoreShare {
        SemaphoreShare {
            control: Arc::clone(&self.control),
        }
    }

    /// Take `n` tokens, suspending until they are available.
    ///
    /// Rejects with [`Error::Closed`] once closed and [`Error::Canceled`] on
    /// [`reset`](Self::reset).
    pub fn acquire(&self, n: usize) -> AsyncFuture<()> {
        let mut fut = AsyncFuture::new();
        let promise = self.handle.make_async_future(&mut fut);
        if n == 0 {
            promise.resolve(());
            return fut;
        }
        if self.is_closed() {
            promise.reject(Error::Closed);
            return fut;
        }
        let mut st = self.control.state.lock();
        if st.tokens >= n {
            st.tokens -= n;
            drop(st);
            promise.resolve(());
        } else {
            st.waiters.push_back(Waiter { need: n, promise });
            trace!(need = n, waiting = st.waiters.len(), "semaphore acquire parked");
        }
        fut
    }

    /// Return `n` tokens and hand them to every waiter whose request now
    /// fits, in arrival order. No effect once closed.
    pub fn release(&self, n: usize) {
        if n == 0 || self.is_closed() {
            return;
        }
        let mut granted = Vec::new();
        let mut st = self.control.state.lock();
        st.tokens += n;
        let mut i = 0;
        while i < st.waiters.len() && st.tokens > 0 {
            let need = st.waiters[i].need;
            if need <= st.tokens {
                st.tokens -= need;
                granted.extend(st.waiters.remove(i));
            } else {
                i += 1;
            }
        }
        drop(st);
        for w in granted {
            w.promise.resolve(());
        }
    }

    /// Take `n` tokens if they are available right now.
    pub fn try_acquire(&self, n: usize) -> bool {
        if n == 0 {
            return true;
        }
        if self.is_closed() {
            return false;
        }
        let mut st = self.control.state.lock();
        if st.tokens >= n {
            st.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Close and reject every waiter with [`Error::Closed`]. Idempotent.
    pub fn close(&self) {
        close(&self.control);
    }

    /// Restore the initial token count and reject every waiter with
    /// [`Error::Canceled`].
    pub fn reset(&self) {
        for w in self.control.take_waiters(true) {
            w.promise.reject(Error::Canceled);
        }
    }

    /// Tokens currently available; 0 once closed.
    pub fn available(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.control.state.lock().tokens
    }

    /// Acquirers currently suspended.
    pub fn waiting_count(&self) -> usize {
        self.control.state.lock().waiters.len()
    }

    /// Has the semaphore been closed?
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.control.closed.load(Ordering::Acquire)
    }
}

fn close(control: &Control) {
    if control.closed.swap(true, Ordering::AcqRel) {
        return;
    }
    for w in control.take_waiters(false) {
        w.promise.reject(Error::Closed);
    }
}

impl Clone for AsyncSemaphore {
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
            handle: self.handle.clone(),
        }
    }
}

impl fmt::Debug for AsyncSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.control.state.lock();
        f.debug_struct("AsyncSemaphore")
            .field("tokens", &st.tokens)
            .field("waiting", &st.waiters.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SemaphoreShare {
    /// Bind this endpoint to the manager of the calling thread.
    pub fn attach(self, handle: &Handle) -> AsyncSemaphore {
        AsyncSemaphore {
            control: self.control,
            handle: handle.clone(),
        }
    }

    /// Close without attaching first.
    pub fn close(&self) {
        close(&self.control);
    }
}

impl fmt::Debug for SemaphoreShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreShare")
            .field("closed", &self.control.closed.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Manager, ManagerConfig};
    use std::time::Duration;

    fn manager() -> Manager {
        Manager::with_config(ManagerConfig::default().max_quantum(Duration::from_millis(5)))
    }

    #[test]
    fn acquire_within_tokens_settles() {
        let m = manager();
        let sem = AsyncSemaphore::new(&m, 3);
        let mut a = sem.acquire(2);
        assert_eq!(sem.available(), 1);
        assert!(!sem.try_acquire(2));
        assert!(sem.try_acquire(1));
        m.drive();
        assert_eq!(a.try_take(), Some(Ok(())));
    }

    #[test]
    fn release_grants_fitting_waiters_in_order() {
        let m = manager();
        let sem = AsyncSemaphore::new(&m, 0);
        let mut big = sem.acquire(3);
        let mut small = sem.acquire(1);
        assert_eq!(sem.waiting_count(), 2);
        sem.release(2);
        m.drive();
        assert!(!big.is_set());
        assert_eq!(small.try_take(), Some(Ok(())));
        assert_eq!(sem.available(), 1);
        sem.release(2);
        m.drive();
        assert_eq!(big.try_take(), Some(Ok(())));
        assert_eq!(sem.available(), 0);
        assert_eq!(sem.waiting_count(), 0);
    }

    #[test]
    fn reset_cancels_and_close_rejects() {
        let m = manager();
        let sem = AsyncSemaphore::new(&m, 1);
        assert!(sem.try_acquire(1));
        let mut w = sem.acquire(1);
        sem.reset();
        m.drive();
        assert_eq!(w.try_take(), Some(Err(Error::Canceled)));
        assert_eq!(sem.available(), 1);

        let mut w = sem.acquire(5);
        sem.share().close();
        assert!(sem.is_closed());
        m.drive();
        assert_eq!(w.try_take(), Some(Err(Error::Closed)));
        assert_eq!(sem.available(), 0);
        assert!(!sem.try_acquire(1));
        sem.release(3);
        let mut late = sem.acquire(1);
        m.drive();
        assert_eq!(late.try_take(), Some(Err(Error::Closed)));
    }

    #[test]
    fn release_from_another_thread() {
        let m = manager();
        let sem = AsyncSemaphore::new(&m, 0);
        let share = sem.share();
        let mut w = sem.acquire(1);
        std::thread::spawn(move || {
            let m2 = Manager::new();
            share.attach(&m2).release(1);
        })
        .join()
        .unwrap();
        let v = m.block_on(async move { (&mut w).await });
        assert_eq!(v, Ok(()));
    }
}
