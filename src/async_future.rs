//! Cross-thread completion: a future owned by one manager whose promise may
//! be settled from any thread.
//!
//! The promise holds its awaiter's key in one atomic slot. Settling swaps the
//! slot to empty; only the winner pushes onto the owner's cross-thread list
//! and wakes it. Everything after that swap runs on the owning thread during
//! the next [`drive`](crate::Manager::drive).

use std::fmt;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tracing::warn;

use crate::awaiter::AwaiterKey;
use crate::combinator::Awaitable;
use crate::error::Error;
use crate::future::{Future, Status};
use crate::manager::{Handle, Remote, RemoteHandle};

const EMPTY: u64 = 0;

/// Future half of a cross-thread pair. Lives on its manager's thread.
pub struct AsyncFuture<T> {
    inner: Future<T>,
}

impl<T> AsyncFuture<T> {
    /// An unbound future. Bind it with [`Handle::make_async_future`].
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: Future::new(),
        }
    }

    /// Has a result been folded in on the owning thread?
    #[inline]
    pub fn is_set(&self) -> bool {
        self.inner.is_set()
    }

    /// Current state.
    #[inline]
    pub fn status(&self) -> Status {
        self.inner.status()
    }

    /// The rejection, if any.
    #[inline]
    pub fn error(&self) -> Option<Error> {
        self.inner.error()
    }

    /// Release the awaiter.
    #[inline]
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

impl<T: 'static> AsyncFuture<T> {
    /// Take the result without suspending, if one is ready.
    #[inline]
    pub fn try_take(&mut self) -> Option<Result<T, Error>> {
        self.inner.try_take()
    }
}

impl<T> Default for AsyncFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> std::future::Future for AsyncFuture<T> {
    type Output = Result<T, Error>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl<T> crate::combinator::sealed::Sealed for AsyncFuture<T> {
    #[inline]
    fn member(&self) -> Option<(&Handle, AwaiterKey)> {
        self.inner.binding().map(|(h, k)| (h, *k))
    }
}

impl<T> Awaitable for AsyncFuture<T> {}

impl<T> fmt::Debug for AsyncFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFuture")
            .field("status", &self.status())
            .finish()
    }
}

/// `Send + Sync` promise half of a cross-thread pair.
///
/// Share it (for example in an `Arc`) between racing producers: exactly one
/// `resolve`/`reject` call wins. Dropping it unsettled rejects the future
/// with [`Error::Abandoned`].
pub struct AsyncPromise<T> {
    slot: AtomicU64,
    remote: Arc<Remote>,
    _marker: PhantomData<fn(T)>,
}

impl<T> AsyncPromise<T> {
    /// Is the promise still armed?
    #[inline]
    pub fn has_value(&self) -> bool {
        self.slot.load(Ordering::Acquire) != EMPTY
    }

    #[inline]
    fn claim(&self) -> Option<u64> {
        match self.slot.swap(EMPTY, Ordering::AcqRel) {
            EMPTY => None,
            raw => Some(raw),
        }
    }

    /// Reject. Returns whether this call won.
    pub fn reject(&self, err: Error) -> bool {
        match self.claim() {
            Some(raw) => {
                self.remote.push_rejected(raw, err);
                true
            }
            None => false,
        }
    }
}

impl<T: Send + 'static> AsyncPromise<T> {
    /// Resolve. Returns whether this call won.
    pub fn resolve(&self, value: T) -> bool {
        match self.claim() {
            Some(raw) => {
                self.remote.push_resolved(raw, Box::new(value));
                true
            }
            None => false,
        }
    }
}

impl<T> Drop for AsyncPromise<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.claim() {
            self.remote.push_decommissioned(raw);
        }
    }
}

impl<T> fmt::Debug for AsyncPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncPromise")
            .field("armed", &self.has_value())
            .finish()
    }
}

impl Handle {
    /// Bind `fut` and return a promise that may be settled from any thread.
    pub fn make_async_future<T: Send + 'static>(&self, fut: &mut AsyncFuture<T>) -> AsyncPromise<T> {
        let key = self.acquire(fut.inner.binding_mut());
        AsyncPromise {
            slot: AtomicU64::new(key.pack()),
            remote: Arc::clone(&self.shared.remote),
            _marker: PhantomData,
        }
    }

    /// Run `f` on `target`'s thread and complete the returned future with its
    /// result. A panic in `f` rejects with [`Error::Panicked`].
    pub fn post<F, R>(&self, target: &RemoteHandle, f: F) -> AsyncFuture<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut fut = AsyncFuture::new();
        let promise = self.make_async_future(&mut fut);
        target.execute(move |_| match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                promise.resolve(value);
            }
            Err(_) => {
                warn!("posted callable panicked");
                promise.reject(Error::Panicked);
            }
        });
        fut
    }
}
