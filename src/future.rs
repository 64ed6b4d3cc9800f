//! Future/Promise pairs and clocks.
//!
//! [`Handle::make_future`] binds a [`Future`] to a fresh awaiter and returns
//! the paired [`Promise`]. The promise settles the pair exactly once; the
//! future is awaited (by `&mut`, so it can be reused) from inside a task.
//!
//! ```
//! use tee_manager::{Future, Manager};
//!
//! let m = Manager::new();
//! let mut fut = Future::<u32>::new();
//! let promise = m.make_future(&mut fut);
//! let h = m.handle();
//! let value = m.block_on(async move {
//!     h.spawn_now(async move { promise.resolve(7); }).detach();
//!     (&mut fut).await
//! });
//! assert_eq!(value, Ok(7));
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::awaiter::{AwaiterKey, Completion, Resumption};
use crate::error::Error;
use crate::manager::Handle;

/// Observable state of a future.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Not bound to any manager.
    Unbound,
    /// Bound, not settled, nobody suspended on it.
    Idle,
    /// A task or combinator is suspended on it.
    Pending,
    /// Resolved (the value may already have been taken).
    Fulfilled,
    /// Rejected.
    Rejected,
}

pub(crate) type Binding = Option<(Handle, AwaiterKey)>;

/// Consumer side of a one-shot completion.
///
/// Awaiting yields `Ok(value)` or the rejection [`Error`]. Dropping an
/// unsettled future cancels interest: its promise becomes invalid.
pub struct Future<T> {
    binding: Binding,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Future<T> {
    /// An unbound future. Bind it with [`Handle::make_future`].
    #[inline]
    pub const fn new() -> Self {
        Self {
            binding: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn binding_mut(&mut self) -> &mut Binding {
        &mut self.binding
    }

    #[inline]
    pub(crate) fn binding(&self) -> Option<&(Handle, AwaiterKey)> {
        self.binding.as_ref()
    }

    /// Is the future bound to an awaiter?
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Has a result been produced? Stays true after the result was taken.
    pub fn is_set(&self) -> bool {
        self.inspect(|aw| aw.is_set()).unwrap_or(false)
    }

    /// Current state.
    pub fn status(&self) -> Status {
        self.inspect(|aw| {
            if aw.is_set() {
                if aw.is_rejected() {
                    Status::Rejected
                } else {
                    Status::Fulfilled
                }
            } else if aw.resumption != Resumption::None {
                Status::Pending
            } else {
                Status::Idle
            }
        })
        .unwrap_or(Status::Unbound)
    }

    /// The rejection, if the future was rejected.
    pub fn error(&self) -> Option<Error> {
        self.inspect(|aw| aw.error()).flatten()
    }

    /// Release the awaiter and return to the unbound state.
    pub fn reset(&mut self) {
        if let Some((handle, key)) = self.binding.take() {
            handle.release_future(key);
        }
    }

    fn inspect<R>(&self, f: impl FnOnce(&crate::awaiter::Awaiter) -> R) -> Option<R> {
        let (handle, key) = self.binding.as_ref()?;
        handle.with_core(|c| c.awaiters.get(*key).map(f))
    }
}

impl<T: 'static> Future<T> {
    /// Take the result without suspending, if one is ready.
    pub fn try_take(&mut self) -> Option<Result<T, Error>> {
        let (handle, key) = self.binding.as_ref()?;
        let done = handle.with_core(|c| c.awaiters.get_mut(*key)?.take_ready())?;
        Some(done.into_result())
    }
}

impl<T> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Future<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: 'static> std::future::Future for Future<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some((handle, key)) = self.binding.as_ref() else {
            panic!("awaited an unbound future");
        };
        handle.poll_awaiter(*key).map(Completion::into_result)
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("status", &self.status())
            .finish()
    }
}

/// Producer side of a one-shot completion.
///
/// Every settling method consumes the promise and reports whether this call
/// settled the pair; it returns `false` when the future is gone or another
/// path (a clock firing, a remote completion) got there first. Dropping an
/// unsettled promise whose future is still observed rejects it with
/// [`Error::Abandoned`] through the local resolve queue.
pub struct Promise<T> {
    binding: Binding,
    _marker: PhantomData<fn(T)>,
}

impl<T> Promise<T> {
    #[inline]
    pub(crate) fn bound(handle: Handle, key: AwaiterKey) -> Self {
        Self {
            binding: Some((handle, key)),
            _marker: PhantomData,
        }
    }

    /// Would a settlement still be observed by someone?
    pub fn is_valid(&self) -> bool {
        match &self.binding {
            Some((handle, key)) => handle.with_core(|c| c.accepts(*key)),
            None => false,
        }
    }

    /// Reject now; a suspended awaiter resumes inline.
    pub fn reject(mut self, err: Error) -> bool {
        self.finish(Completion::Rejected(err), false)
    }

    /// Reject through the local resolve queue.
    pub fn reject_later(mut self, err: Error) -> bool {
        self.finish(Completion::Rejected(err), true)
    }

    fn finish(&mut self, done: Completion, later: bool) -> bool {
        match self.binding.take() {
            Some((handle, key)) => handle.settle(key, done, later),
            None => false,
        }
    }
}

impl<T: 'static> Promise<T> {
    /// Resolve now; a suspended awaiter resumes inline.
    pub fn resolve(mut self, value: T) -> bool {
        self.finish(Completion::Resolved(Box::new(value)), false)
    }

    /// Resolve through the local resolve queue, so the awaiter resumes on
    /// the next iteration instead of on this call stack.
    pub fn resolve_later(mut self, value: T) -> bool {
        self.finish(Completion::Resolved(Box::new(value)), true)
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some((handle, key)) = self.binding.take() {
            handle.settle(key, Completion::Rejected(Error::Abandoned), true);
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A future driven by the manager's timer map instead of a promise.
///
/// Bind with [`Handle::make_clock`]; dropping an armed clock erases its
/// timer entry.
#[derive(Default)]
pub struct Clock {
    inner: Future<()>,
}

impl Clock {
    /// An unbound clock.
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: Future::new(),
        }
    }

    #[inline]
    pub(crate) fn binding_mut(&mut self) -> &mut Binding {
        self.inner.binding_mut()
    }

    #[inline]
    pub(crate) fn binding(&self) -> Option<&(Handle, AwaiterKey)> {
        self.inner.binding()
    }

    /// Fire now with success. False if the clock already fired or was set.
    pub fn set(&self) -> bool {
        self.fire(false)
    }

    /// Fire with success through the local resolve queue.
    pub fn set_later(&self) -> bool {
        self.fire(true)
    }

    fn fire(&self, later: bool) -> bool {
        match self.inner.binding() {
            Some((handle, key)) => handle.set_clock(*key, later),
            None => false,
        }
    }

    /// Has the clock fired or been set?
    #[inline]
    pub fn is_set(&self) -> bool {
        self.inner.is_set()
    }

    /// Current state.
    #[inline]
    pub fn status(&self) -> Status {
        self.inner.status()
    }

    /// The rejection, normally [`Error::Timeout`].
    #[inline]
    pub fn error(&self) -> Option<Error> {
        self.inner.error()
    }

    /// Disarm and unbind.
    #[inline]
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

impl std::future::Future for Clock {
    type Output = Result<(), Error>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("status", &self.status())
            .finish()
    }
}
