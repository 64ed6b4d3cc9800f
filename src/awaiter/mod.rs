//! Awaiter: the pooled state shared by one future/promise pair.
//!
//! An awaiter is never visible to users. Its lifetime is tracked by
//! [`Holders`] (which handles still reference it) plus the [`Resumption`]
//! slot (who must run when it settles). The pool reclaims it once neither
//! handle remains and nothing is registered to resume.

mod pool;

use std::any::Any;
use std::time::Instant;

use crate::error::Error;
use crate::util::slab::SlabKey;

pub(crate) use pool::AwaiterPool;

/// Handle to one awaiter in a manager's pool.
///
/// Public only so it can appear in the sealed [`Awaitable`](crate::Awaitable)
/// plumbing; it is not nameable outside the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AwaiterKey(pub(crate) SlabKey);

impl AwaiterKey {
    #[inline]
    pub(crate) fn pack(self) -> u64 {
        self.0.pack()
    }

    #[inline]
    pub(crate) fn unpack(raw: u64) -> Self {
        Self(SlabKey::unpack(raw))
    }
}

/// Index of a task in a manager's task table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TaskKey(pub(crate) SlabKey);

/// Index of a live combinator registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SelectKey(pub(crate) SlabKey);

/// Type-erased success payload. Unit results box a ZST, which does not
/// allocate.
pub(crate) type Payload = Box<dyn Any>;

/// Terminal transition of an awaiter.
pub(crate) enum Completion {
    Resolved(Payload),
    Rejected(Error),
}

impl Completion {
    #[inline]
    pub(crate) fn unit() -> Self {
        Completion::Resolved(Box::new(()))
    }

    #[inline]
    pub(crate) fn is_rejected(&self) -> bool {
        matches!(self, Completion::Rejected(_))
    }

    pub(crate) fn into_result<T: 'static>(self) -> Result<T, Error> {
        match self {
            Completion::Resolved(payload) => match payload.downcast::<T>() {
                Ok(v) => Ok(*v),
                Err(_) => panic!(
                    "future resolved with a payload that is not {}",
                    std::any::type_name::<T>()
                ),
            },
            Completion::Rejected(e) => Err(e),
        }
    }
}

/// Which handles still reference the awaiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Holders {
    Neither,
    Future,
    Promise,
    Both,
}

impl Holders {
    #[inline]
    pub(crate) fn has_future(self) -> bool {
        matches!(self, Holders::Future | Holders::Both)
    }

    #[inline]
    pub(crate) fn has_promise(self) -> bool {
        matches!(self, Holders::Promise | Holders::Both)
    }

    #[inline]
    pub(crate) fn without_future(self) -> Self {
        match self {
            Holders::Both | Holders::Promise => Holders::Promise,
            Holders::Future | Holders::Neither => Holders::Neither,
        }
    }

    #[inline]
    pub(crate) fn without_promise(self) -> Self {
        match self {
            Holders::Both | Holders::Future => Holders::Future,
            Holders::Promise | Holders::Neither => Holders::Neither,
        }
    }
}

/// Progress towards the terminal transition.
pub(crate) enum Settle {
    /// Nobody has committed yet.
    Pending,
    /// Committed through the local resolve queue; not yet observable.
    Staged(Completion),
    /// Observable, not yet taken by the future.
    Ready(Completion),
    /// Taken by the future. Keeps the error so it can still be inspected.
    Taken(Option<Error>),
}

/// What drives the awaiter: a promise, or a deadline in the timer map.
pub(crate) enum Binding {
    Manual,
    Clock {
        /// Key in the timer map while the clock is armed.
        entry: Option<ClockEntry>,
        resolve_on_fire: bool,
    },
}

/// Timer map key: deadline, then insertion order for ties.
pub(crate) type ClockEntry = (Instant, u64);

/// Who runs when the awaiter settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resumption {
    None,
    Select(SelectKey),
    Resume(TaskKey),
}

pub(crate) struct Awaiter {
    pub(crate) holders: Holders,
    pub(crate) settle: Settle,
    pub(crate) binding: Binding,
    pub(crate) resumption: Resumption,
}

impl Awaiter {
    pub(crate) fn manual() -> Self {
        Self {
            holders: Holders::Both,
            settle: Settle::Pending,
            binding: Binding::Manual,
            resumption: Resumption::None,
        }
    }

    pub(crate) fn clock(entry: Option<ClockEntry>, resolve_on_fire: bool) -> Self {
        Self {
            holders: Holders::Both,
            settle: Settle::Pending,
            binding: Binding::Clock {
                entry,
                resolve_on_fire,
            },
            resumption: Resumption::None,
        }
    }

    /// A promise has committed (the occupy lock).
    #[inline]
    pub(crate) fn is_occupied(&self) -> bool {
        !matches!(self.settle, Settle::Pending)
    }

    /// A value was produced (the set lock).
    #[inline]
    pub(crate) fn is_set(&self) -> bool {
        matches!(self.settle, Settle::Ready(_) | Settle::Taken(_))
    }

    #[inline]
    pub(crate) fn is_rejected(&self) -> bool {
        match &self.settle {
            Settle::Ready(c) | Settle::Staged(c) => c.is_rejected(),
            Settle::Taken(e) => e.is_some(),
            Settle::Pending => false,
        }
    }

    pub(crate) fn error(&self) -> Option<Error> {
        match &self.settle {
            Settle::Ready(Completion::Rejected(e)) => Some(e.clone()),
            Settle::Taken(e) => e.clone(),
            _ => None,
        }
    }

    /// A settlement would still be observed by someone.
    #[inline]
    pub(crate) fn accepts_settlement(&self) -> bool {
        !self.is_occupied()
            && (self.holders.has_future() || self.resumption != Resumption::None)
    }

    #[inline]
    pub(crate) fn is_reclaimable(&self) -> bool {
        self.holders == Holders::Neither && self.resumption == Resumption::None
    }

    /// A settled, unclaimed manual awaiter held only by its future can be
    /// rearmed in place.
    #[inline]
    pub(crate) fn is_reusable(&self) -> bool {
        self.holders == Holders::Future
            && self.resumption == Resumption::None
            && matches!(self.binding, Binding::Manual)
            && !matches!(self.settle, Settle::Staged(_))
    }

    /// Move a ready completion out, leaving `Taken`.
    pub(crate) fn take_ready(&mut self) -> Option<Completion> {
        if !matches!(self.settle, Settle::Ready(_)) {
            return None;
        }
        let error = self.error();
        match std::mem::replace(&mut self.settle, Settle::Taken(error)) {
            Settle::Ready(c) => Some(c),
            _ => None,
        }
    }

    /// Promote a staged completion to ready. False if nothing was staged.
    pub(crate) fn promote(&mut self) -> bool {
        match std::mem::replace(&mut self.settle, Settle::Pending) {
            Settle::Staged(c) => {
                self.settle = Settle::Ready(c);
                true
            }
            other => {
                self.settle = other;
                false
            }
        }
    }

    /// Timer entry to erase, if the clock is still armed.
    #[inline]
    pub(crate) fn disarm(&mut self) -> Option<ClockEntry> {
        match &mut self.binding {
            Binding::Clock { entry, .. } => entry.take(),
            Binding::Manual => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holder_transitions() {
        assert_eq!(Holders::Both.without_future(), Holders::Promise);
        assert_eq!(Holders::Promise.without_promise(), Holders::Neither);
        assert_eq!(Holders::Future.without_promise(), Holders::Future);
        assert!(!Holders::Neither.has_future());
    }

    #[test]
    fn take_keeps_error_visible() {
        let mut aw = Awaiter::manual();
        aw.settle = Settle::Ready(Completion::Rejected(Error::Closed));
        assert!(aw.is_set() && aw.is_rejected());
        let c = aw.take_ready().unwrap();
        assert!(c.is_rejected());
        assert_eq!(aw.error(), Some(Error::Closed));
        assert!(aw.take_ready().is_none());
    }

    #[test]
    fn staged_is_occupied_but_not_set() {
        let mut aw = Awaiter::manual();
        assert!(aw.accepts_settlement());
        aw.settle = Settle::Staged(Completion::unit());
        assert!(aw.is_occupied() && !aw.is_set());
        assert!(!aw.accepts_settlement());
        assert!(aw.promote());
        assert!(aw.is_set());
        assert!(!aw.promote());
    }

    #[test]
    fn payload_downcast() {
        let c = Completion::Resolved(Box::new(41u32));
        assert_eq!(c.into_result::<u32>(), Ok(41));
        assert_eq!(Completion::unit().into_result::<()>(), Ok(()));
    }
}
