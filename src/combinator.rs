//! Combinators: one suspension point over two or more awaitables.
//!
//! | Combinator           | Resumes when                                   | Output                   |
//! |----------------------|------------------------------------------------|--------------------------|
//! | [`wait_all`]         | every member resolves, or any rejects          | `None`, or failing index |
//! | [`wait_any`]         | any resolves, or every member rejects          | index of the resolver    |
//! | [`race`]             | the first member settles, either way           | index of that member     |
//! | [`wait_all_settled`] | every member has settled                       | `None`                   |
//!
//! Members are borrowed for the duration of the await and keep their own
//! results; inspect or await each member afterwards.
//!
//! ```
//! use tee_manager::{Error, Future, Manager, wait_all};
//!
//! let m = Manager::new();
//! let (mut a, mut b) = (Future::<u8>::new(), Future::<u8>::new());
//! m.make_future(&mut a).resolve(1);
//! m.make_future(&mut b).reject(Error::Closed);
//! let failed = m.block_on(async move { wait_all!(a, b).await });
//! assert_eq!(failed, Some(1));
//! ```

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use smallvec::SmallVec;

use crate::awaiter::{AwaiterKey, Resumption, SelectKey, TaskKey};
use crate::future::{Clock, Future};
use crate::manager::Handle;

pub(crate) mod sealed {
    use crate::awaiter::AwaiterKey;
    use crate::manager::Handle;

    pub trait Sealed {
        fn member(&self) -> Option<(&Handle, AwaiterKey)>;
    }
}

/// Anything a combinator can wait on: [`Future`], [`Clock`] and
/// [`AsyncFuture`](crate::AsyncFuture).
pub trait Awaitable: sealed::Sealed {}

impl<T> sealed::Sealed for Future<T> {
    #[inline]
    fn member(&self) -> Option<(&Handle, AwaiterKey)> {
        self.binding().map(|(h, k)| (h, *k))
    }
}

impl<T> Awaitable for Future<T> {}

impl sealed::Sealed for Clock {
    #[inline]
    fn member(&self) -> Option<(&Handle, AwaiterKey)> {
        self.binding().map(|(h, k)| (h, *k))
    }
}

impl Awaitable for Clock {}

/// Resumption policy of a [`Select`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Every member resolves, or the first rejection.
    All,
    /// The first resolution, or every member rejected.
    Any,
    /// The first settlement of any kind.
    Race,
    /// Every member settled.
    AllSettled,
}

impl Policy {
    /// Account for member `index` settling. `Some(outcome)` means the
    /// combinator fires with that outcome.
    fn apply(self, remaining: &mut usize, index: usize, rejected: bool) -> Option<Option<usize>> {
        match self {
            Policy::All if rejected => Some(Some(index)),
            Policy::Any if !rejected => Some(Some(index)),
            Policy::Race => Some(Some(index)),
            Policy::All | Policy::Any | Policy::AllSettled => {
                *remaining -= 1;
                (*remaining == 0).then_some(None)
            }
        }
    }
}

/// Core-side record of a registered combinator.
pub(crate) struct SelectState {
    policy: Policy,
    remaining: usize,
    members: SmallVec<[AwaiterKey; 4]>,
    task: TaskKey,
    outcome: Option<Option<usize>>,
}

impl SelectState {
    /// A member settled; returns the task to resume if the policy fired.
    pub(crate) fn on_settle(&mut self, member: AwaiterKey, rejected: bool) -> Option<TaskKey> {
        if self.outcome.is_some() {
            return None;
        }
        let index = self.members.iter().position(|m| *m == member)?;
        let outcome = self.policy.apply(&mut self.remaining, index, rejected)?;
        self.outcome = Some(outcome);
        Some(self.task)
    }
}

/// Future returned by the combinator constructors.
#[must_use = "combinators do nothing unless awaited"]
pub struct Select<'a> {
    policy: Policy,
    handle: Handle,
    members: SmallVec<[AwaiterKey; 4]>,
    registered: Option<SelectKey>,
    finished: bool,
    _members: PhantomData<&'a mut ()>,
}

impl<'a> Select<'a> {
    fn new<I>(policy: Policy, members: I) -> Self
    where
        I: IntoIterator<Item = &'a mut dyn Awaitable>,
    {
        let mut handle: Option<Handle> = None;
        let mut keys = SmallVec::new();
        for m in members {
            let Some((h, key)) = m.member() else {
                panic!("combinator member is not bound to a manager");
            };
            match &handle {
                Some(first) => assert!(
                    first.same_manager(h),
                    "combinator members belong to different managers"
                ),
                None => handle = Some(h.clone()),
            }
            keys.push(key);
        }
        let Some(handle) = handle.filter(|_| keys.len() >= 2) else {
            panic!("a combinator needs at least two members");
        };
        Self {
            policy,
            handle,
            members: keys,
            registered: None,
            finished: false,
            _members: PhantomData,
        }
    }

    /// The policy this combinator applies.
    #[inline]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Count settled members; fire immediately if the policy is already met,
    /// otherwise register on every pending member.
    fn register(&mut self, task: TaskKey) -> Poll<Option<usize>> {
        let policy = self.policy;
        let members = &self.members;
        let fired = self.handle.with_core(|c| {
            let mut remaining = members.len();
            for (index, key) in members.iter().enumerate() {
                let Some(aw) = c.awaiters.get(*key) else {
                    panic!("combinator member outlived its manager");
                };
                assert!(
                    aw.resumption == Resumption::None,
                    "combinator member is already awaited"
                );
                if aw.is_set() {
                    if let Some(outcome) = policy.apply(&mut remaining, index, aw.is_rejected()) {
                        return Ok(outcome);
                    }
                }
            }
            let sel = SelectKey(c.selects.insert(SelectState {
                policy,
                remaining,
                members: members.clone(),
                task,
                outcome: None,
            }));
            for key in members {
                if let Some(aw) = c.awaiters.get_mut(*key) {
                    if !aw.is_set() {
                        aw.resumption = Resumption::Select(sel);
                    }
                }
            }
            Err(sel)
        });
        match fired {
            Ok(outcome) => Poll::Ready(outcome),
            Err(sel) => {
                self.registered = Some(sel);
                Poll::Pending
            }
        }
    }

    fn unregister(&mut self) {
        let Some(sel) = self.registered.take() else {
            return;
        };
        let members = &self.members;
        let dead = self.handle.with_core(|c| {
            c.selects.remove(sel.0);
            let mut dead = Vec::new();
            for key in members {
                if let Some(aw) = c.awaiters.get_mut(*key) {
                    if aw.resumption == Resumption::Select(sel) {
                        aw.resumption = Resumption::None;
                    }
                }
                dead.extend(c.reclaim(*key));
            }
            dead
        });
        drop(dead);
    }
}

impl std::future::Future for Select<'_> {
    type Output = Option<usize>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        assert!(!self.finished, "combinator polled after completion");
        let Some(task) = self.handle.current_task() else {
            panic!("combinator awaited outside of a task of its manager");
        };
        let registered = self.registered;
        let poll = match registered {
            None => self.register(task),
            Some(sel) => {
                let outcome = self
                    .handle
                    .with_core(|c| c.selects.get(sel.0).and_then(|st| st.outcome));
                match outcome {
                    Some(outcome) => Poll::Ready(outcome),
                    None => Poll::Pending,
                }
            }
        };
        if poll.is_ready() {
            self.finished = true;
            self.unregister();
        }
        poll
    }
}

impl Drop for Select<'_> {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Wait until every member resolves (`None`) or one rejects (`Some(index)`).
pub fn wait_all<'a, I>(members: I) -> Select<'a>
where
    I: IntoIterator<Item = &'a mut dyn Awaitable>,
{
    Select::new(Policy::All, members)
}

/// Wait until one member resolves (`Some(index)`) or all reject (`None`).
pub fn wait_any<'a, I>(members: I) -> Select<'a>
where
    I: IntoIterator<Item = &'a mut dyn Awaitable>,
{
    Select::new(Policy::Any, members)
}

/// Wait for the first member to settle either way (`Some(index)`).
pub fn race<'a, I>(members: I) -> Select<'a>
where
    I: IntoIterator<Item = &'a mut dyn Awaitable>,
{
    Select::new(Policy::Race, members)
}

/// Wait until every member has settled (`None`).
pub fn wait_all_settled<'a, I>(members: I) -> Select<'a>
where
    I: IntoIterator<Item = &'a mut dyn Awaitable>,
{
    Select::new(Policy::AllSettled, members)
}

/// `wait_all!(a, b, ...)`: [`wait_all`] over the listed awaitables.
#[macro_export]
macro_rules! wait_all {
    ($($m:expr),+ $(,)?) => {
        $crate::wait_all([$(&mut $m as &mut dyn $crate::Awaitable),+])
    };
}

/// `wait_any!(a, b, ...)`: [`wait_any`] over the listed awaitables.
#[macro_export]
macro_rules! wait_any {
    ($($m:expr),+ $(,)?) => {
        $crate::wait_any([$(&mut $m as &mut dyn $crate::Awaitable),+])
    };
}

/// `race!(a, b, ...)`: [`race`] over the listed awaitables.
#[macro_export]
macro_rules! race {
    ($($m:expr),+ $(,)?) => {
        $crate::race([$(&mut $m as &mut dyn $crate::Awaitable),+])
    };
}

/// `wait_all_settled!(a, b, ...)`: [`wait_all_settled`] over the listed
/// awaitables.
#[macro_export]
macro_rules! wait_all_settled {
    ($($m:expr),+ $(,)?) => {
        $crate::wait_all_settled([$(&mut $m as &mut dyn $crate::Awaitable),+])
    };
}
