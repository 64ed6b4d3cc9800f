//! Single-thread tables of one manager and the settlement rules over them.
//!
//! Everything here is pure bookkeeping: no method runs user code. Methods that
//! make a task runnable return its key, and the caller resumes it after
//! releasing the core latch. Awaiters that become unreferenced are handed back
//! too, so payload destructors also run outside the latch.

use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::time::Instant;

use crate::awaiter::{
    Awaiter, AwaiterKey, AwaiterPool, Binding, ClockEntry, Completion, Resumption, SelectKey,
    Settle, TaskKey,
};
use crate::combinator::SelectState;
use crate::config::ManagerConfig;
use crate::error::Error;
use crate::task::TaskSlot;
use crate::util::slab::Slab;

/// A task's resumable state.
pub(crate) type Frame = Pin<Box<dyn std::future::Future<Output = ()>>>;

pub(crate) struct Core {
    pub(crate) awaiters: AwaiterPool,
    pub(crate) tasks: Slab<TaskSlot>,
    pub(crate) selects: Slab<SelectState>,
    clocks: BTreeMap<ClockEntry, AwaiterKey>,
    clock_seq: u64,
    /// Tasks spawned for the next iteration.
    pub(crate) starts: VecDeque<TaskKey>,
    /// Resumptions that would have exceeded the inline depth.
    pub(crate) ready: VecDeque<TaskKey>,
    /// Local resolve queue.
    pub(crate) local: VecDeque<AwaiterKey>,
    /// Frames cancelled while they were executing.
    pub(crate) deferred: Vec<Frame>,
}

impl Core {
    pub(crate) fn new(config: &ManagerConfig) -> Self {
        Self {
            awaiters: AwaiterPool::new(config.pool_vacancy_limit),
            tasks: Slab::new(),
            selects: Slab::new(),
            clocks: BTreeMap::new(),
            clock_seq: 0,
            starts: VecDeque::new(),
            ready: VecDeque::new(),
            local: VecDeque::new(),
            deferred: Vec::new(),
        }
    }

    /// Task (if any) to run now that `key` is ready.
    pub(crate) fn wake_target(&mut self, key: AwaiterKey) -> Option<TaskKey> {
        let aw = self.awaiters.get(key)?;
        match aw.resumption {
            Resumption::None => None,
            Resumption::Resume(task) => Some(task),
            Resumption::Select(sel) => {
                let rejected = aw.is_rejected();
                self.notify_select(sel, key, rejected)
            }
        }
    }

    fn notify_select(&mut self, sel: SelectKey, member: AwaiterKey, rejected: bool) -> Option<TaskKey> {
        self.selects.get_mut(sel.0)?.on_settle(member, rejected)
    }

    #[inline]
    pub(crate) fn accepts(&self, key: AwaiterKey) -> bool {
        self.awaiters
            .get(key)
            .is_some_and(Awaiter::accepts_settlement)
    }

    /// Make `completion` observable immediately.
    pub(crate) fn settle_now(&mut self, key: AwaiterKey, completion: Completion) -> Option<TaskKey> {
        let aw = self.awaiters.get_mut(key)?;
        aw.settle = Settle::Ready(completion);
        self.wake_target(key)
    }

    /// Commit `completion` through the local resolve queue.
    pub(crate) fn stage(&mut self, key: AwaiterKey, completion: Completion) {
        if let Some(aw) = self.awaiters.get_mut(key) {
            aw.settle = Settle::Staged(completion);
            self.local.push_back(key);
        }
    }

    /// Local resolve queue step for one awaiter.
    pub(crate) fn promote(&mut self, key: AwaiterKey) -> Option<TaskKey> {
        if !self.awaiters.get_mut(key)?.promote() {
            return None;
        }
        self.wake_target(key)
    }

    pub(crate) fn release_promise(&mut self, key: AwaiterKey) -> Option<Awaiter> {
        let aw = self.awaiters.get_mut(key)?;
        aw.holders = aw.holders.without_promise();
        self.reclaim(key)
    }

    /// The future side went away. An armed clock loses its timer entry (and
    /// with it the implicit promise held by the timer map).
    pub(crate) fn release_future(&mut self, key: AwaiterKey) -> Option<Awaiter> {
        let aw = self.awaiters.get_mut(key)?;
        aw.holders = aw.holders.without_future();
        if matches!(aw.resumption, Resumption::Resume(_)) {
            aw.resumption = Resumption::None;
        }
        if let Some(entry) = aw.disarm() {
            aw.holders = aw.holders.without_promise();
            self.clocks.remove(&entry);
        }
        self.reclaim(key)
    }

    pub(crate) fn reclaim(&mut self, key: AwaiterKey) -> Option<Awaiter> {
        if self.awaiters.get(key)?.is_reclaimable() {
            self.awaiters.remove(key)
        } else {
            None
        }
    }

    pub(crate) fn arm_clock(&mut self, deadline: Instant, resolve_on_fire: bool) -> AwaiterKey {
        let entry = (deadline, self.clock_seq);
        self.clock_seq += 1;
        let key = self
            .awaiters
            .insert(Awaiter::clock(Some(entry), resolve_on_fire));
        self.clocks.insert(entry, key);
        key
    }

    /// Erase the timer entry of an armed clock. False if it was not armed.
    pub(crate) fn disarm_clock(&mut self, key: AwaiterKey) -> bool {
        let Some(entry) = self.awaiters.get_mut(key).and_then(Awaiter::disarm) else {
            return false;
        };
        self.clocks.remove(&entry);
        true
    }

    /// Pop the earliest clock whose deadline is not after `now`, returning
    /// the completion its natural expiry produces.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<(AwaiterKey, Completion)> {
        let (&entry, &key) = self.clocks.first_key_value()?;
        if entry.0 > now {
            return None;
        }
        self.clocks.remove(&entry);
        let resolve = match self.awaiters.get_mut(key).map(|aw| &mut aw.binding) {
            Some(Binding::Clock {
                entry,
                resolve_on_fire,
            }) => {
                *entry = None;
                *resolve_on_fire
            }
            _ => false,
        };
        let completion = if resolve {
            Completion::unit()
        } else {
            Completion::Rejected(Error::Timeout)
        };
        Some((key, completion))
    }

    #[inline]
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.clocks.first_key_value().map(|(entry, _)| entry.0)
    }

    #[inline]
    pub(crate) fn armed_clocks(&self) -> usize {
        self.clocks.len()
    }

    /// Work queued for the next iteration, which must not be delayed by a
    /// park.
    #[inline]
    pub(crate) fn has_ready_work(&self) -> bool {
        !self.starts.is_empty()
            || !self.ready.is_empty()
            || !self.local.is_empty()
            || !self.deferred.is_empty()
    }

    /// Empty every table. Returned values must be dropped after the latch is
    /// released.
    pub(crate) fn clear(&mut self) -> (Vec<TaskSlot>, Vec<Frame>, Vec<SelectState>, Vec<Awaiter>) {
        self.starts.clear();
        self.ready.clear();
        self.local.clear();
        self.clocks.clear();
        (
            self.tasks.drain(),
            std::mem::take(&mut self.deferred),
            self.selects.drain(),
            self.awaiters.drain(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn core() -> Core {
        Core::new(&ManagerConfig::default())
    }

    #[test]
    fn clocks_pop_in_deadline_then_insertion_order() {
        let mut c = core();
        let base = Instant::now();
        let late = c.arm_clock(base + Duration::from_millis(50), false);
        let early = c.arm_clock(base + Duration::from_millis(10), true);
        let tie = c.arm_clock(base + Duration::from_millis(10), false);
        assert_eq!(c.next_deadline(), Some(base + Duration::from_millis(10)));
        assert!(c.pop_expired(base).is_none());

        let now = base + Duration::from_millis(60);
        let (k, first) = c.pop_expired(now).unwrap();
        assert_eq!(k, early);
        assert!(!first.is_rejected());
        let (k, second) = c.pop_expired(now).unwrap();
        assert_eq!(k, tie);
        assert!(second.is_rejected());
        assert_eq!(c.pop_expired(now).unwrap().0, late);
        assert_eq!(c.armed_clocks(), 0);
    }

    #[test]
    fn dropping_unfired_clock_erases_entry_and_awaiter() {
        let mut c = core();
        let k = c.arm_clock(Instant::now() + Duration::from_secs(5), false);
        assert_eq!(c.armed_clocks(), 1);
        assert!(c.release_future(k).is_some());
        assert_eq!(c.armed_clocks(), 0);
        assert_eq!(c.awaiters.live(), 0);
    }

    #[test]
    fn reclaimed_only_when_both_sides_released() {
        let mut c = core();
        let k = c.awaiters.insert(Awaiter::manual());
        assert!(c.release_promise(k).is_none());
        assert_eq!(c.awaiters.live(), 1);
        assert!(c.release_future(k).is_some());
        assert_eq!(c.awaiters.live(), 0);
    }

    #[test]
    fn staged_completion_reaches_local_queue() {
        let mut c = core();
        let k = c.awaiters.insert(Awaiter::manual());
        assert!(c.accepts(k));
        c.stage(k, Completion::unit());
        assert!(!c.accepts(k));
        assert_eq!(c.local.front(), Some(&k));
        assert!(c.has_ready_work());
        assert_eq!(c.promote(k), None);
        assert!(c.awaiters.get(k).unwrap().is_set());
    }
}
