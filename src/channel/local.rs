//! Intra-thread bounded channel over a ring buffer.
//!
//! Requests that cannot complete at once wait in one FIFO. At any moment the
//! FIFO holds only senders (the ring is full) or only receivers (the ring is
//! empty), so delivery order is exactly submission order.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::ring::Ring;
use crate::error::Error;
use crate::future::{Future, Promise};
use crate::latch::Latch;
use crate::manager::Handle;

enum Waiting<T> {
    /// Items not yet taken by the ring or a receiver.
    Send { promise: Promise<()>, items: VecDeque<T> },
    /// Items gathered so far for a receive of `want` elements.
    Receive {
        promise: Promise<Vec<T>>,
        buf: Vec<T>,
        want: usize,
    },
}

impl<T> Waiting<T> {
    fn is_valid(&self) -> bool {
        match self {
            Waiting::Send { promise, .. } => promise.is_valid(),
            Waiting::Receive { promise, .. } => promise.is_valid(),
        }
    }
}

/// Settlements computed under the channel latch and carried out after it is
/// released, together with anything that must be dropped unlatched.
enum Action<T> {
    Sent(Promise<()>),
    Received(Promise<Vec<T>>, Vec<T>),
    Drop(Waiting<T>),
}

impl<T: 'static> Action<T> {
    fn run(self) {
        match self {
            Action::Sent(p) => {
                p.resolve_later(());
            }
            Action::Received(p, items) => {
                p.resolve_later(items);
            }
            Action::Drop(w) => drop(w),
        }
    }
}

struct State<T> {
    ring: Ring<T>,
    waiting: VecDeque<Waiting<T>>,
    closed: bool,
}

impl<T> State<T> {
    /// Drop waiters nobody observes any more from the head of the FIFO.
    fn prune(&mut self, actions: &mut Vec<Action<T>>) {
        while self.waiting.front().is_some_and(|w| !w.is_valid()) {
            if let Some(w) = self.waiting.pop_front() {
                actions.push(Action::Drop(w));
            }
        }
    }

    fn senders_waiting(&self) -> bool {
        matches!(self.waiting.front(), Some(Waiting::Send { .. }))
    }

    fn receivers_waiting(&self) -> bool {
        matches!(self.waiting.front(), Some(Waiting::Receive { .. }))
    }

    /// Hand `items` to waiting receivers, head first.
    fn feed_receivers(&mut self, items: &mut VecDeque<T>, actions: &mut Vec<Action<T>>) {
        while !items.is_empty() {
            self.prune(actions);
            let Some(Waiting::Receive { buf, want, .. }) = self.waiting.front_mut() else {
                return;
            };
            let n = (*want - buf.len()).min(items.len());
            buf.extend(items.drain(..n));
            if buf.len() < *want {
                return;
            }
            if let Some(Waiting::Receive { promise, buf, .. }) = self.waiting.pop_front() {
                actions.push(Action::Received(promise, buf));
            }
        }
    }

    /// Take items straight from waiting senders until `buf` holds `want`.
    fn drain_senders(&mut self, buf: &mut Vec<T>, want: usize, actions: &mut Vec<Action<T>>) {
        while buf.len() < want {
            self.prune(actions);
            let Some(Waiting::Send { items, .. }) = self.waiting.front_mut() else {
                return;
            };
            let n = (want - buf.len()).min(items.len());
            buf.extend(items.drain(..n));
            if !items.is_empty() {
                return;
            }
            if let Some(Waiting::Send { promise, .. }) = self.waiting.pop_front() {
                actions.push(Action::Sent(promise));
            }
        }
    }

    /// Move waiting senders' items into free ring space.
    fn refill(&mut self, actions: &mut Vec<Action<T>>) {
        while !self.ring.is_full() {
            self.prune(actions);
            let Some(Waiting::Send { items, .. }) = self.waiting.front_mut() else {
                return;
            };
            self.ring.push_from(items);
            if !items.is_empty() {
                return;
            }
            if let Some(Waiting::Send { promise, .. }) = self.waiting.pop_front() {
                actions.push(Action::Sent(promise));
            }
        }
    }
}

/// Bounded single-thread channel.
///
/// Clones share one buffer. `send` and `receive` return futures that settle
/// once the whole request is satisfied; both reject with [`Error::Closed`]
/// after [`close`](Self::close). Dropping the last clone closes the channel.
///
/// Items gathered for a receive whose future is dropped before it completes
/// are lost with it.
pub struct Channel<T: 'static> {
    state: Rc<Latch<State<T>>>,
    handle: Handle,
}

impl<T: 'static> Channel<T> {
    /// Channel holding up to `capacity` items, pre-filled with `init`.
    ///
    /// # Panics
    ///
    /// If `init` yields more than `capacity` items.
    pub fn new<I>(handle: &Handle, capacity: usize, init: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut ring = Ring::new(capacity);
        for item in init {
            assert!(ring.try_push(item).is_ok(), "too many initial items for channel capacity");
        }
        Self {
            state: Rc::new(Latch::new(State {
                ring,
                waiting: VecDeque::new(),
                closed: false,
            })),
            handle: handle.clone(),
        }
    }

    fn settle(actions: Vec<Action<T>>) {
        for action in actions {
            action.run();
        }
    }

    /// Send every item, in order. Settles once the last one is buffered or
    /// handed to a receiver.
    pub fn send<I>(&self, items: I) -> Future<()>
    where
        I: IntoIterator<Item = T>,
    {
        let mut items: VecDeque<T> = items.into_iter().collect();
        let mut fut = Future::new();
        let mut promise = Some(self.handle.make_future(&mut fut));
        let mut actions = Vec::new();
        let closed = self.state.with(|st| {
            if st.closed {
                return true;
            }
            st.prune(&mut actions);
            if !st.senders_waiting() {
                st.feed_receivers(&mut items, &mut actions);
                st.ring.push_from(&mut items);
            }
            if !items.is_empty() {
                if let Some(promise) = promise.take() {
                    trace!(left = items.len(), "channel send parked");
                    st.waiting.push_back(Waiting::Send {
                        promise,
                        items: std::mem::take(&mut items),
                    });
                }
            }
            false
        });
        drop(items);
        Self::settle(actions);
        if let Some(promise) = promise {
            if closed {
                promise.reject(Error::Closed);
            } else {
                promise.resolve(());
            }
        }
        fut
    }

    /// Receive exactly `n` items. Settles once all `n` have arrived.
    pub fn receive(&self, n: usize) -> Future<Vec<T>> {
        let mut fut = Future::new();
        let mut promise = Some(self.handle.make_future(&mut fut));
        let mut actions = Vec::new();
        let outcome = self.state.with(|st| {
            if st.closed {
                return Err(Error::Closed);
            }
            let mut buf = Vec::with_capacity(n);
            st.prune(&mut actions);
            if !st.receivers_waiting() {
                st.ring.pop_into(&mut buf, n);
                st.drain_senders(&mut buf, n, &mut actions);
                st.refill(&mut actions);
            }
            if buf.len() < n {
                if let Some(promise) = promise.take() {
                    trace!(have = buf.len(), want = n, "channel receive parked");
                    st.waiting.push_back(Waiting::Receive { promise, buf, want: n });
                }
                return Ok(Vec::new());
            }
            Ok(buf)
        });
        Self::settle(actions);
        if let Some(promise) = promise {
            match outcome {
                Ok(items) => promise.resolve(items),
                Err(err) => promise.reject(err),
            };
        }
        fut
    }

    /// Close: drop buffered items and reject every waiting request with
    /// [`Error::Closed`]. Returns `true` on the first call.
    pub fn close(&self) -> bool {
        let taken = self.state.with(|st| {
            if st.closed {
                return None;
            }
            st.closed = true;
            Some((st.ring.take_all(), std::mem::take(&mut st.waiting)))
        });
        let Some((items, waiting)) = taken else {
            return false;
        };
        trace!(dropped = items.len(), waiting = waiting.len(), "channel closed");
        drop(items);
        for w in waiting {
            match w {
                Waiting::Send { promise, items } => {
                    drop(items);
                    promise.reject_later(Error::Closed);
                }
                Waiting::Receive { promise, buf, .. } => {
                    drop(buf);
                    promise.reject_later(Error::Closed);
                }
            }
        }
        true
    }
}

impl<T: 'static> Channel<T> {
    /// Items currently buffered.
    pub fn size(&self) -> usize {
        self.state.with(|st| st.ring.len())
    }

    /// Buffer capacity.
    pub fn capacity(&self) -> usize {
        self.state.with(|st| st.ring.capacity())
    }

    /// Has [`close`](Channel::close) been called?
    pub fn is_closed(&self) -> bool {
        self.state.with(|st| st.closed)
    }

    /// Is the buffer full?
    pub fn is_full(&self) -> bool {
        self.state.with(|st| st.ring.is_full())
    }
}

impl<T: 'static> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            handle: self.handle.clone(),
        }
    }
}

impl<T: 'static> Drop for Channel<T> {
    fn drop(&mut self) {
        if Rc::strong_count(&self.state) != 1 {
            return;
        }
        self.close();
    }
}

impl<T: 'static> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state.with(|st| {
            f.debug_struct("Channel")
                .field("size", &st.ring.len())
                .field("capacity", &st.ring.capacity())
                .field("waiting", &st.waiting.len())
                .field("closed", &st.closed)
                .finish()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Manager;

    #[test]
    fn buffered_send_settles_immediately() {
        let m = Manager::new();
        let ch = Channel::new(&m, 4, [1]);
        let mut sent = ch.send([2, 3]);
        assert_eq!(sent.try_take(), Some(Ok(())));
        assert_eq!(ch.size(), 3);
        let mut got = ch.receive(3);
        assert_eq!(got.try_take(), Some(Ok(vec![1, 2, 3])));
        assert_eq!(ch.size(), 0);
    }

    #[test]
    fn sender_parks_until_drained() {
        let m = Manager::new();
        let ch = Channel::new(&m, 2, []);
        let mut sent = ch.send([1, 2, 3, 4, 5]);
        assert!(!sent.is_set());
        assert!(ch.is_full());
        let mut got = ch.receive(4);
        assert_eq!(got.try_take(), Some(Ok(vec![1, 2, 3, 4])));
        assert_eq!(ch.size(), 1);
        // Sender completion travels through the local resolve queue.
        assert!(!sent.is_set());
        m.drive();
        assert_eq!(sent.try_take(), Some(Ok(())));
    }

    #[test]
    fn receiver_gathers_across_sends() {
        let m = Manager::new();
        let ch = Channel::new(&m, 1, []);
        let mut got = ch.receive(3);
        assert!(!got.is_set());
        let mut a = ch.send([1]);
        let mut b = ch.send([2, 3, 4]);
        assert_eq!(a.try_take(), Some(Ok(())));
        assert_eq!(b.try_take(), Some(Ok(())));
        assert_eq!(ch.size(), 1);
        m.drive();
        assert_eq!(got.try_take(), Some(Ok(vec![1, 2, 3])));
    }

    #[test]
    fn zero_capacity_hands_over_directly() {
        let m = Manager::new();
        let ch = Channel::new(&m, 0, []);
        let mut sent = ch.send(["a", "b"]);
        assert!(!sent.is_set());
        let mut got = ch.receive(2);
        assert_eq!(got.try_take(), Some(Ok(vec!["a", "b"])));
        m.drive();
        assert_eq!(sent.try_take(), Some(Ok(())));
    }

    #[test]
    fn close_rejects_waiters_and_later_calls() {
        let m = Manager::new();
        let ch = Channel::new(&m, 1, [7]);
        let mut sent = ch.send([8]);
        assert!(ch.close());
        assert!(!ch.close());
        assert!(ch.is_closed());
        assert_eq!(ch.size(), 0);
        m.drive();
        assert_eq!(sent.try_take(), Some(Err(Error::Closed)));
        assert_eq!(ch.receive(1).try_take(), Some(Err(Error::Closed)));
        assert_eq!(ch.send([1]).try_take(), Some(Err(Error::Closed)));
    }

    #[test]
    fn dropped_waiter_is_pruned() {
        let m = Manager::new();
        let ch = Channel::new(&m, 0, []);
        drop(ch.receive(2));
        let mut got = ch.receive(1);
        let mut sent = ch.send([5]);
        assert_eq!(sent.try_take(), Some(Ok(())));
        m.drive();
        assert_eq!(got.try_take(), Some(Ok(vec![5])));
    }

    #[test]
    fn dropping_last_clone_closes() {
        let m = Manager::new();
        let ch = Channel::<u8>::new(&m, 1, []);
        let mut got = ch.receive(1);
        let other = ch.clone();
        let mut sent = Channel::new(&m, 0, []).send([3u8]);
        drop(ch);
        assert!(!other.is_closed());
        drop(other);
        m.drive();
        assert_eq!(got.try_take(), Some(Err(Error::Closed)));
        assert_eq!(sent.try_take(), Some(Err(Error::Closed)));
    }
}
