//! Cross-thread bounded channel built from heap segments.
//!
//! Every `send` links one segment holding its items. A send that pushes the
//! buffered size over capacity keeps its promise in the segment as the
//! blocker; blockers are released once enough has been accepted. Receivers
//! poll with [`AsyncChannel::accept`] and park with [`AsyncChannel::listen`].
//!
//! Item order is preserved for a single producer and a single consumer.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use crate::async_future::{AsyncFuture, AsyncPromise};
use crate::error::Error;
use crate::manager::Handle;
use crate::util::SpinLock;

struct Segment<T> {
    items: std::vec::IntoIter<T>,
    blocker: Option<AsyncPromise<()>>,
}

struct ChanState<T> {
    segments: VecDeque<Segment<T>>,
    size: usize,
    /// Segments still carrying a blocker.
    blocked: usize,
    receivers: VecDeque<AsyncPromise<()>>,
}

impl<T> ChanState<T> {
    /// Every blocker, once the buffered size is back within capacity.
    fn release_blockers(&mut self, capacity: usize, out: &mut Vec<AsyncPromise<()>>) {
        if self.blocked == 0 || self.size > capacity {
            return;
        }
        for seg in &mut self.segments {
            out.extend(seg.blocker.take());
        }
        self.blocked = 0;
    }
}

struct Control<T> {
    state: SpinLock<ChanState<T>>,
    closed: AtomicBool,
    capacity: usize,
}

/// Cross-thread channel endpoint bound to one manager.
///
/// Obtain endpoints for other threads with [`share`](Self::share) and bind
/// them there with [`ChannelShare::attach`].
pub struct AsyncChannel<T> {
    control: Arc<Control<T>>,
    handle: Handle,
}

/// `Send` form of an [`AsyncChannel`], not yet bound to a manager.
pub struct ChannelShare<T> {
    control: Arc<Control<T>>,
}

impl<T: Send + 'static> AsyncChannel<T> {
    /// Channel whose sends block once more than `capacity` items are
    /// buffered.
    pub fn new(handle: &Handle, capacity: usize) -> Self {
        Self {
            control: Arc::new(Control {
                state: SpinLock::new(ChanState {
                    segments: VecDeque::new(),
                    size: 0,
                    blocked: 0,
                    receivers: VecDeque::new(),
                }),
                closed: AtomicBool::new(false),
                capacity,
            }),
            handle: handle.clone(),
        }
    }

    /// Endpoint that can be moved to another thread.
    pub fn share(&self) -> ChannelShare<T> {
        ChannelShare {
            control: Arc::clone(&self.control),
        }
    }

    /// Buffer `items` as one segment.
    ///
    /// Settles at once while the buffer stays within capacity; otherwise once
    /// consumers have drained it back to capacity or taken all of `items`.
    /// Rejects with [`Error::Closed`] on a closed channel.
    pub fn send<I>(&self, items: I) -> AsyncFuture<()>
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        let mut fut = AsyncFuture::new();
        let promise = self.handle.make_async_future(&mut fut);
        if self.control.closed.load(Ordering::Acquire) {
            drop(items);
            promise.reject(Error::Closed);
            return fut;
        }
        if items.is_empty() {
            promise.resolve(());
            return fut;
        }
        let len = items.len();
        let capacity = self.control.capacity;
        let mut st = self.control.state.lock();
        if self.control.closed.load(Ordering::Acquire) {
            drop(st);
            drop(items);
            promise.reject(Error::Closed);
            return fut;
        }
        st.size += len;
        let (blocker, ready) = if st.size > capacity {
            st.blocked += 1;
            (Some(promise), None)
        } else {
            (None, Some(promise))
        };
        st.segments.push_back(Segment {
            items: items.into_iter(),
            blocker,
        });
        let receiver = st.receivers.pop_front();
        let size = st.size;
        drop(st);
        trace!(len, size, blocked = ready.is_none(), "async channel send");
        if let Some(promise) = ready {
            promise.resolve(());
        }
        if let Some(receiver) = receiver {
            receiver.resolve(());
        }
        fut
    }

    /// Settles once items are buffered; rejects with [`Error::Closed`] once
    /// the channel is closed. Carries no payload: take items with
    /// [`accept`](Self::accept).
    pub fn listen(&self) -> AsyncFuture<()> {
        let mut fut = AsyncFuture::new();
        let promise = self.handle.make_async_future(&mut fut);
        if self.control.closed.load(Ordering::Acquire) {
            promise.reject(Error::Closed);
            return fut;
        }
        let mut st = self.control.state.lock();
        if self.control.closed.load(Ordering::Acquire) {
            drop(st);
            promise.reject(Error::Closed);
        } else if st.size > 0 {
            drop(st);
            promise.resolve(());
        } else {
            st.receivers.push_back(promise);
        }
        fut
    }

    /// Take up to `max` items without suspending.
    pub fn accept(&self, max: usize) -> Vec<T> {
        let mut out = Vec::new();
        self.accept_into(&mut out, max);
        out
    }

    /// Append up to `max` items to `out`; returns how many were appended.
    ///
    /// Takes head segments one after another until `max` items are gathered
    /// or nothing is buffered. The lock is released while each segment's
    /// items are moved out.
    pub fn accept_into(&self, out: &mut Vec<T>, max: usize) -> usize {
        let capacity = self.control.capacity;
        let mut release = Vec::new();
        let mut total = 0;
        while total < max {
            let mut st = self.control.state.lock();
            let Some(mut seg) = st.segments.pop_front() else {
                break;
            };
            let take = (max - total).min(seg.items.len());
            let drained = take == seg.items.len();
            st.size -= take;
            if seg.blocker.is_some() {
                // Counted again if the segment goes back with its blocker.
                st.blocked -= 1;
                if drained || st.size <= capacity {
                    release.extend(seg.blocker.take());
                }
            }
            st.release_blockers(capacity, &mut release);
            let more = st.size > 0;
            drop(st);

            out.extend(seg.items.by_ref().take(take));
            total += take;
            if !drained {
                self.put_back(seg, &mut release);
                break;
            }
            if !more {
                break;
            }
        }
        // More remains for another parked consumer.
        let next = if total > 0 {
            let mut st = self.control.state.lock();
            if st.size > 0 { st.receivers.pop_front() } else { None }
        } else {
            None
        };
        for promise in release {
            promise.resolve(());
        }
        if let Some(receiver) = next {
            receiver.resolve(());
        }
        total
    }

    /// Return a partly consumed segment to the head, or drop it if the
    /// channel closed meanwhile.
    fn put_back(&self, mut seg: Segment<T>, release: &mut Vec<AsyncPromise<()>>) {
        let mut st = self.control.state.lock();
        if self.control.closed.load(Ordering::Acquire) {
            drop(st);
            if let Some(blocker) = seg.blocker.take() {
                blocker.reject(Error::Closed);
            }
            return;
        }
        if seg.blocker.is_some() {
            st.blocked += 1;
        }
        st.segments.push_front(seg);
        st.release_blockers(self.control.capacity, release);
    }
}

impl<T> AsyncChannel<T> {
    /// Close: reject parked receivers and blocked senders with
    /// [`Error::Closed`] and drop buffered items. Returns `true` on the first
    /// call.
    pub fn close(&self) -> bool {
        close(&self.control)
    }

    /// Items buffered across all segments.
    pub fn size(&self) -> usize {
        self.control.state.lock().size
    }

    /// Buffered size above which senders block.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.control.capacity
    }

    /// Has the channel been closed?
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.control.closed.load(Ordering::Acquire)
    }
}

fn close<T>(control: &Control<T>) -> bool {
    if control.closed.swap(true, Ordering::AcqRel) {
        return false;
    }
    let mut st = control.state.lock();
    let segments = std::mem::take(&mut st.segments);
    let receivers = std::mem::take(&mut st.receivers);
    st.size = 0;
    st.blocked = 0;
    drop(st);
    trace!(segments = segments.len(), receivers = receivers.len(), "async channel closed");
    for receiver in receivers {
        receiver.reject(Error::Closed);
    }
    for mut seg in segments {
        if let Some(blocker) = seg.blocker.take() {
            blocker.reject(Error::Closed);
        }
    }
    true
}

impl<T> Drop for Control<T> {
    fn drop(&mut self) {
        close(self);
    }
}

impl<T> Clone for AsyncChannel<T> {
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
            handle: self.handle.clone(),
        }
    }
}

impl<T> fmt::Debug for AsyncChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncChannel")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T: Send + 'static> ChannelShare<T> {
    /// Bind this endpoint to the manager of the calling thread.
    pub fn attach(self, handle: &Handle) -> AsyncChannel<T> {
        AsyncChannel {
            control: self.control,
            handle: handle.clone(),
        }
    }
}

impl<T> ChannelShare<T> {
    /// Close without attaching first.
    pub fn close(&self) -> bool {
        close(&self.control)
    }
}

impl<T> Clone for ChannelShare<T> {
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
        }
    }
}

impl<T> fmt::Debug for ChannelShare<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelShare")
            .field("capacity", &self.control.capacity)
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

    fn settled(m: &Manager, fut: &mut AsyncFuture<()>) -> Option<Result<(), Error>> {
        m.drive();
        fut.try_take()
    }

    #[test]
    fn send_within_capacity_settles_and_accepts_in_order() {
        let m = manager();
        let ch = AsyncChannel::new(&m, 8);
        let mut a = ch.send([1, 2, 3]);
        let mut b = ch.send([4, 5]);
        assert_eq!(ch.size(), 5);
        assert_eq!(settled(&m, &mut a), Some(Ok(())));
        assert_eq!(b.try_take(), Some(Ok(())));
        assert_eq!(ch.accept(2), vec![1, 2]);
        assert_eq!(ch.accept(10), vec![3, 4, 5]);
        assert!(ch.accept(10).is_empty());
        assert_eq!(ch.size(), 0);
    }

    #[test]
    fn over_capacity_send_blocks_until_drained() {
        let m = manager();
        let ch = AsyncChannel::new(&m, 2);
        let mut big = ch.send([1, 2, 3, 4]);
        assert_eq!(settled(&m, &mut big), None);
        let mut out = Vec::new();
        assert_eq!(ch.accept_into(&mut out, 1), 1);
        assert_eq!(settled(&m, &mut big), None);
        assert_eq!(ch.accept_into(&mut out, 1), 1);
        assert_eq!(settled(&m, &mut big), Some(Ok(())));
        assert_eq!(out, vec![1, 2]);
        assert_eq!(ch.size(), 2);
    }

    #[test]
    fn listen_wakes_on_send() {
        let m = manager();
        let ch = AsyncChannel::<u8>::new(&m, 4);
        let mut l = ch.listen();
        assert_eq!(settled(&m, &mut l), None);
        let _sent = ch.send([9]);
        assert_eq!(settled(&m, &mut l), Some(Ok(())));
        let mut again = ch.listen();
        assert_eq!(settled(&m, &mut again), Some(Ok(())));
        assert_eq!(ch.accept(4), vec![9]);
    }

    #[test]
    fn close_rejects_everyone_and_fails_fast() {
        let m = manager();
        let ch = AsyncChannel::new(&m, 1);
        let mut blocked = ch.send([1, 2]);
        let other = ch.share().attach(&m);
        assert!(other.close());
        assert!(!ch.close());
        assert_eq!(ch.size(), 0);
        assert_eq!(settled(&m, &mut blocked), Some(Err(Error::Closed)));
        let mut late = ch.send([3]);
        assert_eq!(settled(&m, &mut late), Some(Err(Error::Closed)));
        let mut l = ch.listen();
        assert_eq!(settled(&m, &mut l), Some(Err(Error::Closed)));
        assert!(ch.accept(4).is_empty());
    }

    #[test]
    fn accept_fills_across_segments() {
        let m = manager();
        let ch = AsyncChannel::new(&m, 8);
        let _a = ch.send([1, 2]);
        let _b = ch.send([3, 4]);
        let _c = ch.send([5, 6, 7]);
        assert_eq!(ch.accept(5), vec![1, 2, 3, 4, 5]);
        assert_eq!(ch.size(), 2);
        let mut out = vec![0];
        assert_eq!(ch.accept_into(&mut out, 10), 2);
        assert_eq!(out, vec![0, 6, 7]);
        assert_eq!(ch.accept_into(&mut out, 0), 0);
    }

    #[test]
    fn accept_across_segments_releases_blocker() {
        let m = manager();
        let ch = AsyncChannel::new(&m, 2);
        let mut first = ch.send([1, 2]);
        let mut blocked = ch.send([3, 4, 5]);
        assert_eq!(settled(&m, &mut first), Some(Ok(())));
        assert_eq!(settled(&m, &mut blocked), None);
        assert_eq!(ch.accept(3), vec![1, 2, 3]);
        assert_eq!(settled(&m, &mut blocked), Some(Ok(())));
        assert_eq!(ch.accept(3), vec![4, 5]);
    }

    #[test]
    fn dropping_last_endpoint_closes() {
        let m = manager();
        let ch = AsyncChannel::new(&m, 1);
        let mut blocked = ch.send([1, 2]);
        let idle = AsyncChannel::<u8>::new(&m, 1);
        let mut listening = idle.listen();
        let share = idle.share();
        drop(ch);
        drop(idle);
        assert_eq!(settled(&m, &mut blocked), Some(Err(Error::Closed)));
        assert_eq!(settled(&m, &mut listening), None);
        drop(share);
        assert_eq!(settled(&m, &mut listening), Some(Err(Error::Closed)));
    }

    #[test]
    fn share_is_send() {
        fn assert_send<S: Send + Clone>() {}
        assert_send::<ChannelShare<String>>();
    }
}
