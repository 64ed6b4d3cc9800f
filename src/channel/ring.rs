//! Fixed-capacity ring buffer backing the intra-thread channel.
//! - One allocation at construction; no per-op allocation.
//! - Single-threaded: plain indices, no atomics.
//! - Capacity may be zero (every push fails, every pop is empty).

use std::collections::VecDeque;
use std::mem::MaybeUninit;

pub(crate) struct Ring<T> {
    buf: Box<[MaybeUninit<T>]>,
    // Index of the oldest element.
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buf: Box::new_uninit_slice(capacity),
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    #[inline]
    fn slot(&self, offset: usize) -> usize {
        let idx = self.head + offset;
        if idx >= self.buf.len() { idx - self.buf.len() } else { idx }
    }

    /// Try to push a value; `Err(value)` if full.
    #[inline]
    pub(crate) fn try_push(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        let idx = self.slot(self.len);
        self.buf[idx].write(value);
        self.len += 1;
        Ok(())
    }

    /// Try to pop the oldest value.
    #[inline]
    pub(crate) fn try_pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: slots head..head+len are initialized; the slot is marked
        // vacant below before anything can observe it again.
        let value = unsafe { self.buf[self.head].assume_init_read() };
        self.head = self.slot(1);
        self.len -= 1;
        Some(value)
    }

    /// Move elements from the front of `src` until the ring is full.
    pub(crate) fn push_from(&mut self, src: &mut VecDeque<T>) -> usize {
        let mut pushed = 0;
        while !self.is_full() {
            let Some(value) = src.pop_front() else { break };
            // Cannot fail: checked not full above.
            let _ = self.try_push(value);
            pushed += 1;
        }
        pushed
    }

    /// Move up to `want - dst.len()` of the oldest elements into `dst`.
    pub(crate) fn pop_into(&mut self, dst: &mut Vec<T>, want: usize) -> usize {
        let n = want.saturating_sub(dst.len()).min(self.len);
        dst.reserve(n);
        for _ in 0..n {
            if let Some(value) = self.try_pop() {
                dst.push(value);
            }
        }
        n
    }

    /// Move every buffered element out, oldest first.
    pub(crate) fn take_all(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        let len = self.len;
        self.pop_into(&mut out, len);
        out
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Drain remaining initialized elements to drop them.
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn wraps_around_in_fifo_order() {
        let mut r = Ring::new(3);
        let mut src: VecDeque<_> = (0..5).collect();
        assert_eq!(r.push_from(&mut src), 3);
        assert!(r.is_full());
        let mut out = Vec::new();
        assert_eq!(r.pop_into(&mut out, 2), 2);
        assert_eq!(r.push_from(&mut src), 2);
        assert!(src.is_empty());
        assert_eq!(r.take_all(), vec![2, 3, 4]);
        assert_eq!(out, vec![0, 1]);
        assert!(r.is_empty());
    }

    #[test]
    fn zero_capacity_holds_nothing() {
        let mut r = Ring::<u8>::new(0);
        assert!(r.is_full() && r.is_empty());
        assert_eq!(r.try_push(1), Err(1));
        assert_eq!(r.try_pop(), None);
        let mut src = VecDeque::from([1, 2]);
        assert_eq!(r.push_from(&mut src), 0);
    }

    #[test]
    fn pop_into_respects_existing_len() {
        let mut r = Ring::new(4);
        r.push_from(&mut VecDeque::from([1, 2, 3, 4]));
        let mut out = vec![0];
        assert_eq!(r.pop_into(&mut out, 3), 2);
        assert_eq!(out, vec![0, 1, 2]);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn drop_releases_buffered_values() {
        let tracker = Rc::new(());
        let mut r = Ring::new(4);
        for _ in 0..3 {
            assert!(r.try_push(Rc::clone(&tracker)).is_ok());
        }
        drop(r.try_pop());
        assert_eq!(Rc::strong_count(&tracker), 3);
        drop(r);
        assert_eq!(Rc::strong_count(&tracker), 1);
    }
}
