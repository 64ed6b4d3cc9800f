use std::sync::atomic::{AtomicUsize, Ordering};

static THREAD_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Small dense id of the current thread, used to tag managers in logs and
    /// to check which thread owns a remote handle.
    static THREAD_ID: usize = THREAD_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
}

/// Get the dense id of the current thread.
pub fn current() -> usize {
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    #[test]
    fn ids_differ_across_threads() {
        let here = super::current();
        assert_eq!(here, super::current());
        let there = std::thread::spawn(super::current).join().unwrap();
        assert_ne!(here, there);
    }
}
