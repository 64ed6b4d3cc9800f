/// Lightweight wait budget: bounded spin then yield; never parks.
///
/// Used by [`SpinLock`](super::SpinLock) while another thread holds one of the
/// cross-thread lists. Critical sections are O(1) splices, so the hot phase
/// nearly always wins before the yield phase is reached.
#[derive(Copy, Clone, Debug)]
pub struct WaitBudget {
    spins: u32,
    yields: u32,
    spin_cap: u32,
    yield_cap: u32,
}

impl WaitBudget {
    /// Create a hot wait budget optimized for high contention.
    #[inline]
    pub fn hot() -> Self {
        Self {
            spins: 0,
            yields: 0,
            spin_cap: 128,
            yield_cap: 8,
        }
    }

    /// Reset the wait budget counters.
    #[inline]
    pub fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
    }

    /// Perform one step of the wait strategy (spin, yield, or keep spinning).
    #[inline]
    pub fn step(&mut self) {
        if self.spins < self.spin_cap {
            core::hint::spin_loop();
            self.spins += 1;
        } else if self.yields < self.yield_cap {
            std::thread::yield_now();
            self.yields += 1;
        } else {
            // Out of yields: go back to a short spin round instead of parking.
            self.spins = self.spin_cap / 2;
            std::thread::yield_now();
        }
    }

    /// Retry `attempt` until it succeeds, stepping the budget between tries.
    #[inline]
    pub fn retry<R>(mut self, mut attempt: impl FnMut() -> Option<R>) -> R {
        loop {
            if let Some(v) = attempt() {
                return v;
            }
            self.step();
        }
    }
}

impl Default for WaitBudget {
    fn default() -> Self {
        Self {
            spins: 0,
            yields: 0,
            spin_cap: 64,
            yield_cap: 4,
        }
    }
}
