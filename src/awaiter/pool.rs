use tracing::debug;

use super::{Awaiter, AwaiterKey};
use crate::util::slab::Slab;

/// Per-manager awaiter arena.
///
/// Freed slots are recycled through the slab's free list. Once the number of
/// vacant slots passes `vacancy_limit`, vacant slots at the tail are released
/// so a burst does not pin its peak memory forever.
pub(crate) struct AwaiterPool {
    slab: Slab<Awaiter>,
    high_water: usize,
    vacancy_limit: usize,
}

impl AwaiterPool {
    pub(crate) fn new(vacancy_limit: usize) -> Self {
        Self {
            slab: Slab::new(),
            high_water: 0,
            vacancy_limit,
        }
    }

    #[inline]
    pub(crate) fn insert(&mut self, aw: Awaiter) -> AwaiterKey {
        let key = AwaiterKey(self.slab.insert(aw));
        self.high_water = self.high_water.max(self.slab.len());
        key
    }

    #[inline]
    pub(crate) fn get(&self, key: AwaiterKey) -> Option<&Awaiter> {
        self.slab.get(key.0)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, key: AwaiterKey) -> Option<&mut Awaiter> {
        self.slab.get_mut(key.0)
    }

    /// Rearm an awaiter under a fresh key so completions addressed to the
    /// previous pairing miss.
    /// The displaced awaiter is returned so its payload can be dropped
    /// outside the core latch.
    #[inline]
    pub(crate) fn rekey(&mut self, key: AwaiterKey, aw: Awaiter) -> Option<(AwaiterKey, Awaiter)> {
        let slot = self.slab.get_mut(key.0)?;
        let old = std::mem::replace(slot, aw);
        let fresh = self.slab.rekey(key.0)?;
        Some((AwaiterKey(fresh), old))
    }

    pub(crate) fn remove(&mut self, key: AwaiterKey) -> Option<Awaiter> {
        let aw = self.slab.remove(key.0)?;
        if self.slab.vacant() > self.vacancy_limit {
            let released = self.slab.trim_tail();
            if released > 0 {
                debug!(
                    released,
                    live = self.slab.len(),
                    slots = self.slab.slots(),
                    "awaiter pool trimmed"
                );
            }
        }
        Some(aw)
    }

    #[inline]
    pub(crate) fn live(&self) -> usize {
        self.slab.len()
    }

    #[inline]
    pub(crate) fn high_water(&self) -> usize {
        self.high_water
    }

    #[inline]
    pub(crate) fn slots(&self) -> usize {
        self.slab.slots()
    }

    pub(crate) fn drain(&mut self) -> Vec<Awaiter> {
        self.slab.drain()
    }
}
