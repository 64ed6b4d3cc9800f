//! Generational slab backing the awaiter pool, the task table and the
//! combinator table.
//!
//! Keys carry a generation so a key that outlived its entry (a stale
//! cross-thread completion, a task that already finished) simply misses.

/// Index plus generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlabKey {
    index: u32,
    generation: u32,
}

impl SlabKey {
    /// Pack into a non-zero `u64`, so an atomic slot can use 0 as "empty".
    #[inline]
    pub fn pack(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`SlabKey::pack`].
    #[inline]
    pub fn unpack(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Slab<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
    // Never 0, so packed keys are never 0.
    next_generation: u32,
}

impl<T> Slab<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
            next_generation: 1,
        }
    }

    #[inline]
    fn bump(&mut self) -> u32 {
        let g = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        g
    }

    pub fn insert(&mut self, value: T) -> SlabKey {
        let generation = self.bump();
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let e = &mut self.entries[index as usize];
            debug_assert!(e.value.is_none());
            e.generation = generation;
            e.value = Some(value);
            return SlabKey { index, generation };
        }
        let index = u32::try_from(self.entries.len()).expect("slab exceeded u32::MAX entries");
        self.entries.push(Entry {
            generation,
            value: Some(value),
        });
        SlabKey { index, generation }
    }

    #[inline]
    fn entry(&self, key: SlabKey) -> Option<&Entry<T>> {
        self.entries
            .get(key.index as usize)
            .filter(|e| e.generation == key.generation)
    }

    #[inline]
    pub fn get(&self, key: SlabKey) -> Option<&T> {
        self.entry(key).and_then(|e| e.value.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, key: SlabKey) -> Option<&mut T> {
        self.entries
            .get_mut(key.index as usize)
            .filter(|e| e.generation == key.generation)
            .and_then(|e| e.value.as_mut())
    }

    pub fn remove(&mut self, key: SlabKey) -> Option<T> {
        let e = self
            .entries
            .get_mut(key.index as usize)
            .filter(|e| e.generation == key.generation)?;
        let v = e.value.take()?;
        self.free.push(key.index);
        self.len -= 1;
        Some(v)
    }

    /// Give a live entry a fresh generation, invalidating every older key.
    pub fn rekey(&mut self, key: SlabKey) -> Option<SlabKey> {
        self.get(key)?;
        let generation = self.bump();
        self.entries[key.index as usize].generation = generation;
        Some(SlabKey {
            index: key.index,
            generation,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated slots, live or vacant.
    #[inline]
    pub fn slots(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn vacant(&self) -> usize {
        self.free.len()
    }

    /// Release vacant slots at the tail; returns how many were dropped.
    pub fn trim_tail(&mut self) -> usize {
        let before = self.entries.len();
        while matches!(self.entries.last(), Some(e) if e.value.is_none()) {
            self.entries.pop();
        }
        let len = self.entries.len();
        if len < before {
            self.free.retain(|&i| (i as usize) < len);
            self.entries.shrink_to(len + self.free.len());
        }
        before - len
    }

    /// Remove every live value, leaving the slab empty.
    pub fn drain(&mut self) -> Vec<T> {
        self.free.clear();
        self.len = 0;
        self.entries.drain(..).filter_map(|e| e.value).collect()
    }

    /// Keys of every live entry.
    pub fn keys(&self) -> Vec<SlabKey> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.value.is_some())
            .map(|(i, e)| SlabKey {
                index: i as u32,
                generation: e.generation,
            })
            .collect()
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}
