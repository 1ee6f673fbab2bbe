//! Generational slab for connection state.
//!
//! Slots are handed out LIFO from a free stack (recently freed slots are
//! still warm in cache) and fall back to never-used slots until
//! `max_slots` is reached. Every `remove()` bumps the slot's generation,
//! so a `ConnId` captured before the removal never resolves again, even
//! after the slot is reused.

use ringport_core::error::{Result, RingportError};
use ringport_core::token::{ConnId, GENERATION_MASK};

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Slab<T> {
    entries: Vec<Entry<T>>,
    /// LIFO stack of free slot indices (for reuse)
    free: Vec<u32>,
    max_slots: usize,
    len: usize,
}

impl<T> Slab<T> {
    pub fn new(max_slots: usize) -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            max_slots,
            len: 0,
        }
    }

    /// Store `value`, returning its id. `SlabFull` once every slot is taken.
    pub fn insert(&mut self, value: T) -> Result<ConnId> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                if self.entries.len() >= self.max_slots {
                    return Err(RingportError::SlabFull);
                }
                self.entries.push(Entry { generation: 0, value: None });
                (self.entries.len() - 1) as u32
            }
        };

        let entry = &mut self.entries[slot as usize];
        debug_assert!(entry.value.is_none());
        entry.value = Some(value);
        self.len += 1;
        Ok(ConnId::new(slot, entry.generation))
    }

    #[inline]
    pub fn get(&self, id: ConnId) -> Option<&T> {
        let entry = self.entries.get(id.slot() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }
        entry.value.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut T> {
        let entry = self.entries.get_mut(id.slot() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }
        entry.value.as_mut()
    }

    /// Take the value out and retire `id`.
    pub fn remove(&mut self, id: ConnId) -> Option<T> {
        let entry = self.entries.get_mut(id.slot() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1) & GENERATION_MASK;
        self.free.push(id.slot());
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub fn contains(&self, id: ConnId) -> bool {
        self.get(id).is_some()
    }

    /// Occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnId, &T)> {
        self.entries.iter().enumerate().filter_map(|(slot, e)| {
            e.value
                .as_ref()
                .map(|v| (ConnId::new(slot as u32, e.generation), v))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut slab = Slab::new(4);
        let a = slab.insert("a").unwrap();
        let b = slab.insert("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(slab.get(a), Some(&"a"));
        assert_eq!(slab.len(), 2);

        assert_eq!(slab.remove(a), Some("a"));
        assert_eq!(slab.get(a), None);
        assert_eq!(slab.remove(a), None);
        assert_eq!(slab.len(), 1);
    }

    #[test]
    fn test_lifo_reuse_bumps_generation() {
        let mut slab = Slab::new(4);
        let a = slab.insert(1).unwrap();
        let _b = slab.insert(2).unwrap();
        slab.remove(a);

        let c = slab.insert(3).unwrap();
        assert_eq!(c.slot(), a.slot());
        assert_eq!(c.generation(), a.generation() + 1);
        // stale id never resolves to the new occupant
        assert_eq!(slab.get(a), None);
        assert_eq!(slab.get_mut(a), None);
        assert_eq!(slab.get(c), Some(&3));
    }

    #[test]
    fn test_full() {
        let mut slab = Slab::new(2);
        slab.insert(()).unwrap();
        let b = slab.insert(()).unwrap();
        assert_eq!(slab.insert(()), Err(RingportError::SlabFull));
        slab.remove(b);
        assert!(slab.insert(()).is_ok());
    }

    #[test]
    fn test_generation_wraps_within_token_bits() {
        let mut slab = Slab::new(1);
        let mut id = slab.insert(0u8).unwrap();
        for _ in 0..=GENERATION_MASK {
            slab.remove(id);
            id = slab.insert(0u8).unwrap();
        }
        assert_eq!(id.generation(), 0);
    }

    #[test]
    fn test_iter_skips_free_slots() {
        let mut slab = Slab::new(4);
        let a = slab.insert('a').unwrap();
        let b = slab.insert('b').unwrap();
        slab.remove(a);
        let seen: Vec<_> = slab.iter().collect();
        assert_eq!(seen, vec![(b, &'b')]);
    }
}
