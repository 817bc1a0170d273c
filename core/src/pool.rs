//! Generation-indexed object pools.
//!
//! This module provides [`HandlePool<T>`], an arena that hands out
//! [`Handle<T>`] values instead of references. A handle is an
//! `(index, generation)` pair: the index selects a slot, the generation
//! records which occupant of that slot the handle was issued for.
//!
//! # Motivation
//!
//! GPU resources are referenced from many places at once (passes, command
//! lists, descriptor tables) and outlive any single Rust borrow. Raw indices
//! would silently alias a new object once a slot is reused; handles make that
//! situation detectable instead:
//!
//! - removing an object bumps the slot generation
//! - every lookup compares generations and fails with [`PoolError::StaleHandle`]
//!   on mismatch
//!
//! Freed indices are reused last-in first-out, so reuse happens quickly.
//! Callers must never cache a raw index.
//!
//! # Example
//!
//! ```
//! use framegraph_core::pool::{HandlePool, PoolError};
//!
//! let mut pool = HandlePool::new();
//! let a = pool.add("albedo");
//! assert_eq!(pool.get(a), Ok(&"albedo"));
//!
//! pool.remove(a).unwrap();
//! let b = pool.add("normal");
//!
//! // Same slot, different generation.
//! assert_eq!(a.index(), b.index());
//! assert_ne!(a.generation(), b.generation());
//! assert!(matches!(pool.get(a), Err(PoolError::StaleHandle { .. })));
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A typed `(index, generation)` reference into a [`HandlePool`].
///
/// Handles are plain values: copying one does not copy or retain the object,
/// ownership stays with the pool.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Build a handle from its raw parts.
    ///
    /// Mostly useful for tests and for reconstructing handles that crossed an
    /// FFI or shader boundary. The pool still validates the generation.
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index of this handle.
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot had when this handle was issued.
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Reinterpret the handle for another pooled type.
    pub const fn cast<U>(self) -> Handle<U> {
        Handle::from_raw_parts(self.index, self.generation)
    }
}

// Manual impls so that `T` does not need to implement these traits.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

/// Errors returned by [`HandlePool`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The handle index is past the end of the pool.
    OutOfRange {
        /// Index carried by the handle.
        index: u32,
        /// Number of slots in the pool.
        len: u32,
    },
    /// The handle cannot be removed: its slot is vacant or was reissued.
    InvalidHandle {
        /// Index carried by the handle.
        index: u32,
        /// Generation carried by the handle.
        generation: u32,
    },
    /// The handle refers to an object that has been removed.
    StaleHandle {
        /// Index carried by the handle.
        index: u32,
        /// Generation carried by the handle.
        generation: u32,
        /// Current generation of the slot.
        current: u32,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { index, len } => {
                write!(f, "handle index {index} out of range (pool has {len} slots)")
            }
            Self::InvalidHandle { index, generation } => {
                write!(f, "invalid handle {index}v{generation}")
            }
            Self::StaleHandle {
                index,
                generation,
                current,
            } => write!(
                f,
                "stale handle {index}v{generation} (slot is at generation {current})"
            ),
        }
    }
}

impl std::error::Error for PoolError {}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of `T` addressed by generation-checked [`Handle<T>`]s.
#[derive(Debug)]
pub struct HandlePool<T> {
    slots: Vec<Slot<T>>,
    /// Vacant slot indices, most recently freed last.
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for HandlePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandlePool<T> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Create an empty pool with room for `capacity` objects.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// Insert a value and return a handle to it.
    ///
    /// Reuses the most recently freed slot if there is one, otherwise grows
    /// the pool.
    pub fn add(&mut self, value: T) -> Handle<T> {
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle::from_raw_parts(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle::from_raw_parts(index, 0)
    }

    /// Remove the object behind `handle` and return it.
    ///
    /// The slot generation is bumped so that `handle` (and every copy of it)
    /// becomes stale.
    pub fn remove(&mut self, handle: Handle<T>) -> Result<T, PoolError> {
        let len = self.slots.len() as u32;
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .ok_or(PoolError::OutOfRange {
                index: handle.index,
                len,
            })?;

        if slot.generation != handle.generation || slot.value.is_none() {
            return Err(PoolError::InvalidHandle {
                index: handle.index,
                generation: handle.generation,
            });
        }

        let value = slot.value.take().ok_or(PoolError::InvalidHandle {
            index: handle.index,
            generation: handle.generation,
        })?;

        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation == 0 {
            log::warn!(
                "HandlePool: generation of slot {} wrapped around",
                handle.index
            );
        }

        self.free.push(handle.index);
        self.live -= 1;
        Ok(value)
    }

    /// Get a reference to the object behind `handle`.
    pub fn get(&self, handle: Handle<T>) -> Result<&T, PoolError> {
        let slot = self.slot(handle)?;
        slot.value.as_ref().ok_or(PoolError::StaleHandle {
            index: handle.index,
            generation: handle.generation,
            current: slot.generation,
        })
    }

    /// Get a mutable reference to the object behind `handle`.
    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T, PoolError> {
        let len = self.slots.len() as u32;
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .ok_or(PoolError::OutOfRange {
                index: handle.index,
                len,
            })?;
        let current = slot.generation;
        if current != handle.generation {
            return Err(PoolError::StaleHandle {
                index: handle.index,
                generation: handle.generation,
                current,
            });
        }
        slot.value.as_mut().ok_or(PoolError::StaleHandle {
            index: handle.index,
            generation: handle.generation,
            current,
        })
    }

    /// Check whether `handle` currently resolves to an object.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_ok()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check if the pool holds no live objects.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated (live and vacant).
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over live objects in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::from_raw_parts(index as u32, slot.generation), value))
        })
    }

    /// Drain every live object, leaving all outstanding handles stale.
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.live);
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                drained.push(value);
            }
            self.free.push(index as u32);
        }
        drained.reverse();
        self.live = 0;
        drained
    }

    /// Drop every live object, leaving all outstanding handles stale.
    ///
    /// Slots are kept so generations keep increasing.
    pub fn clear(&mut self) {
        drop(self.drain());
    }

    fn slot(&self, handle: Handle<T>) -> Result<&Slot<T>, PoolError> {
        let slot = self
            .slots
            .get(handle.index as usize)
            .ok_or(PoolError::OutOfRange {
                index: handle.index,
                len: self.slots.len() as u32,
            })?;
        if slot.generation != handle.generation {
            return Err(PoolError::StaleHandle {
                index: handle.index,
                generation: handle.generation,
                current: slot.generation,
            });
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut pool = HandlePool::new();
        let a = pool.add(10);
        let b = pool.add(20);

        assert_eq!(pool.get(a), Ok(&10));
        assert_eq!(pool.get(b), Ok(&20));
        assert_eq!(pool.len(), 2);
        assert_eq!(a.generation(), 0);
    }

    #[test]
    fn test_get_mut() {
        let mut pool = HandlePool::new();
        let a = pool.add(String::from("a"));
        pool.get_mut(a).unwrap().push('b');
        assert_eq!(pool.get(a).unwrap(), "ab");
    }

    #[test]
    fn test_remove_makes_handle_stale() {
        let mut pool = HandlePool::new();
        let a = pool.add(1);
        assert_eq!(pool.remove(a), Ok(1));

        assert!(matches!(
            pool.get(a),
            Err(PoolError::StaleHandle {
                index: 0,
                generation: 0,
                current: 1
            })
        ));
        assert!(!pool.contains(a));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_double_remove_is_invalid() {
        let mut pool = HandlePool::new();
        let a = pool.add(1);
        pool.remove(a).unwrap();
        assert_eq!(
            pool.remove(a),
            Err(PoolError::InvalidHandle {
                index: 0,
                generation: 0
            })
        );
    }

    #[test]
    fn test_out_of_range() {
        let mut pool: HandlePool<u32> = HandlePool::new();
        let bogus = Handle::from_raw_parts(7, 0);
        assert_eq!(
            pool.get(bogus),
            Err(PoolError::OutOfRange { index: 7, len: 0 })
        );
        assert_eq!(
            pool.remove(bogus),
            Err(PoolError::OutOfRange { index: 7, len: 0 })
        );
    }

    #[test]
    fn test_lifo_reuse_bumps_generation() {
        let mut pool = HandlePool::new();
        let a = pool.add('a');
        let b = pool.add('b');
        let c = pool.add('c');

        pool.remove(a).unwrap();
        pool.remove(c).unwrap();

        // Most recently freed index comes back first.
        let d = pool.add('d');
        assert_eq!(d.index(), c.index());
        assert_eq!(d.generation(), 1);

        let e = pool.add('e');
        assert_eq!(e.index(), a.index());

        assert_eq!(pool.get(b), Ok(&'b'));
        assert_eq!(pool.get(d), Ok(&'d'));
        assert!(pool.get(c).is_err());
        assert_eq!(pool.slot_count(), 3);
    }

    #[test]
    fn test_stale_handle_never_resolves_to_new_object() {
        let mut pool = HandlePool::new();
        let mut stale = Vec::new();
        for round in 0..16 {
            let h = pool.add(round);
            stale.push(h);
            pool.remove(h).unwrap();
        }
        let fresh = pool.add(100);
        for h in stale {
            assert_ne!(h, fresh);
            assert!(pool.get(h).is_err());
        }
        assert_eq!(pool.get(fresh), Ok(&100));
    }

    #[test]
    fn test_iter_in_index_order() {
        let mut pool = HandlePool::new();
        let a = pool.add(1);
        let _b = pool.add(2);
        let _c = pool.add(3);
        pool.remove(a).unwrap();

        let values: Vec<_> = pool.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![2, 3]);
    }

    #[test]
    fn test_clear_invalidates_everything() {
        let mut pool = HandlePool::new();
        let a = pool.add(1);
        let b = pool.add(2);
        pool.clear();

        assert!(pool.is_empty());
        assert!(pool.get(a).is_err());
        assert!(pool.get(b).is_err());

        let c = pool.add(3);
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn test_drain_returns_values_in_order() {
        let mut pool = HandlePool::new();
        pool.add(1);
        let b = pool.add(2);
        pool.add(3);
        pool.remove(b).unwrap();

        assert_eq!(pool.drain(), vec![1, 3]);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_handle_cast_keeps_parts() {
        struct A;
        struct B;
        let h: Handle<A> = Handle::from_raw_parts(3, 9);
        let g: Handle<B> = h.cast();
        assert_eq!(g.index(), 3);
        assert_eq!(g.generation(), 9);
        assert_eq!(format!("{g:?}"), "Handle(3v9)");
    }

    #[test]
    fn test_error_display() {
        let err = PoolError::StaleHandle {
            index: 1,
            generation: 2,
            current: 3,
        };
        assert_eq!(
            err.to_string(),
            "stale handle 1v2 (slot is at generation 3)"
        );
    }
}
