//! Slot-addressed storage for archetype tuples.
//!
//! Two interchangeable shapes implement [`Storage`]: [`array::ArrayStorage`]
//! (one contiguous allocation plus a free list) and
//! [`sparse::SparseStorage`] (fixed-size pages allocated on demand, for
//! archetypes with many short-lived or sparsely-populated entities). Both
//! hand out [`Slot`] handles carrying a generation counter, mirroring the
//! `(gen, idx)` pair the teacher crate's own entity allocator
//! (`src/entity/entities.rs`) uses to detect use-after-release.

pub mod array;
pub mod sparse;

use std::fmt;
use std::num::NonZeroU32;

use crate::error::InvalidSlot;

/// Default page size for [`sparse::SparseStorage`], matching §4.1's default.
pub const DEFAULT_SPARSE_PAGE_SIZE: u32 = 256;

/// A stable integer handle into a [`Storage`].
///
/// `index` identifies the slot; `generation` changes every time the index
/// is reused after a `release`, so a stale `Slot` is detectably invalid
/// rather than silently aliasing whatever was allocated into the same
/// index afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub(crate) index: u32,
    pub(crate) generation: NonZeroU32,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("index", &self.index)
            .field("generation", &self.generation.get())
            .finish()
    }
}

impl Slot {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation.get()
    }
}

fn first_generation() -> NonZeroU32 {
    NonZeroU32::new(1).unwrap()
}

fn next_generation(gen: NonZeroU32) -> NonZeroU32 {
    // Wrap rather than panic: an index exhausting u32::MAX reuses is not a
    // realistic workload, but we still avoid UB/overflow on debug builds.
    NonZeroU32::new(gen.get().wrapping_add(1)).unwrap_or_else(first_generation)
}

/// Common contract for [`array::ArrayStorage`] and [`sparse::SparseStorage`].
///
/// `AllocateSlot`/`Release`/`GetRef` from §4.1 of the spec this crate
/// implements.
pub trait Storage<T> {
    /// Allocates a slot holding `T::default()`.
    fn allocate(&mut self) -> Slot
    where
        T: Default;

    /// Allocates a slot holding `value`.
    fn allocate_with(&mut self, value: T) -> Slot;

    /// Returns the slot to the free pool. After this call `is_valid(slot)`
    /// is `false` and the payload cell may be reused by a later allocation.
    fn release(&mut self, slot: Slot) -> Result<T, InvalidSlot>;

    /// Whether `slot` currently names a live entry.
    fn is_valid(&self, slot: Slot) -> bool;

    /// Checked reference to the payload. Fails if `slot` is not currently
    /// allocated.
    fn get(&self, slot: Slot) -> Result<&T, InvalidSlot>;

    /// Checked mutable reference to the payload.
    fn get_mut(&mut self, slot: Slot) -> Result<&mut T, InvalidSlot>;

    /// Unchecked reference to the payload.
    ///
    /// # Safety
    ///
    /// `slot` must currently be allocated (`is_valid(slot)`); calling this
    /// with a stale or never-allocated slot is a contract violation.
    unsafe fn get_unchecked(&self, slot: Slot) -> &T;

    /// Unchecked mutable reference to the payload.
    ///
    /// # Safety
    ///
    /// Same requirement as [`Storage::get_unchecked`].
    unsafe fn get_unchecked_mut(&mut self, slot: Slot) -> &mut T;

    /// Number of currently allocated slots.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates every currently allocated slot. Order is not specified.
    fn allocated_slots(&self) -> Vec<Slot>;

    /// Copies the current values of `slots` into `out`, appending to any
    /// existing contents. The inverse of [`Storage::write`].
    fn fetch(&self, slots: &[Slot], out: &mut Vec<T>)
    where
        T: Clone,
    {
        out.reserve(slots.len());
        for &slot in slots {
            if let Ok(value) = self.get(slot) {
                out.push(value.clone());
            }
        }
    }

    /// Writes `values` back into the corresponding `slots`, in order.
    fn write(&mut self, slots: &[Slot], values: &[T])
    where
        T: Clone,
    {
        for (&slot, value) in slots.iter().zip(values) {
            if let Ok(cell) = self.get_mut(slot) {
                *cell = value.clone();
            }
        }
    }
}

/// `CreateSiblingStorage<U>` from §4.1: constructs a storage of the same
/// shape and capacity parameters as `self`, for a different payload type
/// `U`. Lets a caller building a new archetype's columns choose the shape
/// once (array vs. sparse, page size, initial capacity) and stamp out one
/// sibling storage per component type instead of re-deriving the shape for
/// each.
///
/// A plain method on `Storage<T>` can't express "same concrete shape, new
/// type parameter" without a generic associated type, so this is a
/// separate trait parameterized by the sibling's payload type, implemented
/// once per concrete storage shape (not per `T`) in `array.rs`/`sparse.rs`.
pub trait CreateSiblingStorage<U> {
    type Sibling: Storage<U>;

    /// Builds an empty sibling with the same capacity/page-size parameters
    /// as `self`, holding `U` instead of whatever `self` holds.
    fn create_sibling(&self) -> Self::Sibling;
}
