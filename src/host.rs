//! Archetype hosts: the concrete, per-archetype-type storage plus the
//! type-erased facade the world keeps a registry of.
//!
//! A [`Host<T>`] owns the actual [`crate::storage::Storage`] for one
//! archetype struct `T`. The world never talks to `Host<T>` directly except
//! when the caller already knows `T` (`World::create::<T>`); everywhere
//! else it goes through [`AnyHost`], a `downcast-rs` trait object,
//! following the same type-erasure shape the `0x112233-legion` example
//! crate uses for its own archetype chunk storage.

use std::any::TypeId;

use downcast_rs::{impl_downcast, Downcast};

use crate::descriptor::{Archetype, EntityDescriptor};
use crate::storage::array::ArrayStorage;
use crate::storage::sparse::SparseStorage;
use crate::storage::{Slot, Storage, DEFAULT_SPARSE_PAGE_SIZE};

/// Identifies one archetype host within a [`crate::world::World`]; a dense
/// index into its host registry, not the archetype's `TypeId` itself (the
/// world keeps a side map from `TypeId` to `ArchetypeId` for lookup).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ArchetypeId(pub(crate) usize);

impl ArchetypeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Which [`Storage`] shape a host uses. See §3/§4.1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageShape {
    /// One contiguous allocation, growth via `Vec`'s own doubling.
    Array,
    /// Paged, sparse index; good for archetypes with many short-lived or
    /// sparsely populated entities.
    Sparse { page_size: u32 },
}

impl Default for StorageShape {
    fn default() -> Self {
        StorageShape::Sparse {
            page_size: DEFAULT_SPARSE_PAGE_SIZE,
        }
    }
}

/// Per-host construction parameters (§3 supplement).
#[derive(Clone, Copy, Debug)]
pub struct HostConfig {
    pub shape: StorageShape,
    pub initial_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            shape: StorageShape::default(),
            initial_capacity: 0,
        }
    }
}

enum Backing<T> {
    Array(ArrayStorage<T>),
    Sparse(SparseStorage<T>),
}

impl<T> Backing<T> {
    fn new(config: HostConfig) -> Self {
        match config.shape {
            StorageShape::Array => Backing::Array(ArrayStorage::with_capacity(config.initial_capacity)),
            StorageShape::Sparse { page_size } => Backing::Sparse(SparseStorage::with_page_size(page_size)),
        }
    }

    fn allocate_with(&mut self, value: T) -> Slot {
        match self {
            Backing::Array(s) => s.allocate_with(value),
            Backing::Sparse(s) => s.allocate_with(value),
        }
    }

    fn release(&mut self, slot: Slot) -> Option<T> {
        match self {
            Backing::Array(s) => s.release(slot).ok(),
            Backing::Sparse(s) => s.release(slot).ok(),
        }
    }

    fn is_valid(&self, slot: Slot) -> bool {
        match self {
            Backing::Array(s) => s.is_valid(slot),
            Backing::Sparse(s) => s.is_valid(slot),
        }
    }

    fn get(&self, slot: Slot) -> Option<&T> {
        match self {
            Backing::Array(s) => s.get(slot).ok(),
            Backing::Sparse(s) => s.get(slot).ok(),
        }
    }

    fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        match self {
            Backing::Array(s) => s.get_mut(slot).ok(),
            Backing::Sparse(s) => s.get_mut(slot).ok(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Backing::Array(s) => s.len(),
            Backing::Sparse(s) => s.len(),
        }
    }

    fn allocated_slots(&self) -> Vec<Slot> {
        match self {
            Backing::Array(s) => s.allocated_slots(),
            Backing::Sparse(s) => s.allocated_slots(),
        }
    }
}

/// Owns the storage for every live instance of archetype `T`.
///
/// Has no create/release hooks of its own: §2.3/§4.3's `OnEntityCreated`/
/// `OnEntityReleased` are realized one layer up, as
/// [`crate::events::Added`]/[`crate::events::Removed`] dispatched by
/// [`crate::world::World`] (the only thing with the dispatcher access a
/// hook would need to actually notify anyone).
pub struct Host<T: Archetype> {
    backing: Backing<T>,
}

impl<T: Archetype> Host<T> {
    pub fn new(config: HostConfig) -> Self {
        Host {
            backing: Backing::new(config),
        }
    }

    pub fn create_with(&mut self, value: T) -> Slot {
        self.backing.allocate_with(value)
    }

    pub fn get(&self, slot: Slot) -> Option<&T> {
        self.backing.get(slot)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        self.backing.get_mut(slot)
    }

    pub fn release(&mut self, slot: Slot) -> bool {
        self.backing.release(slot).is_some()
    }
}

/// Type-erased facade over `Host<T>` for every `T`, so the world can keep
/// one homogeneous registry of archetype hosts.
pub trait AnyHost: Downcast {
    fn descriptor(&self) -> &'static EntityDescriptor;
    fn archetype_type_id(&self) -> TypeId;
    fn is_valid(&self, slot: Slot) -> bool;
    fn len(&self) -> usize;
    fn allocated_slots(&self) -> Vec<Slot>;

    /// Type-erased byte pointer to the component at `offset` within the
    /// entry at `slot`, or `None` if the slot is not currently allocated.
    ///
    /// # Safety
    ///
    /// The caller must only reinterpret the returned pointer as `&T` for
    /// the component type whose descriptor slot reported this `offset` —
    /// mismatching it with any other type is undefined behavior.
    unsafe fn component_ptr(&self, slot: Slot, offset: usize) -> Option<*const u8>;

    /// Mutable counterpart to [`AnyHost::component_ptr`]; same safety
    /// contract.
    unsafe fn component_ptr_mut(&mut self, slot: Slot, offset: usize) -> Option<*mut u8>;

    /// Releases `slot` without access to the concrete type; used by
    /// `World::remove` when only the `ArchetypeId` (not `T`) is known.
    fn release_erased(&mut self, slot: Slot) -> bool;
}
impl_downcast!(AnyHost);

impl<T: Archetype> AnyHost for Host<T> {
    fn descriptor(&self) -> &'static EntityDescriptor {
        T::descriptor()
    }

    fn archetype_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn is_valid(&self, slot: Slot) -> bool {
        self.backing.is_valid(slot)
    }

    fn len(&self) -> usize {
        self.backing.len()
    }

    fn allocated_slots(&self) -> Vec<Slot> {
        self.backing.allocated_slots()
    }

    unsafe fn component_ptr(&self, slot: Slot, offset: usize) -> Option<*const u8> {
        let base = self.backing.get(slot)? as *const T as *const u8;
        Some(base.add(offset))
    }

    unsafe fn component_ptr_mut(&mut self, slot: Slot, offset: usize) -> Option<*mut u8> {
        let base = self.backing.get_mut(slot)? as *mut T as *mut u8;
        Some(base.add(offset))
    }

    fn release_erased(&mut self, slot: Slot) -> bool {
        self.release(slot)
    }
}
