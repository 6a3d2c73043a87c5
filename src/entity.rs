//! Type-erased handles to a single live entity.
//!
//! An [`EntityRef`] pairs a [`crate::storage::Slot`] with the archetype
//! host it was allocated from, and exposes typed component access purely
//! through `TypeId` lookups against that host's [`crate::descriptor::EntityDescriptor`]
//! — there is no compile-time archetype generic here, since the whole point
//! of `EntityRef` is to be handed to systems that are matched against
//! entities dynamically (§4.7).

use std::fmt;

use crate::descriptor::ComponentKey;
use crate::error::{ComponentNotFound, NoSuchEntity};
use crate::host::ArchetypeId;
use crate::storage::Slot;
use crate::world::World;

/// A handle to one entity: which archetype host it lives in, and its slot
/// within that host's storage.
///
/// `EntityRef` does not borrow the `World` — it is a small `Copy` value
/// that is only meaningful when resolved against the `World` it came from.
/// Resolving against a different `World`, or one where the entity has since
/// been released, returns [`NoSuchEntity`] rather than panicking.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub(crate) archetype: ArchetypeId,
    pub(crate) slot: Slot,
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("archetype", &self.archetype)
            .field("slot", &self.slot)
            .finish()
    }
}

impl EntityRef {
    pub(crate) fn new(archetype: ArchetypeId, slot: Slot) -> Self {
        EntityRef { archetype, slot }
    }

    pub fn archetype(&self) -> ArchetypeId {
        self.archetype
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Checked, type-erased component read.
    ///
    /// Fails with [`NoSuchEntity`] if the entity was already released, or
    /// [`ComponentNotFound`] if this archetype has no field of type `T`
    /// (the checked path always applies, matching §7's "GetRef always
    /// validated even in release builds").
    pub fn get<T: 'static>(&self, world: &World) -> Result<&T, GetError> {
        let host = world.host(self.archetype).ok_or(GetError::NoSuchEntity)?;
        let key = ComponentKey::of::<T>();
        let offset = host
            .descriptor()
            .find(key)
            .map(|slot| slot.offset)
            .ok_or(GetError::ComponentNotFound)?;
        // SAFETY: `offset` came from this exact host's own descriptor, and
        // `component_ptr` validates the slot before returning.
        unsafe {
            let ptr = host
                .component_ptr(self.slot, offset)
                .ok_or(GetError::NoSuchEntity)?;
            Ok(&*(ptr as *const T))
        }
    }

    /// Checked, type-erased mutable component access.
    pub fn get_mut<T: 'static>(&self, world: &mut World) -> Result<&mut T, GetError> {
        let host = world
            .host_mut(self.archetype)
            .ok_or(GetError::NoSuchEntity)?;
        let key = ComponentKey::of::<T>();
        let offset = host
            .descriptor()
            .find(key)
            .map(|slot| slot.offset)
            .ok_or(GetError::ComponentNotFound)?;
        unsafe {
            let ptr = host
                .component_ptr_mut(self.slot, offset)
                .ok_or(GetError::NoSuchEntity)?;
            Ok(&mut *(ptr as *mut T))
        }
    }

    /// Returns `Some`/`None` instead of an error; convenience for call
    /// sites that treat "missing" and "absent type" the same way.
    pub fn get_or_null<T: 'static>(&self, world: &World) -> Option<&T> {
        self.get(world).ok()
    }

    /// Whether the entity named by this reference is still live.
    pub fn is_alive(&self, world: &World) -> bool {
        world
            .host(self.archetype)
            .map(|host| host.is_valid(self.slot))
            .unwrap_or(false)
    }
}

/// Error from [`EntityRef::get`]/[`EntityRef::get_mut`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GetError {
    NoSuchEntity,
    ComponentNotFound,
}

impl fmt::Display for GetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchEntity => fmt::Display::fmt(&NoSuchEntity, f),
            Self::ComponentNotFound => fmt::Display::fmt(&ComponentNotFound, f),
        }
    }
}

impl std::error::Error for GetError {}

impl From<NoSuchEntity> for GetError {
    fn from(_: NoSuchEntity) -> Self {
        GetError::NoSuchEntity
    }
}

impl From<ComponentNotFound> for GetError {
    fn from(_: ComponentNotFound) -> Self {
        GetError::ComponentNotFound
    }
}
