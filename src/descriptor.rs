//! Per-archetype component layout.
//!
//! An [`EntityDescriptor`] maps each component type stored in an archetype
//! tuple to its byte offset and size. It is built once per archetype type
//! (see [`Archetype::descriptor`]) and memoised behind a `OnceLock` by the
//! `#[derive(Archetype)]` macro in `weave-derive` — the descriptor reuses
//! the layout the compiler already chose for the struct rather than
//! recomputing alignment rules by hand.

use std::any::TypeId;

/// Identifies one component slot within an archetype: its Rust type plus a
/// disambiguator distinguishing repeated fields of the same generic
/// component type (e.g. two `Timer<Cooldown>` fields in one archetype).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComponentKey {
    pub type_id: TypeId,
    pub disambiguator: u16,
}

impl ComponentKey {
    /// The key for the first (and typically only) field of type `T`.
    pub fn of<T: 'static>() -> Self {
        ComponentKey {
            type_id: TypeId::of::<T>(),
            disambiguator: 0,
        }
    }
}

/// One entry of an [`EntityDescriptor`]: a component's location within the
/// archetype's stored tuple.
#[derive(Clone, Copy, Debug)]
pub struct ComponentSlot {
    pub key: ComponentKey,
    pub offset: usize,
    pub size: usize,
}

/// Maps component type to byte offset/size within a stored archetype tuple.
///
/// Built once per archetype and never mutated afterwards (§3: "process-wide,
/// memoised by archetype identity; never destroyed").
#[derive(Debug)]
pub struct EntityDescriptor {
    slots: Vec<ComponentSlot>,
    stride: usize,
}

impl EntityDescriptor {
    /// Constructs a descriptor from a fixed list of component slots and the
    /// archetype's total stride (`size_of::<T>()`).
    ///
    /// Called by the generated `#[derive(Archetype)]` impl; not normally
    /// constructed by hand.
    pub fn new(stride: usize, slots: Vec<ComponentSlot>) -> Self {
        EntityDescriptor { slots, stride }
    }

    /// Size in bytes of the stored archetype tuple.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// All component slots, in declaration order.
    pub fn slots(&self) -> &[ComponentSlot] {
        &self.slots
    }

    /// Looks up a slot by its full key (type + disambiguator).
    pub fn find(&self, key: ComponentKey) -> Option<&ComponentSlot> {
        self.slots.iter().find(|slot| slot.key == key)
    }

    /// Whether any field of the given component type is present
    /// (disambiguator 0, the common case of typed component access).
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.slots.iter().any(|slot| slot.key.type_id == type_id)
    }

    /// Whether every type in `type_ids` has a slot in this descriptor.
    /// Used by [`crate::system::matcher::Has`] and its combinators.
    pub fn contains_all(&self, type_ids: &[TypeId]) -> bool {
        type_ids.iter().all(|ty| self.contains(*ty))
    }
}

/// Implemented by every archetype tuple struct, via
/// `#[derive(weave_derive::Archetype)]`.
///
/// An archetype is a fixed, ordered set of component types stored as one
/// Rust struct; the derive macro builds the [`EntityDescriptor`] that maps
/// each field back to its offset for type-erased access through
/// [`crate::entity::EntityRef::get`].
pub trait Archetype: Sized + Send + Sync + 'static {
    /// Returns the memoised descriptor for this archetype type.
    fn descriptor() -> &'static EntityDescriptor;
}
