//! Built-in lifecycle events dispatched by [`crate::world::World`].
//!
//! Any `'static` type can be sent through the dispatcher (§5), but the core
//! itself relies on a handful of marker events to drive reactive systems
//! and addon teardown; those live here rather than in `world.rs` so system
//! code can `use weave::events::*` without pulling in the whole world
//! module.

use std::any::TypeId;
use std::marker::PhantomData;

/// Fired after an entity finishes construction, once all of its initial
/// components are in place.
#[derive(Clone, Copy, Debug)]
pub struct Added;

/// Fired immediately before an entity's storage slot is released. Handlers
/// still have valid component access at the time this fires.
#[derive(Clone, Copy, Debug)]
pub struct Removed;

/// Fired once, after an addon or world-scoped object is disposed, so
/// dependents sharing ownership through a cycle (§9) can react instead of
/// relying on `Drop` order.
#[derive(Clone, Copy, Debug)]
pub struct Disposed;

/// Fired by [`crate::world::World::clear_empty_hosts`] for every archetype
/// host it drops, after the host's storage is gone. Carries the archetype
/// id rather than an `EntityRef`, since by the time this fires there is no
/// entity left to name.
#[derive(Clone, Copy, Debug)]
pub struct HostRemoved {
    pub archetype: crate::host::ArchetypeId,
}

/// Per-component-type variant of [`Added`], sent in addition to the
/// untyped event so a reactive system can listen narrowly for "some `T`
/// was added" without inspecting every entity creation. Not emitted by the
/// core itself — see [`crate::world::World::notify_component_added`].
#[derive(Debug)]
pub struct AddedComponent<T>(PhantomData<fn() -> T>);

impl<T: 'static> AddedComponent<T> {
    pub(crate) fn marker() -> Self {
        AddedComponent(PhantomData)
    }

    pub fn type_id() -> TypeId {
        TypeId::of::<AddedComponent<T>>()
    }
}

/// Per-component-type variant of [`Removed`]. Not emitted by the core
/// itself — see [`crate::world::World::notify_component_removed`].
#[derive(Debug)]
pub struct RemovedComponent<T>(PhantomData<fn() -> T>);

impl<T: 'static> RemovedComponent<T> {
    pub(crate) fn marker() -> Self {
        RemovedComponent(PhantomData)
    }

    pub fn type_id() -> TypeId {
        TypeId::of::<RemovedComponent<T>>()
    }
}

/// Blanket marker for anything that can be sent through the dispatcher.
///
/// There is nothing to implement — any `'static + Send + Sync` type
/// qualifies — this trait exists so call sites read `T: Event` instead of
/// the fully spelled-out bound, matching how the teacher crate names its
/// own component/bundle marker traits.
pub trait Event: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Event for T {}
