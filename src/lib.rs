//! A data-oriented entity-component-system runtime.
//!
//! Components are grouped into fixed archetype structs (`#[derive(Archetype)]`)
//! rather than assembled per-entity; an [`EntityDescriptor`] built once per
//! archetype type maps each field to its byte offset, so the rest of the
//! crate — hosts, queries, systems — can address components without ever
//! knowing the concrete archetype type at the call site. See [`world::World`]
//! for the entry point.

pub mod addon;
pub mod command;
pub mod descriptor;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod events;
pub mod host;
pub mod prelude;
pub mod scheduler;
pub mod storage;
pub mod system;
pub mod world;

pub use descriptor::{Archetype, ComponentKey, ComponentSlot, EntityDescriptor};
pub use entity::EntityRef;
pub use weave_derive::Archetype as DeriveArchetype;
pub use world::{World, WorldBuilder};
