//! A prelude module. Re-exports the types most call sites need to build and
//! drive a [`World`].

pub use crate::{
    addon::Addon,
    command::{Command, CommandBuffer, PooledCommand},
    descriptor::{Archetype, ComponentKey, EntityDescriptor},
    dispatcher::{Dispatcher, ListenerId},
    entity::{EntityRef, GetError},
    events::{Added, Disposed, HostRemoved, Removed},
    host::{HostConfig, StorageShape},
    scheduler::{Scheduler, TaskId},
    storage::CreateSiblingStorage,
    system::{And, Any_, Has, Matcher, None_, Not, Or, System, SystemHandle, SystemSpec},
    world::{QueryHandle, World, WorldBuilder},
    DeriveArchetype,
};
