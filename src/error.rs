//! Error types for every fallible operation the crate exposes.
//!
//! Each error is a small, `Copy`-able enum or unit struct implementing
//! [`core::fmt::Display`] and `std::error::Error`, following the same
//! hand-rolled pattern the teacher crate uses for `NoSuchEntity` /
//! `MissingComponents` rather than pulling in `thiserror`.

use core::fmt;

/// A [`crate::storage::Slot`] was used after its generation no longer
/// matches the storage's record for that index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidSlot;

impl fmt::Display for InvalidSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("slot does not reference a currently allocated entry")
    }
}

impl std::error::Error for InvalidSlot {}

/// `EntityRef::get` was called for a component type absent from the
/// entity's archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentNotFound;

impl fmt::Display for ComponentNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("component type is not present in this entity's archetype")
    }
}

impl std::error::Error for ComponentNotFound {}

/// An [`crate::entity::EntityRef`] no longer refers to a live entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoSuchEntity;

impl fmt::Display for NoSuchEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("entity reference does not name a live entity")
    }
}

impl std::error::Error for NoSuchEntity {}

/// Errors returned by [`crate::world::World`] operations that touch a host
/// and may fail either because the entity is gone or because of a storage
/// slot mismatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorldError {
    /// See [`NoSuchEntity`].
    NoSuchEntity,
    /// See [`InvalidSlot`].
    InvalidSlot,
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchEntity => fmt::Display::fmt(&NoSuchEntity, f),
            Self::InvalidSlot => fmt::Display::fmt(&InvalidSlot, f),
        }
    }
}

impl std::error::Error for WorldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoSuchEntity => Some(&NoSuchEntity),
            Self::InvalidSlot => Some(&InvalidSlot),
        }
    }
}

impl From<NoSuchEntity> for WorldError {
    fn from(_: NoSuchEntity) -> Self {
        WorldError::NoSuchEntity
    }
}

impl From<InvalidSlot> for WorldError {
    fn from(_: InvalidSlot) -> Self {
        WorldError::InvalidSlot
    }
}

/// Errors from [`crate::scheduler::Scheduler`] graph mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// `create_task` named a predecessor that is not (or no longer) in the
    /// graph.
    UnknownPredecessor,
    /// Adding the requested edge would close a cycle; the graph was left
    /// unchanged.
    WouldCycle,
    /// `remove_task` was called on a node that still has live successors.
    TaskDepended,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPredecessor => f.write_str("predecessor task is not present in the graph"),
            Self::WouldCycle => f.write_str("requested edge would close a cycle in the task graph"),
            Self::TaskDepended => f.write_str("task cannot be removed while it still has successors"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// Errors from system registration (§4.7 of the spec this crate implements).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemError {
    /// The system (identified by `TypeId`) already has a live handle in
    /// this world.
    AlreadyRegistered,
    /// A declared dependency's task node could not be found.
    InvalidDependency,
    /// `Filter` was set without a corresponding `Trigger`.
    InvalidAttribute,
    /// A child system failed to register; already-registered children were
    /// disposed in reverse order before this error was returned.
    InvalidChild,
}

impl fmt::Display for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered => f.write_str("system is already registered on this world/scheduler pair"),
            Self::InvalidDependency => f.write_str("declared dependency has no task node in this world/scheduler pair"),
            Self::InvalidAttribute => f.write_str("filter was declared without a trigger"),
            Self::InvalidChild => f.write_str("a child system failed to register"),
        }
    }
}

impl std::error::Error for SystemError {}

/// A handle (`SystemHandle`, `QueryHandle`, ...) was used after disposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectDisposed;

impl fmt::Display for ObjectDisposed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("handle was already disposed")
    }
}

impl std::error::Error for ObjectDisposed {}
