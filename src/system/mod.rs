//! Systems: user logic run by a [`crate::world::World`] against matching
//! entities, either every tick or reactively (§4.7).

pub mod matcher;

use std::any::TypeId;

use crate::entity::EntityRef;
use crate::scheduler::TaskId;
use crate::world::World;

pub use matcher::{And, Any_, ComponentSet, Has, Matcher, None_, Not, Or};

/// User logic invoked once per matching entity.
///
/// Any type implementing `System` can be registered via
/// [`World::register_system`]; a bare closure of the same shape works too
/// through the blanket impl below, mirroring how the teacher crate accepts
/// both named systems and function systems through `IntoSystem`.
///
/// The lifecycle hooks and reactive callbacks below all have default,
/// no-op/accepting implementations, so a plain query-driven system only
/// ever needs to implement [`System::execute`].
pub trait System: 'static {
    /// Runs once per [`crate::world::World::tick`], before any entity in
    /// this system's query or pending group is visited.
    fn before_execute(&mut self, _world: &mut World) {}

    /// Runs once per matching (or, for reactive systems, pending) entity.
    fn execute(&mut self, world: &mut World, entity: EntityRef);

    /// Runs once per tick, after every entity this tick has been visited.
    fn after_execute(&mut self, _world: &mut World) {}

    /// Called when a `Trigger` event type (other than `Filter`) fires for
    /// an entity this system's `Matcher` accepts. Returning `true` adds the
    /// entity to the pending group (§4.7). The default accepts every
    /// trigger event.
    fn on_trigger_event(&mut self, _world: &World, _entity: EntityRef, _event_type: TypeId) -> bool {
        true
    }

    /// Called when a `Filter` event type fires for an entity currently in
    /// the pending group. Returning `true` removes it. The default accepts
    /// every filter event.
    fn on_filter_event(&mut self, _world: &World, _entity: EntityRef, _event_type: TypeId) -> bool {
        true
    }
}

impl<F> System for F
where
    F: FnMut(&mut World, EntityRef) + 'static,
{
    fn execute(&mut self, world: &mut World, entity: EntityRef) {
        self(world, entity)
    }
}

/// Which execution mode a registered system ended up in, decided from its
/// [`SystemSpec`] at registration time (§4.7, step 3).
pub(crate) enum Mode {
    /// `Matcher` empty/`None`: no per-tick work, task has no thunk. Exists
    /// purely so children can depend on this task as a synchronisation
    /// point.
    Passive,
    /// `Matcher` set, no `Trigger`/`Filter`: runs `before_execute`, every
    /// matching entity's `execute`, then `after_execute`, every tick.
    QueryDriven,
    /// `Matcher` set, `Trigger` (and optionally `Filter`) set: maintains a
    /// pending group via reactive listeners and drains it once per tick.
    Reactive,
}

/// Declarative request to register a system, built up before handing it to
/// [`World::register_system`].
///
/// Mirrors §4.7's description of a system as "an object with read-only
/// configuration": the configuration (`Matcher`, `Trigger`, `Filter`,
/// `Dependencies`, `Children`) lives here rather than on `System` itself, so
/// `System` stays a plain, object-safe execution trait and every piece of
/// wiring stays visible at the registration call site.
pub struct SystemSpec<S> {
    pub(crate) system: S,
    pub(crate) matcher: Option<Box<dyn Matcher>>,
    pub(crate) triggers: Vec<TypeId>,
    pub(crate) filters: Vec<TypeId>,
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) children: Vec<ChildRegistration>,
    pub(crate) parent_task: Option<TaskId>,
}

/// A child system's registration, deferred until its parent's task exists
/// so the parent task can be injected as an extra dependency (§4.7, step 5).
pub(crate) type ChildRegistration = Box<dyn FnOnce(&mut World, TaskId) -> Result<SystemHandle, crate::error::SystemError>>;

impl<S: System> SystemSpec<S> {
    /// A passive system: no `Matcher`, no per-tick work of its own. Useful
    /// as a grouping node for [`SystemSpec::child`] systems that should all
    /// run after some shared predecessor.
    pub fn passive(system: S) -> Self {
        SystemSpec {
            system,
            matcher: None,
            triggers: Vec::new(),
            filters: Vec::new(),
            dependencies: Vec::new(),
            children: Vec::new(),
            parent_task: None,
        }
    }

    /// A query-driven system: runs `execute` once per tick for every entity
    /// whose archetype satisfies `matcher`.
    pub fn new<M: Matcher>(system: S, matcher: M) -> Self {
        SystemSpec {
            system,
            matcher: Some(Box::new(matcher)),
            triggers: Vec::new(),
            filters: Vec::new(),
            dependencies: Vec::new(),
            children: Vec::new(),
            parent_task: None,
        }
    }

    /// Adds `T` to this system's `Trigger` set: entities newly matching
    /// `matcher` when a `T` event fires are added to the pending group (see
    /// [`System::on_trigger_event`]). Declaring any trigger switches this
    /// system to reactive mode.
    pub fn trigger<T: 'static>(mut self) -> Self {
        self.triggers.push(TypeId::of::<T>());
        self
    }

    /// Adds `T` to this system's `Filter` set: a `T` event removes the
    /// target from the pending group (see [`System::on_filter_event`]).
    /// Invalid without at least one `trigger` (§4.7, step 4).
    pub fn filter<T: 'static>(mut self) -> Self {
        self.filters.push(TypeId::of::<T>());
        self
    }

    /// Declares that this system must run strictly after `dependency`'s
    /// task.
    pub fn after(mut self, dependency: &SystemHandle) -> Self {
        self.dependencies.push(dependency.task_id);
        self
    }

    /// Registers `child` as a nested system: it runs with this system's
    /// task as an additional predecessor, and is disposed (in reverse
    /// registration order, alongside any siblings) whenever this system's
    /// handle is disposed (§4.7, steps 5-6).
    pub fn child<C: System>(mut self, child: SystemSpec<C>) -> Self {
        self.children.push(Box::new(move |world, parent_task| {
            let mut child = child;
            child.parent_task = Some(parent_task);
            world.register_system(child)
        }));
        self
    }

    pub(crate) fn mode(&self) -> Mode {
        match &self.matcher {
            None => Mode::Passive,
            Some(_) if self.triggers.is_empty() => Mode::QueryDriven,
            Some(_) => Mode::Reactive,
        }
    }
}

/// Returned from [`World::register_system`]; disposing it (via
/// [`SystemHandle::dispose`] or [`World::unregister_system`]) unregisters
/// the system entry, tears down its reactive listeners, disposes its
/// children in reverse order, and removes its task (§3, §4.7 step 6).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SystemHandle {
    pub(crate) type_id: TypeId,
    pub(crate) task_id: TaskId,
}

impl SystemHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Unregisters this system from `world`. Equivalent to
    /// [`World::unregister_system`]; provided so callers holding just the
    /// handle don't need to re-spell the system's concrete type.
    pub fn dispose(self, world: &mut World) -> Result<(), crate::error::SystemError> {
        world.unregister_system(self)
    }
}
