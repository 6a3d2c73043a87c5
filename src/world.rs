//! The runtime core: owns every archetype host, the event dispatcher, the
//! addon registry, the command buffer and the system scheduler, and wires
//! them together (§6).

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use tracing::debug;

use crate::addon::{Addon, AddonRegistry};
use crate::command::{Command, CommandBuffer};
use crate::descriptor::Archetype;
use crate::dispatcher::{Dispatcher, ListenerId};
use crate::entity::EntityRef;
use crate::error::{SystemError, WorldError};
use crate::events;
use crate::host::{AnyHost, ArchetypeId, Host, HostConfig};
use crate::scheduler::Scheduler;
use crate::system::{Matcher, Mode, System, SystemHandle, SystemSpec};

/// A scheduler thunk never requests its own removal — unlike the generic
/// one-shot task from §4.6's scenario 3, a system's task lives exactly as
/// long as its `SystemHandle` does.
type SystemTask = Box<dyn FnMut(&mut World) -> bool>;

/// Builds a [`World`] with non-default starting configuration. Currently
/// only the initial host registry capacity is exposed; per-archetype
/// storage shape is chosen per `create_with_config` call instead, since it
/// only makes sense once the archetype type is known.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorldBuilder {
    host_capacity: usize,
}

impl WorldBuilder {
    pub fn new() -> Self {
        WorldBuilder::default()
    }

    pub fn host_capacity(mut self, capacity: usize) -> Self {
        self.host_capacity = capacity;
        self
    }

    pub fn build(self) -> World {
        World {
            hosts: Vec::with_capacity(self.host_capacity),
            archetype_index: HashMap::new(),
            dispatcher: Dispatcher::new(),
            addons: AddonRegistry::new(),
            commands: CommandBuffer::new(),
            scheduler: Scheduler::new(),
            systems: HashMap::new(),
            created: 0,
        }
    }
}

struct SystemEntry {
    handle: SystemHandle,
    /// Global listener installed for reactive systems to watch `Added` and
    /// decide group membership for newly matching entities. `None` for
    /// passive and query-driven systems.
    listener: Option<ListenerId>,
    /// Every per-entity listener dynamically installed by
    /// [`World::install_reactive_listener`] as entities start matching —
    /// one per declared `Trigger`/`Filter` type plus one for `Removed`, per
    /// matched entity. Empty for passive and query-driven systems. Tracked
    /// here (rather than relying on `dispatcher.unlisten_all(entity)`) so
    /// tearing down this system never touches another system's per-entity
    /// listeners on the same entity.
    entity_listeners: Rc<RefCell<Vec<ListenerId>>>,
    /// Children registered under this system, in registration order;
    /// disposed in reverse when this entry is torn down (§4.7, step 6).
    children: Vec<SystemHandle>,
}

/// Unlistens `listener` (if any) and every id in `entity_listeners`,
/// draining it. Shared between [`World::unregister_system`] and the
/// registration rollback path so both tear down a reactive system's
/// listeners identically.
fn teardown_reactive_listeners(
    dispatcher: &mut Dispatcher,
    listener: Option<ListenerId>,
    entity_listeners: &Rc<RefCell<Vec<ListenerId>>>,
) {
    if let Some(listener) = listener {
        dispatcher.unlisten(listener);
    }
    for id in entity_listeners.borrow_mut().drain(..) {
        dispatcher.unlisten(id);
    }
}

struct QueryState {
    /// Per-archetype matcher verdict, cached the first time that archetype
    /// is seen so later `Added`/`Removed` events for it skip re-testing.
    matched_archetypes: HashMap<ArchetypeId, bool>,
    entities: Vec<EntityRef>,
}

/// A live, reactively maintained query opened with [`World::create_query`]
/// (§4.4). Stays in sync with `Added`/`Removed` until [`QueryHandle::dispose`]
/// is called; dropping it without disposing leaks its two listeners (same
/// caveat as any undisposed [`SystemHandle`]).
pub struct QueryHandle {
    state: Rc<RefCell<QueryState>>,
    added: ListenerId,
    removed: ListenerId,
}

impl QueryHandle {
    /// A snapshot of the entities currently matching, in no particular
    /// order.
    pub fn entities(&self) -> Vec<EntityRef> {
        self.state.borrow().entities.clone()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops tracking and unlistens both of this query's listeners.
    pub fn dispose(self, world: &mut World) {
        world.dispatcher.unlisten(self.added);
        world.dispatcher.unlisten(self.removed);
    }
}

/// The ECS runtime core. Owns every archetype host, routes events, and
/// drives registered systems.
pub struct World {
    hosts: Vec<Option<Box<dyn AnyHost>>>,
    archetype_index: HashMap<TypeId, ArchetypeId>,
    dispatcher: Dispatcher,
    addons: AddonRegistry,
    commands: CommandBuffer,
    scheduler: Scheduler<SystemTask>,
    systems: HashMap<TypeId, SystemEntry>,
    /// Monotonic count of entities created over the world's lifetime; used
    /// only for diagnostics (`tracing` spans), never for identity, and
    /// distinct from [`World::count`] (§3: "monotonic `Count` equal to the
    /// sum of host counts"), which falls as entities are released.
    created: u64,
}

impl Default for World {
    fn default() -> Self {
        WorldBuilder::default().build()
    }
}

impl World {
    pub fn new() -> Self {
        World::default()
    }

    pub fn builder() -> WorldBuilder {
        WorldBuilder::new()
    }

    fn ensure_host<T: Archetype>(&mut self, config: HostConfig) -> ArchetypeId {
        if let Some(&id) = self.archetype_index.get(&TypeId::of::<T>()) {
            if self.hosts[id.0].is_none() {
                self.hosts[id.0] = Some(Box::new(Host::<T>::new(config)));
            }
            return id;
        }

        let id = ArchetypeId(self.hosts.len());
        self.hosts.push(Some(Box::new(Host::<T>::new(config))));
        self.archetype_index.insert(TypeId::of::<T>(), id);
        id
    }

    /// The `ArchetypeId` this world has assigned to `T`, if any entity of
    /// that archetype has ever been created here.
    pub fn archetype_of<T: Archetype>(&self) -> Option<ArchetypeId> {
        self.archetype_index.get(&TypeId::of::<T>()).copied()
    }

    pub(crate) fn host(&self, id: ArchetypeId) -> Option<&dyn AnyHost> {
        self.hosts.get(id.0)?.as_deref()
    }

    pub(crate) fn host_mut(&mut self, id: ArchetypeId) -> Option<&mut dyn AnyHost> {
        self.hosts.get_mut(id.0)?.as_deref_mut()
    }

    fn host_downcast_mut<T: Archetype>(&mut self, id: ArchetypeId) -> Option<&mut Host<T>> {
        self.host_mut(id)?.downcast_mut::<Host<T>>()
    }

    /// Creates an entity of archetype `T` with default storage (paged
    /// sparse, §3), dispatching `Added` afterwards.
    pub fn create<T: Archetype>(&mut self, value: T) -> EntityRef {
        self.create_with_config::<T>(value, HostConfig::default())
    }

    /// Like [`World::create`], choosing this archetype's storage shape
    /// explicitly. Only takes effect the first time this archetype type is
    /// used in this world; later calls reuse whatever host already exists.
    pub fn create_with_config<T: Archetype>(&mut self, value: T, config: HostConfig) -> EntityRef {
        let archetype = self.ensure_host::<T>(config);
        let host = self
            .host_downcast_mut::<T>(archetype)
            .expect("host just ensured for this archetype");
        let slot = host.create_with(value);
        self.created += 1;
        debug!(created = self.created, archetype = archetype.0, "entity created");

        let entity = EntityRef::new(archetype, slot);
        self.send(Some(entity), &events::Added);
        entity
    }

    /// Releases an entity's storage, dispatching `Removed` first (handlers
    /// still see valid component access) and clearing its listeners
    /// afterwards.
    pub fn remove(&mut self, entity: EntityRef) -> Result<(), WorldError> {
        if !entity.is_alive(self) {
            return Err(WorldError::NoSuchEntity);
        }
        self.send(Some(entity), &events::Removed);

        let host = self.host_mut(entity.archetype).ok_or(WorldError::NoSuchEntity)?;
        if !host.release_erased(entity.slot) {
            return Err(WorldError::InvalidSlot);
        }
        self.dispatcher.unlisten_all(entity);
        Ok(())
    }

    /// Runs `command` against `entity` and dispatches it (by reference) as
    /// an event, without consuming it — see [`crate::command::PooledCommand`]
    /// for why execution and event dispatch both happen by reference.
    pub fn modify<C: Command>(&mut self, entity: EntityRef, command: &mut C) {
        command.execute(self, entity);
        self.send(Some(entity), &*command);
    }

    /// Dispatches `event` to (if `target` is set) per-entity, then type,
    /// then global listeners. See [`Dispatcher::send`] for the borrow
    /// pattern this relies on.
    pub fn send<E: Any>(&mut self, target: Option<EntityRef>, event: &E) {
        let mut dispatcher = std::mem::take(&mut self.dispatcher);
        dispatcher.send(self, target, event);
        self.dispatcher = dispatcher;
    }

    /// Return `true` from `listener` to remove it once the current `send`
    /// finishes fanning out (§4.5).
    pub fn listen_global<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&mut World, &mut Dispatcher, Option<EntityRef>, &dyn Any) -> bool + 'static,
    {
        self.dispatcher.listen_global(listener)
    }

    /// Return `true` from `listener` to remove it once the current `send`
    /// finishes fanning out (§4.5).
    pub fn listen_type<T, F>(&mut self, listener: F) -> ListenerId
    where
        T: 'static,
        F: FnMut(&mut World, &mut Dispatcher, Option<EntityRef>, &T) -> bool + 'static,
    {
        self.dispatcher.listen_type(listener)
    }

    /// Return `true` from `listener` to remove it once the current `send`
    /// finishes fanning out (§4.5).
    pub fn listen_entity<T, F>(&mut self, entity: EntityRef, listener: F) -> ListenerId
    where
        T: 'static,
        F: FnMut(&mut World, &mut Dispatcher, EntityRef, &T) -> bool + 'static,
    {
        self.dispatcher.listen_entity(entity, listener)
    }

    pub fn unlisten(&mut self, id: ListenerId) -> bool {
        self.dispatcher.unlisten(id)
    }

    /// Dispatches [`events::AddedComponent<T>`] for `entity`.
    ///
    /// Archetypes here are a fixed, compile-time set of fields (§3), so the
    /// core never needs this for its own bookkeeping the way `World::create`
    /// needs `Added` — it exists for commands that give a component's value
    /// its first meaningful write (e.g. attaching an optional resource held
    /// as `Option<T>` inside the archetype) and want reactive systems keyed
    /// on `T` specifically, rather than on the command's own type.
    pub fn notify_component_added<T: 'static>(&mut self, entity: EntityRef) {
        self.send(Some(entity), &events::AddedComponent::<T>::marker());
    }

    /// Dispatches [`events::RemovedComponent<T>`] for `entity`. See
    /// [`World::notify_component_added`].
    pub fn notify_component_removed<T: 'static>(&mut self, entity: EntityRef) {
        self.send(Some(entity), &events::RemovedComponent::<T>::marker());
    }

    /// All currently-live entities whose archetype satisfies `matcher`.
    ///
    /// A one-shot rescan of every host, used internally by query-driven
    /// systems' per-tick thunk (re-scanning once a tick is no less correct
    /// than tracking incrementally, and keeps that thunk simple). Callers
    /// wanting a collection maintained reactively across many ticks without
    /// re-scanning should use [`World::create_query`] instead (§4.4).
    pub fn query(&self, matcher: &dyn Matcher) -> Vec<EntityRef> {
        let mut out = Vec::new();
        for (index, host) in self.hosts.iter().enumerate() {
            let Some(host) = host else { continue };
            if !matcher.matches(host.descriptor()) {
                continue;
            }
            let archetype = ArchetypeId(index);
            out.extend(
                host.allocated_slots()
                    .into_iter()
                    .map(|slot| EntityRef::new(archetype, slot)),
            );
        }
        out
    }

    /// Opens a live query (§4.4): `matcher` is tested against each host's
    /// descriptor once — at creation for every host that already exists,
    /// and again the first time a new host is touched afterwards — and the
    /// resulting archetype verdict is cached, so steady-state upkeep is just
    /// tracking `Added`/`Removed` for entities whose archetype already
    /// matched, not re-testing the matcher per event.
    pub fn create_query(&mut self, matcher: impl Matcher + 'static) -> QueryHandle {
        let matcher: Rc<dyn Matcher> = Rc::new(matcher);
        let state = Rc::new(RefCell::new(QueryState {
            matched_archetypes: HashMap::new(),
            entities: Vec::new(),
        }));

        {
            let mut state = state.borrow_mut();
            for (index, host) in self.hosts.iter().enumerate() {
                let Some(host) = host else { continue };
                let archetype = ArchetypeId(index);
                let matches = matcher.matches(host.descriptor());
                state.matched_archetypes.insert(archetype, matches);
                if matches {
                    state.entities.extend(
                        host.allocated_slots()
                            .into_iter()
                            .map(|slot| EntityRef::new(archetype, slot)),
                    );
                }
            }
        }

        let add_matcher = matcher.clone();
        let add_state = state.clone();
        let added = self.dispatcher.listen_type::<events::Added, _>(move |world, _dispatcher, target, _event| {
            let Some(target) = target else { return false };
            let archetype = target.archetype();
            let mut state = add_state.borrow_mut();
            let matches = match state.matched_archetypes.get(&archetype) {
                Some(&matches) => matches,
                None => {
                    let matches = world
                        .host(archetype)
                        .is_some_and(|host| add_matcher.matches(host.descriptor()));
                    state.matched_archetypes.insert(archetype, matches);
                    matches
                }
            };
            if matches {
                state.entities.push(target);
            }
            false
        });

        let remove_state = state.clone();
        let removed = self.dispatcher.listen_type::<events::Removed, _>(move |_world, _dispatcher, target, _event| {
            let Some(target) = target else { return false };
            remove_state.borrow_mut().entities.retain(|&e| e != target);
            false
        });

        QueryHandle { state, added, removed }
    }

    /// The world's live entity count: the sum of every host's current
    /// length (§3: "monotonic `Count` equal to the sum of host counts;
    /// maintained by host create/release"). Computed on demand rather than
    /// tracked incrementally, since it is already O(host count) and hosts
    /// are never more than a few dozen in practice.
    pub fn count(&self) -> usize {
        self.hosts.iter().filter_map(|host| host.as_ref()).map(|host| host.len()).sum()
    }

    /// Drops the storage for any archetype host with no live entities,
    /// keeping the archetype's `TypeId` mapping (and its `ArchetypeId`)
    /// reserved so a later `create::<T>` recreates it at the same index
    /// rather than shifting every other archetype's id. Emits
    /// [`events::HostRemoved`] for each host dropped (§4.4).
    pub fn clear_empty_hosts(&mut self) {
        let empty: Vec<ArchetypeId> = self
            .hosts
            .iter()
            .enumerate()
            .filter(|(_, host)| host.as_ref().is_some_and(|host| host.len() == 0))
            .map(|(index, _)| ArchetypeId(index))
            .collect();

        for archetype in empty {
            self.hosts[archetype.0] = None;
            debug!(archetype = archetype.0, "host removed");
            self.send(None, &events::HostRemoved { archetype });
        }
    }

    pub fn addon<T: Addon>(&self) -> Option<&T> {
        self.addons.get()
    }

    pub fn addon_mut<T: Addon>(&mut self) -> Option<&mut T> {
        self.addons.get_mut()
    }

    pub fn insert_addon<T: Addon>(&mut self, value: T) -> Option<T> {
        self.addons.insert(value)
    }

    /// Returns the addon, inserting `T::default()` on first access (§6:
    /// "the last inserting `T::default()` if absent").
    pub fn acquire_addon<T: Addon + Default>(&mut self) -> &mut T {
        self.addons.acquire(T::default)
    }

    /// Like [`World::acquire_addon`], but constructs the addon with `init`
    /// instead of requiring `T: Default` — for addons whose useful starting
    /// state isn't their `Default` impl (or that have none).
    pub fn acquire_addon_with<T: Addon, F: FnOnce() -> T>(&mut self, init: F) -> &mut T {
        self.addons.acquire(init)
    }

    /// Registers `spec`, returning a handle to later unregister it.
    ///
    /// Follows §4.7's registration algorithm: refuses to double-register
    /// (`SystemAlreadyRegistered`), resolves declared dependencies against
    /// this world's scheduler (`InvalidSystemDependency`), rejects a
    /// `Filter` declared without a `Trigger` (`InvalidSystemAttribute`),
    /// then wires the task appropriate to the system's [`Mode`], registers
    /// children recursively with this system's task as an extra
    /// predecessor, and rolls back everything already built if a child
    /// fails to register (`InvalidSystemChild`).
    pub fn register_system<S: System>(&mut self, spec: SystemSpec<S>) -> Result<SystemHandle, SystemError> {
        let type_id = TypeId::of::<S>();
        if self.systems.contains_key(&type_id) {
            return Err(SystemError::AlreadyRegistered);
        }
        if !spec.filters.is_empty() && spec.triggers.is_empty() {
            return Err(SystemError::InvalidAttribute);
        }
        for &dependency in &spec.dependencies {
            if !self.scheduler.contains(dependency) {
                return Err(SystemError::InvalidDependency);
            }
        }
        if let Some(parent) = spec.parent_task {
            if !self.scheduler.contains(parent) {
                return Err(SystemError::InvalidDependency);
            }
        }

        let mode = spec.mode();
        let SystemSpec {
            system,
            matcher,
            triggers,
            filters,
            dependencies,
            children,
            parent_task,
        } = spec;

        let system = Rc::new(RefCell::new(system));

        let (task_id, listener, entity_listeners) = match mode {
            Mode::Passive => (
                self.scheduler.create_task(None),
                None,
                Rc::new(RefCell::new(Vec::new())),
            ),
            Mode::QueryDriven => {
                let matcher: Rc<dyn Matcher> = matcher.expect("query-driven implies a matcher").into();
                let system = system.clone();
                let task: SystemTask = Box::new(move |world: &mut World| {
                    system.borrow_mut().before_execute(world);
                    let entities = world.query(&*matcher);
                    for entity in entities {
                        system.borrow_mut().execute(world, entity);
                    }
                    system.borrow_mut().after_execute(world);
                    false
                });
                (
                    self.scheduler.create_task(Some(task)),
                    None,
                    Rc::new(RefCell::new(Vec::new())),
                )
            }
            Mode::Reactive => {
                let matcher: Rc<dyn Matcher> = matcher.expect("reactive implies a matcher").into();
                let pending: Rc<RefCell<Vec<EntityRef>>> = Rc::new(RefCell::new(Vec::new()));
                let entity_listeners: Rc<RefCell<Vec<ListenerId>>> = Rc::new(RefCell::new(Vec::new()));
                let listener = Self::install_reactive_listener(
                    &mut self.dispatcher,
                    system.clone(),
                    matcher,
                    triggers,
                    filters,
                    pending.clone(),
                    entity_listeners.clone(),
                );

                let task_system = system.clone();
                let task: SystemTask = Box::new(move |world: &mut World| {
                    task_system.borrow_mut().before_execute(world);
                    // Re-read the group's length every iteration so entities
                    // added reentrantly (from within `execute` itself) are
                    // still visited this tick (§4.7, step 3).
                    let mut index = 0;
                    loop {
                        let entity = {
                            let group = pending.borrow();
                            if index >= group.len() {
                                break;
                            }
                            group[index]
                        };
                        index += 1;
                        if entity.is_alive(world) {
                            task_system.borrow_mut().execute(world, entity);
                        }
                    }
                    pending.borrow_mut().clear();
                    task_system.borrow_mut().after_execute(world);
                    false
                });
                (self.scheduler.create_task(Some(task)), Some(listener), entity_listeners)
            }
        };

        for dependency in dependencies.into_iter().chain(parent_task) {
            self.scheduler
                .add_dependency(task_id, dependency)
                .map_err(|_| SystemError::InvalidDependency)?;
        }

        let mut child_handles = Vec::with_capacity(children.len());
        for register_child in children {
            match register_child(self, task_id) {
                Ok(handle) => child_handles.push(handle),
                Err(_) => {
                    for child in child_handles.into_iter().rev() {
                        let _ = self.unregister_system(child);
                    }
                    teardown_reactive_listeners(&mut self.dispatcher, listener, &entity_listeners);
                    let _ = self.scheduler.remove_task(task_id);
                    return Err(SystemError::InvalidChild);
                }
            }
        }

        let handle = SystemHandle { type_id, task_id };
        self.systems.insert(
            type_id,
            SystemEntry {
                handle,
                listener,
                entity_listeners,
                children: child_handles,
            },
        );
        Ok(handle)
    }

    /// Calls `sys.borrow_mut().on_trigger_event(..)`, except when `sys` is
    /// already borrowed — which only happens when this fires reentrantly
    /// from within that same system's own `execute` (the reactive task
    /// holds the borrow for the duration of each `execute` call). In that
    /// case we cannot re-enter the system's own logic without panicking, so
    /// we fall back to [`System::on_trigger_event`]'s own default: accept
    /// the entity. This only changes behaviour for a system that both
    /// overrides `on_trigger_event` *and* emits one of its own trigger
    /// types from inside `execute`.
    fn trigger_event_reentrant_safe<S: System>(
        sys: &Rc<RefCell<S>>,
        world: &World,
        entity: EntityRef,
        event_type: TypeId,
    ) -> bool {
        match sys.try_borrow_mut() {
            Ok(mut sys) => sys.on_trigger_event(world, entity, event_type),
            Err(_) => true,
        }
    }

    /// Filter counterpart to [`World::trigger_event_reentrant_safe`]; the
    /// default [`System::on_filter_event`] also accepts (removes), so the
    /// same fallback applies.
    fn filter_event_reentrant_safe<S: System>(
        sys: &Rc<RefCell<S>>,
        world: &World,
        entity: EntityRef,
        event_type: TypeId,
    ) -> bool {
        match sys.try_borrow_mut() {
            Ok(mut sys) => sys.on_filter_event(world, entity, event_type),
            Err(_) => true,
        }
    }

    /// Wires the per-entity reactive listeners for one system's pending
    /// group (§4.7, step 3, reactive branch): a global listener watches
    /// `Added` for entities newly matching `matcher`, then attaches
    /// per-entity listeners for every other declared `Trigger`/`Filter`
    /// type plus `Removed` (which always drops the entity from the group,
    /// unless `Removed` is itself a trigger). Every per-entity `ListenerId`
    /// installed this way is pushed onto `installed` so
    /// [`World::unregister_system`] can cancel exactly this system's
    /// listeners without touching any other system's per-entity listeners
    /// on the same entity.
    fn install_reactive_listener<S: System>(
        dispatcher: &mut Dispatcher,
        system: Rc<RefCell<S>>,
        matcher: Rc<dyn Matcher>,
        triggers: Vec<TypeId>,
        filters: Vec<TypeId>,
        pending: Rc<RefCell<Vec<EntityRef>>>,
        installed: Rc<RefCell<Vec<ListenerId>>>,
    ) -> ListenerId {
        let added_type = TypeId::of::<events::Added>();
        let removed_type = TypeId::of::<events::Removed>();

        let triggers = Rc::new(triggers);
        let filters = Rc::new(filters);

        let listen_system = system.clone();
        let listen_pending = pending.clone();
        let listen_triggers = triggers.clone();
        let listen_filters = filters.clone();
        let listen_installed = installed.clone();

        dispatcher.listen_type::<events::Added, _>(move |world, dispatcher, target, _event| {
            let Some(target) = target else { return false };
            let Some(host) = world.host(target.archetype()) else {
                return false;
            };
            if !matcher.matches(host.descriptor()) {
                return false;
            }

            if listen_triggers.contains(&added_type) && !listen_filters.contains(&added_type) {
                let add = World::trigger_event_reentrant_safe(&listen_system, world, target, added_type);
                if add {
                    listen_pending.borrow_mut().push(target);
                }
            }

            for &event_type in listen_triggers.iter() {
                if event_type == added_type || event_type == removed_type || listen_filters.contains(&event_type) {
                    continue;
                }
                let sys = listen_system.clone();
                let pend = listen_pending.clone();
                let id = dispatcher.listen_entity_any(target, event_type, move |world, _dispatcher, entity, _event| {
                    if World::trigger_event_reentrant_safe(&sys, world, entity, event_type) {
                        pend.borrow_mut().push(entity);
                    }
                    false
                });
                listen_installed.borrow_mut().push(id);
            }

            for &event_type in listen_filters.iter() {
                if event_type == removed_type {
                    continue;
                }
                let sys = listen_system.clone();
                let pend = listen_pending.clone();
                let id = dispatcher.listen_entity_any(target, event_type, move |world, _dispatcher, entity, _event| {
                    if World::filter_event_reentrant_safe(&sys, world, entity, event_type) {
                        pend.borrow_mut().retain(|&e| e != entity);
                    }
                    false
                });
                listen_installed.borrow_mut().push(id);
            }

            let removed_sys = listen_system.clone();
            let removed_pend = listen_pending.clone();
            let removed_triggers = listen_triggers.clone();
            let id = dispatcher.listen_entity_any(target, removed_type, move |world, _dispatcher, entity, _event| {
                if removed_triggers.contains(&removed_type) {
                    if World::trigger_event_reentrant_safe(&removed_sys, world, entity, removed_type) {
                        removed_pend.borrow_mut().push(entity);
                        return false;
                    }
                }
                removed_pend.borrow_mut().retain(|&e| e != entity);
                false
            });
            listen_installed.borrow_mut().push(id);

            false
        })
    }

    /// Removes a system's scheduler task, its top-level reactive listener
    /// and every per-entity listener it dynamically installed, and disposes
    /// its children in reverse registration order (§4.7, step 6; §8:
    /// disposing a handle "cancels all listener subscriptions it installed,
    /// observable via dispatcher listener counts").
    pub fn unregister_system(&mut self, handle: SystemHandle) -> Result<(), SystemError> {
        let entry = self
            .systems
            .remove(&handle.type_id)
            .ok_or(SystemError::InvalidDependency)?;
        for child in entry.children.into_iter().rev() {
            let _ = self.unregister_system(child);
        }
        teardown_reactive_listeners(&mut self.dispatcher, entry.listener, &entry.entity_listeners);
        self.scheduler
            .remove_task(entry.handle.task_id)
            .map_err(|_| SystemError::InvalidDependency)?;
        Ok(())
    }

    /// Runs every registered system once, in scheduler order, then drains
    /// any commands queued during the tick.
    pub fn tick(&mut self) {
        let mut scheduler = std::mem::take(&mut self.scheduler);
        scheduler.tick(|_task_id, callback| callback(self));
        self.scheduler = scheduler;
        self.drain_commands();
    }

    pub fn queue_command<C: Command>(&mut self, entity: EntityRef, command: C) {
        self.commands.push(entity, command);
    }

    pub fn commands_pending(&self) -> usize {
        self.commands.pending_len()
    }

    pub fn drain_commands(&mut self) {
        let mut commands = std::mem::take(&mut self.commands);
        commands.drain(self);
        self.commands = commands;
    }

    /// Tears the world down: dispatches a global [`events::Disposed`] so
    /// addons/systems sharing ownership through a cycle get one last
    /// chance to react, then clears every host (firing [`events::Removed`]
    /// for each entity still live in it, per §3's "clears hosts, each
    /// firing `OnEntityReleased`"), then drops registered systems and the
    /// scheduler.
    pub fn dispose(&mut self) {
        self.send::<events::Disposed>(None, &events::Disposed);

        for index in 0..self.hosts.len() {
            let archetype = ArchetypeId(index);
            let Some(host) = self.host(archetype) else { continue };
            let entities: Vec<EntityRef> = host
                .allocated_slots()
                .into_iter()
                .map(|slot| EntityRef::new(archetype, slot))
                .collect();
            for entity in entities {
                self.send(Some(entity), &events::Removed);
                self.dispatcher.unlisten_all(entity);
            }
        }

        self.hosts.clear();
        self.archetype_index.clear();
        self.systems.clear();
        self.scheduler = Scheduler::new();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::OnceLock;

    use super::*;
    use crate::descriptor::{ComponentKey, ComponentSlot, EntityDescriptor};

    #[derive(Clone, Copy)]
    struct Marker(u32);

    struct Widget {
        marker: Marker,
    }

    impl Archetype for Widget {
        fn descriptor() -> &'static EntityDescriptor {
            static DESCRIPTOR: OnceLock<EntityDescriptor> = OnceLock::new();
            DESCRIPTOR.get_or_init(|| {
                EntityDescriptor::new(
                    std::mem::size_of::<Widget>(),
                    vec![ComponentSlot {
                        key: ComponentKey::of::<Marker>(),
                        offset: 0,
                        size: std::mem::size_of::<Marker>(),
                    }],
                )
            })
        }
    }

    #[test]
    fn clear_empty_hosts_fires_host_removed_for_emptied_archetypes_only() {
        let mut world = World::new();
        let entity = world.create(Widget { marker: Marker(1) });

        let removed = Rc::new(RefCell::new(Vec::new()));
        let r = removed.clone();
        world.listen_type::<events::HostRemoved, _>(move |_, _, _, event| {
            r.borrow_mut().push(event.archetype);
            false
        });

        world.clear_empty_hosts();
        assert!(removed.borrow().is_empty(), "host is still occupied, must not fire yet");

        world.remove(entity).unwrap();
        world.clear_empty_hosts();
        assert_eq!(removed.borrow().len(), 1, "emptied host must fire exactly once");
    }

    struct Bump;

    /// Reacts to `Added` and `Bump`; from inside `execute`, optionally fires
    /// another `Bump` for a different entity so that entity's per-entity
    /// listener re-enters this system's `on_trigger_event` while `execute`
    /// still holds the system's `RefCell` borrowed.
    struct Reentrant {
        relay_to: Rc<RefCell<Option<EntityRef>>>,
        seen: Rc<RefCell<Vec<EntityRef>>>,
    }

    impl System for Reentrant {
        fn execute(&mut self, world: &mut World, entity: EntityRef) {
            self.seen.borrow_mut().push(entity);
            if let Some(other) = self.relay_to.borrow_mut().take() {
                world.send(Some(other), &Bump);
            }
        }
    }

    #[test]
    fn unregistering_a_reactive_system_removes_every_per_entity_listener() {
        let mut world = World::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let relay_to = Rc::new(RefCell::new(None));

        let handle = world
            .register_system(
                SystemSpec::new(
                    Reentrant {
                        relay_to: relay_to.clone(),
                        seen: seen.clone(),
                    },
                    crate::system::Has::<(Marker,)>::new(),
                )
                .trigger::<events::Added>()
                .trigger::<Bump>(),
            )
            .unwrap();

        let a = world.create(Widget { marker: Marker(1) });
        world.create(Widget { marker: Marker(2) });
        world.tick();
        assert_eq!(seen.borrow().len(), 2);

        assert!(
            world.dispatcher.entity_listener_count() > 0,
            "matched entities must have installed per-entity listeners"
        );

        world.unregister_system(handle).unwrap();
        assert_eq!(
            world.dispatcher.entity_listener_count(),
            0,
            "disposing the handle must cancel every per-entity listener it installed"
        );

        // Sending the trigger type again must not resurrect the system.
        world.send(Some(a), &Bump);
        world.tick();
        assert_eq!(seen.borrow().len(), 2, "unregistered system must not execute again");
    }

    #[test]
    fn reactive_system_tolerates_triggering_its_own_event_type_from_execute() {
        let mut world = World::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let relay_to = Rc::new(RefCell::new(None));

        world
            .register_system(
                SystemSpec::new(
                    Reentrant {
                        relay_to: relay_to.clone(),
                        seen: seen.clone(),
                    },
                    crate::system::Has::<(Marker,)>::new(),
                )
                .trigger::<events::Added>()
                .trigger::<Bump>(),
            )
            .unwrap();

        // Both entities match via `Added` after the system is already
        // registered, so both land in the pending group with per-entity
        // `Bump` listeners installed. `a`'s `execute` then sends `Bump` for
        // `b` while the system's `RefCell` is still borrowed for `a` —
        // this must not panic.
        let a = world.create(Widget { marker: Marker(1) });
        let b = world.create(Widget { marker: Marker(2) });
        *relay_to.borrow_mut() = Some(b);

        world.tick();

        assert!(seen.borrow().contains(&a));
        assert!(seen.borrow().contains(&b));
    }

    #[test]
    fn disposing_a_query_handle_unlistens_both_of_its_listeners() {
        let mut world = World::new();
        let query = world.create_query(crate::system::Has::<(Marker,)>::new());

        assert_eq!(
            world.dispatcher.type_listener_count(),
            2,
            "create_query installs one Added and one Removed listener"
        );

        query.dispose(&mut world);
        assert_eq!(
            world.dispatcher.type_listener_count(),
            0,
            "dispose must unlisten both listeners it installed"
        );
    }

    #[test]
    fn dispose_fires_removed_for_every_live_entity_before_clearing_hosts() {
        let mut world = World::new();
        let a = world.create(Widget { marker: Marker(1) });
        let b = world.create(Widget { marker: Marker(2) });

        let removed = Rc::new(RefCell::new(Vec::new()));
        let r = removed.clone();
        world.listen_type::<events::Removed, _>(move |_, _, target, _event| {
            if let Some(target) = target {
                r.borrow_mut().push(target);
            }
            false
        });

        world.dispose();
        let seen = removed.borrow();
        assert_eq!(seen.len(), 2, "both live entities must see Removed before hosts are cleared");
        assert!(seen.contains(&a) && seen.contains(&b));
        assert_eq!(world.count(), 0);
    }
}
