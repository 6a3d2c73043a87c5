//! Event dispatch: global, per-type and per-entity listeners (§5, §6).
//!
//! Listener closures are handed both `&mut World` and `&mut Dispatcher`
//! explicitly, rather than reaching back into `world.dispatcher()`, because
//! [`World::send`] temporarily takes the dispatcher out of the world for
//! the duration of dispatch — the same "take it out, pass the empty
//! container plus the real value separately, put it back" move the teacher
//! crate comments out in `src/action/buffer.rs` to sidestep the
//! self-referential borrow a `&mut Dispatcher` living inside `&mut World`
//! would otherwise require.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use slab::Slab;

use crate::entity::EntityRef;
use crate::world::World;

/// Identifies a previously registered listener for later removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerId {
    Global(usize),
    Type(TypeId, usize),
    Entity(EntityRef, TypeId, usize),
}

/// Returns `true` to request self-removal at the end of the current
/// fan-out (§4.5: "a listener returns a boolean signalling self-removal").
type Listener = Box<dyn FnMut(&mut World, &mut Dispatcher, Option<EntityRef>, &dyn Any) -> bool>;

/// Routes events sent through [`World::send`] to whoever is listening.
#[derive(Default)]
pub struct Dispatcher {
    global: Slab<Listener>,
    by_type: HashMap<TypeId, Slab<Listener>>,
    by_entity: HashMap<(EntityRef, TypeId), Slab<Listener>>,
    /// Keys `unlisten` couldn't reach directly because the channel they
    /// belong to is mid-dispatch (its slab is sitting in a local `taken`
    /// inside `send`, not in the fields above) — applied once that channel's
    /// `send` call folds its snapshot back in. See `send`'s doc comment.
    pending_unlisten_global: Vec<usize>,
    pending_unlisten_type: Vec<(TypeId, usize)>,
    pending_unlisten_entity: Vec<(EntityRef, TypeId, usize)>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher::default()
    }

    /// Registers a listener invoked for every event, regardless of type or
    /// target. Return `true` from `listener` to remove it once the current
    /// `send` finishes fanning out.
    pub fn listen_global<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&mut World, &mut Dispatcher, Option<EntityRef>, &dyn Any) -> bool + 'static,
    {
        let key = self.global.insert(Box::new(listener));
        ListenerId::Global(key)
    }

    /// Registers a listener invoked only for events of type `T`. Return
    /// `true` to remove it once the current `send` finishes fanning out.
    pub fn listen_type<T, F>(&mut self, mut listener: F) -> ListenerId
    where
        T: 'static,
        F: FnMut(&mut World, &mut Dispatcher, Option<EntityRef>, &T) -> bool + 'static,
    {
        let type_id = TypeId::of::<T>();
        let wrapped: Listener = Box::new(move |world, dispatcher, target, event| {
            event
                .downcast_ref::<T>()
                .is_some_and(|event| listener(world, dispatcher, target, event))
        });
        let key = self.by_type.entry(type_id).or_default().insert(wrapped);
        ListenerId::Type(type_id, key)
    }

    /// Registers a listener invoked only for events of type `T` targeting
    /// `entity` specifically. Return `true` to remove it once the current
    /// `send` finishes fanning out.
    pub fn listen_entity<T, F>(&mut self, entity: EntityRef, mut listener: F) -> ListenerId
    where
        T: 'static,
        F: FnMut(&mut World, &mut Dispatcher, EntityRef, &T) -> bool + 'static,
    {
        self.listen_entity_any(entity, TypeId::of::<T>(), move |world, dispatcher, target, event| {
            event
                .downcast_ref::<T>()
                .is_some_and(|event| listener(world, dispatcher, target, event))
        })
    }

    /// Type-erased counterpart to [`Dispatcher::listen_entity`], keyed by an
    /// explicit `TypeId` rather than a compile-time type parameter.
    ///
    /// Used by the reactive system engine (`crate::system`), which only
    /// knows a system's `Trigger`/`Filter` event types as runtime `TypeId`s
    /// collected on a [`crate::system::SystemSpec`] — there is no `T` to
    /// name at the call site.
    pub fn listen_entity_any<F>(&mut self, entity: EntityRef, type_id: TypeId, listener: F) -> ListenerId
    where
        F: FnMut(&mut World, &mut Dispatcher, EntityRef, &dyn Any) -> bool + 'static,
    {
        let mut listener = listener;
        let wrapped: Listener = Box::new(move |world, dispatcher, target, event| match target {
            Some(target) => listener(world, dispatcher, target, event),
            None => false,
        });
        let key = self
            .by_entity
            .entry((entity, type_id))
            .or_default()
            .insert(wrapped);
        ListenerId::Entity(entity, type_id, key)
    }

    /// Removes a previously registered listener. Returns `false` if it was
    /// already removed, or if `id` names a channel currently mid-dispatch —
    /// in the latter case the removal is recorded and applied once that
    /// `send` call finishes (matching §6's "unlisten is idempotent"; see
    /// `send`'s doc comment for why the channel can be momentarily absent).
    pub fn unlisten(&mut self, id: ListenerId) -> bool {
        match id {
            ListenerId::Global(key) => {
                let removed = self.global.try_remove(key).is_some();
                if !removed {
                    self.pending_unlisten_global.push(key);
                }
                removed
            }
            ListenerId::Type(type_id, key) => {
                let removed = self
                    .by_type
                    .get_mut(&type_id)
                    .map(|slab| slab.try_remove(key).is_some())
                    .unwrap_or(false);
                if !removed {
                    self.pending_unlisten_type.push((type_id, key));
                }
                removed
            }
            ListenerId::Entity(entity, type_id, key) => {
                let removed = self
                    .by_entity
                    .get_mut(&(entity, type_id))
                    .map(|slab| slab.try_remove(key).is_some())
                    .unwrap_or(false);
                if !removed {
                    self.pending_unlisten_entity.push((entity, type_id, key));
                }
                removed
            }
        }
    }

    /// Removes every listener registered for `entity`, across all event
    /// types. Called by [`crate::host::Host::release`] so a released
    /// entity can never receive a stale event.
    pub fn unlisten_all(&mut self, entity: EntityRef) {
        self.by_entity.retain(|(owner, _), _| *owner != entity);
    }

    /// Total number of live per-entity listener registrations, across every
    /// entity and event type. Test-only introspection for asserting that
    /// disposing a [`crate::system::SystemHandle`] actually tears down every
    /// listener it installed, not just its top-level one.
    #[cfg(test)]
    pub(crate) fn entity_listener_count(&self) -> usize {
        self.by_entity.values().map(Slab::len).sum()
    }

    /// Total number of live per-type listener registrations, across every
    /// event type. Test-only introspection for asserting
    /// [`crate::world::QueryHandle::dispose`] tears down both of its
    /// listeners.
    #[cfg(test)]
    pub(crate) fn type_listener_count(&self) -> usize {
        self.by_type.values().map(Slab::len).sum()
    }

    /// Dispatches one event to per-entity, per-type and global listeners, in
    /// that order (§4.5: "per-entity first, then per-type, then global").
    ///
    /// `self` is the real dispatcher, taken out of `world` by the caller;
    /// `world` is the placeholder left behind. Listeners reach the live
    /// dispatcher only through the `&mut Dispatcher` parameter passed to
    /// them here, never through `world`.
    ///
    /// Listeners registered reentrantly while a slab is mid-dispatch are
    /// folded back in afterwards rather than lost, but do not themselves
    /// run until the *next* `send` — the in-flight iteration has already
    /// taken its snapshot. `unlisten` of an already-iterating listener
    /// during dispatch is similarly deferred: it is recorded in a pending
    /// list (since the slab it would remove from has been moved into this
    /// function's local `taken`, not reachable from `self`) and applied
    /// right before that channel's snapshot is folded back in, so it takes
    /// effect starting the *next* `send` rather than this one.
    ///
    /// A listener that returns `true` (self-removal) still receives this
    /// call — it is removed only once the loop over `taken` finishes,
    /// matching `unlisten`'s "removed-during-dispatch listeners still
    /// receive the in-flight event" guarantee.
    pub fn send(&mut self, world: &mut World, target: Option<EntityRef>, event: &dyn Any) {
        let type_id = (*event).type_id();

        if let Some(target) = target {
            let key = (target, type_id);
            if let Some(mut taken) = self.by_entity.remove(&key) {
                let mut self_removed = Vec::new();
                for (key, listener) in taken.iter_mut() {
                    if listener(world, self, Some(target), event) {
                        self_removed.push(key);
                    }
                }
                for key in self_removed {
                    taken.try_remove(key);
                }
                if let Some(mut reentrant) = self.by_entity.remove(&key) {
                    for (_, listener) in reentrant.drain() {
                        taken.insert(listener);
                    }
                }
                self.pending_unlisten_entity.retain(|&(e, t, k)| {
                    if e == target && t == type_id {
                        taken.try_remove(k);
                        false
                    } else {
                        true
                    }
                });
                self.by_entity.insert(key, taken);
            }
        }

        if let Some(mut taken) = self.by_type.remove(&type_id) {
            let mut self_removed = Vec::new();
            for (key, listener) in taken.iter_mut() {
                if listener(world, self, target, event) {
                    self_removed.push(key);
                }
            }
            for key in self_removed {
                taken.try_remove(key);
            }
            if let Some(mut reentrant) = self.by_type.remove(&type_id) {
                for (_, listener) in reentrant.drain() {
                    taken.insert(listener);
                }
            }
            self.pending_unlisten_type.retain(|&(t, k)| {
                if t == type_id {
                    taken.try_remove(k);
                    false
                } else {
                    true
                }
            });
            self.by_type.insert(type_id, taken);
        }

        let mut taken = std::mem::take(&mut self.global);
        let mut self_removed = Vec::new();
        for (key, listener) in taken.iter_mut() {
            if listener(world, self, target, event) {
                self_removed.push(key);
            }
        }
        for key in self_removed {
            taken.try_remove(key);
        }
        for (_, reentrant) in self.global.drain() {
            taken.insert(reentrant);
        }
        for key in self.pending_unlisten_global.drain(..) {
            taken.try_remove(key);
        }
        self.global = taken;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::OnceLock;

    use super::*;
    use crate::descriptor::{Archetype, EntityDescriptor};
    use crate::world::World;

    struct Tick;

    struct Unit;
    impl Archetype for Unit {
        fn descriptor() -> &'static EntityDescriptor {
            static DESCRIPTOR: OnceLock<EntityDescriptor> = OnceLock::new();
            DESCRIPTOR.get_or_init(|| EntityDescriptor::new(0, Vec::new()))
        }
    }

    #[test]
    fn fan_out_runs_entity_then_type_then_global() {
        let mut dispatcher = Dispatcher::new();
        let mut world = World::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let entity = world.create(Unit);

        let o = order.clone();
        dispatcher.listen_entity::<Tick, _>(entity, move |_, _, _, _| {
            o.borrow_mut().push("entity");
            false
        });
        let o = order.clone();
        dispatcher.listen_type::<Tick, _>(move |_, _, _, _| {
            o.borrow_mut().push("type");
            false
        });
        let o = order.clone();
        dispatcher.listen_global(move |_, _, _, _| {
            o.borrow_mut().push("global");
            false
        });

        dispatcher.send(&mut world, Some(entity), &Tick);
        assert_eq!(*order.borrow(), vec!["entity", "type", "global"]);
    }

    #[test]
    fn unlisten_during_dispatch_takes_effect_next_send() {
        let mut dispatcher = Dispatcher::new();
        let mut world = World::new();
        let primary = Rc::new(RefCell::new(0));
        let secondary = Rc::new(RefCell::new(0));
        let removed_id = Rc::new(RefCell::new(None));

        let p = primary.clone();
        let removed_id_inner = removed_id.clone();
        dispatcher.listen_global(move |_, dispatcher, _, _| {
            *p.borrow_mut() += 1;
            if let Some(id) = *removed_id_inner.borrow() {
                dispatcher.unlisten(id);
            }
            false
        });
        let s = secondary.clone();
        let id = dispatcher.listen_global(move |_, _, _, _| {
            *s.borrow_mut() += 1;
            false
        });
        *removed_id.borrow_mut() = Some(id);

        dispatcher.send(&mut world, None, &Tick);
        assert_eq!(*primary.borrow(), 1);
        assert_eq!(*secondary.borrow(), 1, "second listener still fires for the in-flight send");

        dispatcher.send(&mut world, None, &Tick);
        assert_eq!(*primary.borrow(), 2);
        assert_eq!(
            *secondary.borrow(),
            1,
            "second listener was unlistened mid-dispatch and must not fire again"
        );

        dispatcher.send(&mut world, None, &Tick);
        assert_eq!(*primary.borrow(), 3);
        assert_eq!(*secondary.borrow(), 1);
    }

    #[test]
    fn reentrant_listen_during_dispatch_is_folded_back_for_next_send() {
        let mut dispatcher = Dispatcher::new();
        let mut world = World::new();
        let count = Rc::new(RefCell::new(0));

        let c = count.clone();
        dispatcher.listen_global(move |_, dispatcher, _, _| {
            *c.borrow_mut() += 1;
            let c2 = c.clone();
            dispatcher.listen_global(move |_, _, _, _| {
                *c2.borrow_mut() += 1;
                false
            });
            false
        });

        dispatcher.send(&mut world, None, &Tick);
        assert_eq!(*count.borrow(), 1, "the listener added mid-dispatch must not run during this send");

        dispatcher.send(&mut world, None, &Tick);
        assert_eq!(*count.borrow(), 3, "both the original and the newly folded-back listener run now");
    }

    #[test]
    fn self_removing_listener_stops_after_its_first_send() {
        let mut dispatcher = Dispatcher::new();
        let mut world = World::new();
        let calls = Rc::new(RefCell::new(0));

        let c = calls.clone();
        dispatcher.listen_global(move |_, _, _, _| {
            *c.borrow_mut() += 1;
            true
        });
        assert_eq!(dispatcher.global.len(), 1);

        dispatcher.send(&mut world, None, &Tick);
        assert_eq!(*calls.borrow(), 1, "a self-removing listener still receives the send that removes it");
        assert_eq!(dispatcher.global.len(), 0, "listener count decreases by one after self-removal");

        dispatcher.send(&mut world, None, &Tick);
        assert_eq!(*calls.borrow(), 1, "removed listener must not be delivered to again");
    }
}
