//! End-to-end scenarios exercising systems, reactive triggers, the task
//! scheduler and the dispatcher together, the way a consumer of the crate
//! would actually wire them up rather than unit-testing one module at a
//! time.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use weave::events;
use weave::prelude::*;

#[derive(weave::DeriveArchetype)]
struct Creature {
    transform: Transform,
    health: Health,
}

#[derive(Clone, Copy, Debug)]
struct Transform {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Health {
    value: f32,
    debuff: f32,
}

/// Marker component no archetype in this file actually stores; used by the
/// "component missing" scenario below.
struct NotPresent;

/// Carries the tick's `Δ` into systems; `World::tick` itself takes no
/// external parameters, so callers pass time the same way they would any
/// other tick-scoped configuration, through an addon.
struct DeltaTime(f32);

struct HealthUpdate;

impl System for HealthUpdate {
    fn execute(&mut self, world: &mut World, entity: EntityRef) {
        let delta = world.addon::<DeltaTime>().map(|dt| dt.0).unwrap_or(0.0);
        if let Ok(health) = entity.get_mut::<Health>(world) {
            health.value -= health.debuff * delta;
        }
    }
}

struct Death;

impl System for Death {
    fn execute(&mut self, world: &mut World, entity: EntityRef) {
        let dead = entity.get::<Health>(world).map(|h| h.value <= 0.0).unwrap_or(false);
        if dead {
            world.remove(entity).expect("entity is still alive when Death inspects it");
        }
    }
}

#[test]
fn damage_over_time_removes_entity_at_zero_health() {
    let mut world = World::new();
    world.insert_addon(DeltaTime(0.5));

    let health_update = world
        .register_system(SystemSpec::new(HealthUpdate, Has::<(Health,)>::new()))
        .unwrap();
    world
        .register_system(SystemSpec::new(Death, Has::<(Health,)>::new()).after(&health_update))
        .unwrap();

    let entity = world.create(Creature {
        transform: Transform { x: 0.0, y: 0.0 },
        health: Health { value: 200.0, debuff: 100.0 },
    });

    world.tick();
    assert_eq!(entity.get::<Health>(&world).unwrap().value, 150.0);
    assert_eq!(world.count(), 1);

    world.tick();
    world.tick();
    world.tick();
    assert_eq!(world.count(), 0, "Death must remove the entity once health reaches zero");
    assert!(!entity.is_alive(&world));
}

/// A one-time positional hazard: moving away from the spawn point the
/// first time afflicts the creature with a debuff; further moves while
/// already afflicted are ignored.
struct SetPosition {
    x: f32,
    y: f32,
}

impl Command for SetPosition {
    fn execute(&mut self, world: &mut World, entity: EntityRef) {
        if let Ok(transform) = entity.get_mut::<Transform>(world) {
            transform.x = self.x;
            transform.y = self.y;
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LocationReason {
    Spawned,
    FirstMove,
}

/// Reacts to `Added` (a one-off arrival penalty) and to `SetPosition` (a
/// one-off "now exposed" debuff on the first move away from spawn).
/// `on_trigger_event` decides, per entity, which of the two reasons (if
/// either) drove this tick's pending-group membership; `execute` consumes
/// that reason since the pending group itself carries no event payload.
#[derive(Default)]
struct LocationDamage {
    reasons: HashMap<EntityRef, LocationReason>,
    moved_once: HashSet<EntityRef>,
}

impl System for LocationDamage {
    fn execute(&mut self, world: &mut World, entity: EntityRef) {
        let reason = self.reasons.remove(&entity);
        if let Ok(health) = entity.get_mut::<Health>(world) {
            match reason {
                Some(LocationReason::Spawned) => health.value -= 10.0,
                Some(LocationReason::FirstMove) => health.debuff = 100.0,
                None => {}
            }
        }
    }

    fn on_trigger_event(&mut self, _world: &World, entity: EntityRef, event_type: TypeId) -> bool {
        if event_type == TypeId::of::<events::Added>() {
            self.reasons.insert(entity, LocationReason::Spawned);
            return true;
        }
        if event_type == TypeId::of::<SetPosition>() {
            if self.moved_once.contains(&entity) {
                return false;
            }
            self.moved_once.insert(entity);
            self.reasons.insert(entity, LocationReason::FirstMove);
            return true;
        }
        false
    }
}

#[test]
fn reactive_trigger_fires_once_per_distinct_reason() {
    let mut world = World::new();

    world
        .register_system(
            SystemSpec::new(LocationDamage::default(), Has::<(Transform, Health)>::new())
                .trigger::<events::Added>()
                .trigger::<SetPosition>(),
        )
        .unwrap();

    let entity = world.create(Creature {
        transform: Transform { x: 1.0, y: 1.0 },
        health: Health { value: 200.0, debuff: 0.0 },
    });

    world.tick();
    assert_eq!(entity.get::<Health>(&world).unwrap().value, 190.0);

    world.modify(entity, &mut SetPosition { x: 1.0, y: 2.0 });
    world.tick();
    assert_eq!(entity.get::<Health>(&world).unwrap().debuff, 100.0);

    let before = *entity.get::<Health>(&world).unwrap();
    world.modify(entity, &mut SetPosition { x: 1.0, y: 3.0 });
    world.tick();
    assert_eq!(
        *entity.get::<Health>(&world).unwrap(),
        before,
        "a second move while already afflicted must not re-trigger the rule"
    );
}

#[test]
fn task_runs_after_both_parents_then_self_removes() {
    let mut scheduler: Scheduler<Box<dyn FnMut() -> bool>> = Scheduler::new();
    let a = scheduler.create_task(Some(Box::new(|| false)));
    let b = scheduler.create_task(Some(Box::new(|| false)));
    let c = scheduler.create_task(Some(Box::new(|| true)));
    scheduler.add_dependency(c, a).unwrap();
    scheduler.add_dependency(c, b).unwrap();

    let mut ran = Vec::new();
    scheduler.tick(|id, thunk| {
        ran.push(id);
        thunk()
    });
    assert_eq!(ran.len(), 3);
    assert_eq!(ran.last(), Some(&c), "C must run only after both A and B have run");

    let mut ran_again = Vec::new();
    scheduler.tick(|id, thunk| {
        ran_again.push(id);
        thunk()
    });
    assert!(!ran_again.contains(&c), "C self-removed and must be absent from the next tick");
    assert_eq!(ran_again.len(), 2);
}

#[test]
fn adding_an_edge_that_would_close_a_cycle_is_rejected() {
    let mut scheduler: Scheduler<Box<dyn FnMut() -> bool>> = Scheduler::new();
    let a = scheduler.create_task(Some(Box::new(|| false)));
    let b = scheduler.create_task(Some(Box::new(|| false)));
    let c = scheduler.create_task(Some(Box::new(|| false)));
    scheduler.add_dependency(b, a).unwrap();
    scheduler.add_dependency(c, b).unwrap();

    assert_eq!(scheduler.add_dependency(a, c), Err(weave::error::SchedulerError::WouldCycle));

    // the original chain must still be intact and run in order
    let mut ran = Vec::new();
    scheduler.tick(|id, _| {
        ran.push(id);
        false
    });
    assert_eq!(ran, vec![a, b, c]);
}

#[test]
fn getting_an_absent_component_fails_without_mutating_storage() {
    let mut world = World::new();
    let entity = world.create(Creature {
        transform: Transform { x: 0.0, y: 0.0 },
        health: Health { value: 200.0, debuff: 0.0 },
    });

    assert_eq!(entity.get::<NotPresent>(&world).err(), Some(GetError::ComponentNotFound));
    // the read failed without side effects: every existing component is untouched
    assert_eq!(entity.get::<Health>(&world).unwrap().value, 200.0);
    assert_eq!(entity.get::<Transform>(&world).unwrap().x, 0.0);
}

#[test]
fn self_removing_global_listener_stops_receiving_further_sends() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut world = World::new();
    let calls = Rc::new(RefCell::new(0usize));
    let c = calls.clone();
    world.listen_global(move |_, _, _, _| {
        *c.borrow_mut() += 1;
        true
    });

    world.send(None::<EntityRef>, &events::Disposed);
    assert_eq!(*calls.borrow(), 1, "a self-removing listener still receives the send that removes it");

    world.send(None::<EntityRef>, &events::Disposed);
    assert_eq!(*calls.borrow(), 1, "subsequent sends must not deliver to the removed listener");
}

#[derive(weave::DeriveArchetype)]
struct Marker {
    transform: Transform,
}

#[test]
fn reactive_query_tracks_matching_entities_across_creation_and_removal() {
    let mut world = World::new();

    let before = world.create(Creature {
        transform: Transform { x: 0.0, y: 0.0 },
        health: Health { value: 100.0, debuff: 0.0 },
    });

    let query = world.create_query(Has::<(Health,)>::new());
    assert_eq!(query.entities(), vec![before], "entities alive before create_query must be in the initial scan");

    let after = world.create(Creature {
        transform: Transform { x: 1.0, y: 1.0 },
        health: Health { value: 50.0, debuff: 0.0 },
    });
    assert_eq!(query.len(), 2, "an entity created after create_query must be picked up via Added");
    assert!(query.entities().contains(&after));

    // archetypes that don't match the query must not contribute, including
    // an archetype never seen before create_query was opened.
    let unmatched = world.create(Marker {
        transform: Transform { x: 2.0, y: 2.0 },
    });
    assert_eq!(query.len(), 2, "a new archetype without Health must not join the query");
    assert!(!query.entities().contains(&unmatched));

    world.remove(before).unwrap();
    assert_eq!(query.entities(), vec![after], "removed entities must drop out of the query");
    assert!(!query.is_empty());

    query.dispose(&mut world);
}

#[test]
fn disposed_reactive_query_stops_tracking_new_arrivals() {
    let mut world = World::new();
    let query = world.create_query(Has::<(Health,)>::new());
    assert!(query.is_empty());
    query.dispose(&mut world);

    world.create(Creature {
        transform: Transform { x: 0.0, y: 0.0 },
        health: Health { value: 10.0, debuff: 0.0 },
    });
    // no observable handle survives dispose; this only asserts that creating
    // an entity after disposal doesn't panic against a torn-down query.
    world.tick();
}
