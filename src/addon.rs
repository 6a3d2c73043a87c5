//! World-scoped singleton registry ("addons").
//!
//! One instance per type, keyed by `TypeId`, alongside the world rather
//! than attached to any entity — grounded in the teacher crate's own
//! `world/resource.rs`, generalised from its `Resources` map to the
//! runtime-descriptor style the rest of this crate uses (type-erased
//! storage behind `downcast-rs` instead of a generic `Resource` bound).

use std::any::TypeId;

use downcast_rs::{impl_downcast, Downcast};
use hashbrown::HashMap;

/// Marker for any type that can be stored as a world addon.
pub trait Addon: Downcast + 'static {}
impl_downcast!(Addon);
impl<T: 'static> Addon for T {}

/// TypeId-keyed map of addon instances, one per type, owned by the world.
#[derive(Default)]
pub struct AddonRegistry {
    addons: HashMap<TypeId, Box<dyn Addon>>,
}

impl AddonRegistry {
    pub fn new() -> Self {
        AddonRegistry::default()
    }

    pub fn insert<T: Addon>(&mut self, value: T) -> Option<T> {
        self.addons
            .insert(TypeId::of::<T>(), Box::new(value))
            .map(|old| *old.into_any().downcast::<T>().unwrap_or_else(|_| unreachable!()))
    }

    pub fn get<T: Addon>(&self) -> Option<&T> {
        self.addons
            .get(&TypeId::of::<T>())
            .and_then(|addon| addon.downcast_ref())
    }

    pub fn get_mut<T: Addon>(&mut self) -> Option<&mut T> {
        self.addons
            .get_mut(&TypeId::of::<T>())
            .and_then(|addon| addon.downcast_mut())
    }

    /// Returns the addon, constructing it via `init` on first access.
    pub fn acquire<T: Addon, F: FnOnce() -> T>(&mut self, init: F) -> &mut T {
        self.addons
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(init()))
            .downcast_mut()
            .unwrap_or_else(|| unreachable!("type-keyed entry holds the wrong concrete type"))
    }

    pub fn remove<T: Addon>(&mut self) -> Option<T> {
        self.addons
            .remove(&TypeId::of::<T>())
            .map(|addon| *addon.into_any().downcast::<T>().unwrap_or_else(|_| unreachable!()))
    }

    pub fn contains<T: Addon>(&self) -> bool {
        self.addons.contains_key(&TypeId::of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock(u64);
    struct Settings {
        name: &'static str,
    }

    #[test]
    fn insert_and_get_round_trip() {
        let mut registry = AddonRegistry::new();
        registry.insert(Clock(42));
        registry.insert(Settings { name: "weave" });

        assert_eq!(registry.get::<Clock>().unwrap().0, 42);
        assert_eq!(registry.get::<Settings>().unwrap().name, "weave");
        assert!(!registry.contains::<u32>());
    }

    #[test]
    fn acquire_initializes_once() {
        let mut registry = AddonRegistry::new();
        registry.acquire(|| Clock(1)).0 += 1;
        assert_eq!(registry.get::<Clock>().unwrap().0, 2);
    }
}
