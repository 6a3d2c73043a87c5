//! Component-set predicates used to decide which archetypes a system's
//! query touches (§4.7).
//!
//! Every combinator here is a zero-sized, alloc-free `Matcher` impl —
//! matching is a handful of `TypeId` comparisons against an
//! [`EntityDescriptor`], never a per-entity allocation.

use std::any::TypeId;

use crate::descriptor::EntityDescriptor;

/// Tests whether an archetype (by its descriptor) qualifies for a system.
pub trait Matcher: 'static {
    fn matches(&self, descriptor: &EntityDescriptor) -> bool;
}

/// Matches an archetype that contains every component type in `T`, a tuple
/// of up to 8 component types.
pub struct Has<T>(std::marker::PhantomData<fn() -> T>);

impl<T> Default for Has<T> {
    fn default() -> Self {
        Has(std::marker::PhantomData)
    }
}

impl<T> Has<T> {
    pub fn new() -> Self {
        Has::default()
    }
}

/// Implemented for tuples of component types so `Has<(A, B, ...)>` can
/// list its members' `TypeId`s. Mirrors the teacher crate's own
/// `for_tuple!`-generated impls for small tuples of query terms.
pub trait ComponentSet {
    fn type_ids(into: &mut Vec<TypeId>);
}

macro_rules! impl_component_set {
    ($($ty:ident),+) => {
        impl<$($ty: 'static),+> ComponentSet for ($($ty,)+) {
            fn type_ids(into: &mut Vec<TypeId>) {
                $(into.push(TypeId::of::<$ty>());)+
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);

impl<T: ComponentSet + 'static> Matcher for Has<T> {
    fn matches(&self, descriptor: &EntityDescriptor) -> bool {
        let mut type_ids = Vec::new();
        T::type_ids(&mut type_ids);
        descriptor.contains_all(&type_ids)
    }
}

/// Matches every archetype unconditionally.
pub struct Any_;

impl Matcher for Any_ {
    fn matches(&self, _descriptor: &EntityDescriptor) -> bool {
        true
    }
}

/// Matches no archetype. Useful as a neutral element or a disabled
/// system's placeholder matcher.
pub struct None_;

impl Matcher for None_ {
    fn matches(&self, _descriptor: &EntityDescriptor) -> bool {
        false
    }
}

/// Matches archetypes that satisfy both `A` and `B`.
pub struct And<A, B>(pub A, pub B);

impl<A: Matcher, B: Matcher> Matcher for And<A, B> {
    fn matches(&self, descriptor: &EntityDescriptor) -> bool {
        self.0.matches(descriptor) && self.1.matches(descriptor)
    }
}

/// Matches archetypes that satisfy either `A` or `B`.
pub struct Or<A, B>(pub A, pub B);

impl<A: Matcher, B: Matcher> Matcher for Or<A, B> {
    fn matches(&self, descriptor: &EntityDescriptor) -> bool {
        self.0.matches(descriptor) || self.1.matches(descriptor)
    }
}

/// Matches archetypes that do not satisfy `A`.
pub struct Not<A>(pub A);

impl<A: Matcher> Matcher for Not<A> {
    fn matches(&self, descriptor: &EntityDescriptor) -> bool {
        !self.0.matches(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ComponentKey, ComponentSlot, EntityDescriptor};

    struct Position;
    struct Velocity;
    struct Frozen;

    fn descriptor_with(types: &[TypeId]) -> EntityDescriptor {
        let slots = types
            .iter()
            .enumerate()
            .map(|(i, &type_id)| ComponentSlot {
                key: ComponentKey {
                    type_id,
                    disambiguator: 0,
                },
                offset: i * 8,
                size: 8,
            })
            .collect();
        EntityDescriptor::new(types.len() * 8, slots)
    }

    #[test]
    fn has_matches_all_listed_types() {
        let descriptor = descriptor_with(&[TypeId::of::<Position>(), TypeId::of::<Velocity>()]);
        assert!(Has::<(Position, Velocity)>::new().matches(&descriptor));
        assert!(!Has::<(Position, Frozen)>::new().matches(&descriptor));
    }

    #[test]
    fn not_inverts_and_or_combine() {
        let descriptor = descriptor_with(&[TypeId::of::<Position>()]);
        let matcher = And(Has::<(Position,)>::new(), Not(Has::<(Frozen,)>::new()));
        assert!(matcher.matches(&descriptor));

        let matcher = Or(Has::<(Frozen,)>::new(), Has::<(Position,)>::new());
        assert!(matcher.matches(&descriptor));
    }
}
