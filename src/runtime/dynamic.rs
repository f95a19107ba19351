use alloc::{sync::Arc, vec::Vec};

use super::{activator::Instance, hybrid::HybridScope};
use crate::{
    errors::RuntimeErrorKind,
    registration::Lifetime,
    types::{Bindings, TypeRef},
};

pub(crate) type DynamicFactory = Arc<dyn Fn(&HybridScope) -> Result<Instance, RuntimeErrorKind> + Send + Sync>;

/// How a dynamic registration produces its instance
#[derive(Clone)]
pub enum DynamicSource {
    /// Constructed through the activator of the implementation type
    Type(TypeRef),
    /// Built by a function receiving the requesting scope
    Factory(DynamicFactory),
    /// Supplied by the host, never finalized
    Instance(Instance),
}

/// Registration known only at execution time
#[derive(Clone)]
pub struct DynamicRegistration {
    pub service_type: TypeRef,
    pub lifetime: Lifetime,
    pub key: Option<Arc<str>>,
    pub source: DynamicSource,
}

impl DynamicRegistration {
    #[must_use]
    pub fn new(service_type: TypeRef, lifetime: Lifetime) -> Self {
        Self {
            source: DynamicSource::Type(service_type.clone()),
            service_type,
            lifetime,
            key: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn singleton(service_type: TypeRef) -> Self {
        Self::new(service_type, Lifetime::Singleton)
    }

    #[inline]
    #[must_use]
    pub fn scoped(service_type: TypeRef) -> Self {
        Self::new(service_type, Lifetime::Scoped)
    }

    #[inline]
    #[must_use]
    pub fn transient(service_type: TypeRef) -> Self {
        Self::new(service_type, Lifetime::Transient)
    }

    #[must_use]
    pub fn instance<T: Send + Sync + 'static>(service_type: TypeRef, value: T) -> Self {
        Self {
            source: DynamicSource::Instance(Arc::new(value)),
            ..Self::singleton(service_type)
        }
    }

    #[inline]
    #[must_use]
    pub fn implemented_by(mut self, implementation_type: TypeRef) -> Self {
        self.source = DynamicSource::Type(implementation_type);
        self
    }

    #[inline]
    #[must_use]
    pub fn factory<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&HybridScope) -> Result<T, RuntimeErrorKind> + Send + Sync + 'static,
    {
        self.source = DynamicSource::Factory(Arc::new(move |scope: &HybridScope| Ok(Arc::new(factory(scope)?) as Instance)));
        self
    }

    #[inline]
    #[must_use]
    pub fn keyed(mut self, key: &str) -> Self {
        self.key = Some(key.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn is_open_generic(&self) -> bool {
        self.service_type.is_open()
    }

    #[inline]
    #[must_use]
    pub fn matches_key(&self, key: Option<&str>) -> bool {
        self.key.as_deref() == key
    }

    /// Implementation type for a requested closed service type, `None` if the shapes don't match
    pub(crate) fn implementation_for(&self, requested: &TypeRef) -> Option<TypeRef> {
        let DynamicSource::Type(implementation) = &self.source else {
            return Some(requested.clone());
        };
        if !self.is_open_generic() {
            return Some(implementation.clone());
        }

        let mut bindings = Bindings::new();
        self.service_type
            .bind(requested, &mut bindings)
            .then(|| implementation.substitute(&bindings))
    }
}

/// Dynamically supplied registrations in insertion order
#[derive(Clone, Default)]
pub struct DynamicTable {
    registrations: Vec<DynamicRegistration>,
}

impl DynamicTable {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with(mut self, registration: DynamicRegistration) -> Self {
        self.add(registration);
        self
    }

    /// Appends a registration, returning its index
    pub fn add(&mut self, registration: DynamicRegistration) -> usize {
        self.registrations.push(registration);
        self.registrations.len() - 1
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&DynamicRegistration> {
        self.registrations.get(index)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Indices of closed registrations of exactly `ty`. `any_key` ignores keys.
    pub(crate) fn exact(&self, ty: &TypeRef, key: Option<&str>, any_key: bool) -> Vec<usize> {
        let type_key = ty.key();
        self.matching(|registration| {
            !registration.is_open_generic()
                && registration.service_type.key() == type_key
                && (any_key || registration.matches_key(key))
        })
    }

    /// Indices of open registrations able to produce the closed generic `ty`
    pub(crate) fn open(&self, ty: &TypeRef, key: Option<&str>, any_key: bool) -> Vec<usize> {
        if !ty.is_closed_generic() {
            return Vec::new();
        }
        self.matching(|registration| {
            registration.is_open_generic()
                && (any_key || registration.matches_key(key))
                && registration.implementation_for(ty).is_some()
        })
    }

    fn matching(&self, predicate: impl Fn(&DynamicRegistration) -> bool) -> Vec<usize> {
        self.registrations
            .iter()
            .enumerate()
            .filter(|(_, registration)| predicate(registration))
            .map(|(index, _)| index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::{DynamicRegistration, DynamicTable};
    use crate::types::TypeRef;

    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_matching() {
        let handler = TypeRef::generic("IHandler", [TypeRef::param("T")]);
        let table = DynamicTable::new()
            .with(DynamicRegistration::singleton(TypeRef::named("IClock")).implemented_by(TypeRef::named("Clock")))
            .with(
                DynamicRegistration::singleton(TypeRef::named("IClock"))
                    .implemented_by(TypeRef::named("FakeClock"))
                    .keyed("fake"),
            )
            .with(
                DynamicRegistration::transient(handler)
                    .implemented_by(TypeRef::generic("Handler", [TypeRef::param("T")])),
            );

        let clock = TypeRef::named("IClock");
        assert_eq!(table.exact(&clock, None, false), [0]);
        assert_eq!(table.exact(&clock, Some("fake"), false), [1]);
        assert_eq!(table.exact(&clock, None, true), [0, 1]);

        let handler_int = TypeRef::generic("IHandler", [TypeRef::named("int")]);
        assert!(table.exact(&handler_int, None, false).is_empty());
        assert_eq!(table.open(&handler_int, None, false), [2]);
        assert_eq!(
            table.get(2).unwrap().implementation_for(&handler_int),
            Some(TypeRef::generic("Handler", [TypeRef::named("int")]))
        );
    }
}
