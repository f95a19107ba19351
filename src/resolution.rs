use alloc::{sync::Arc, vec::Vec};

use crate::{
    errors::{MissingParameter, MissingReason},
    oracle::DefaultValue,
    registration::{Lifetime, RegistrationId},
    registry::ServiceRegistry,
    types::{TypeKey, TypeRef},
};

/// What a [`ConstructorResolution`] is cached under.
///
/// Constructors are resolved once per concrete type and consumer lifetime,
/// factories once per registration since two registrations of one type may name different factories.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResolutionTarget {
    Constructor { ty: TypeKey, lifetime: Lifetime },
    Factory(RegistrationId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructorSource {
    /// Index of the single authored public constructor in the type's declaration
    Authored { index: usize },
    Implicit,
    Factory { name: Arc<str> },
}

/// Chosen constructor of a concrete type and its resolved parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorResolution {
    pub ty: TypeRef,
    pub source: ConstructorSource,
    pub parameters: Vec<ParameterResolution>,
}

impl ConstructorResolution {
    /// Parameters that make this constructor unusable
    pub fn missing(&self, registry: &ServiceRegistry) -> Vec<MissingParameter> {
        self.parameters
            .iter()
            .filter(|parameter| parameter.is_fatal())
            .map(|parameter| parameter.to_missing(registry))
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.parameters.iter().any(ParameterResolution::is_fatal)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterResolution {
    pub name: Arc<str>,
    /// Effective type after stripping one level of nullable wrapping
    pub parameter_type: TypeRef,
    pub key: Option<Arc<str>>,
    pub is_nullable: bool,
    pub default_value: Option<DefaultValue>,
    pub use_dynamic: bool,
    pub is_lazy: bool,
    pub selected_service: Option<RegistrationId>,
    pub has_no_declaration: bool,
    /// Competing registrations when the lookup was ambiguous
    pub multiple_registrations: Vec<RegistrationId>,
    pub creates_lazy_transient_cycle: bool,
    pub has_empty_collection: bool,
}

impl ParameterResolution {
    #[inline]
    #[must_use]
    pub fn has_multiple_registrations(&self) -> bool {
        !self.multiple_registrations.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.selected_service.is_some()
    }

    /// Ambiguity is always fatal, other failures are tolerated
    /// for nullable, defaulted and dynamic parameters
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        if self.has_multiple_registrations() {
            return true;
        }
        if self.is_resolved() {
            return false;
        }
        !(self.use_dynamic || self.is_nullable || self.default_value.is_some())
    }

    fn to_missing(&self, registry: &ServiceRegistry) -> MissingParameter {
        let reason = if self.has_multiple_registrations() {
            MissingReason::Ambiguous {
                candidates: self
                    .multiple_registrations
                    .iter()
                    .map(|id| registry.get(*id).resolved_type().clone())
                    .collect(),
            }
        } else if self.creates_lazy_transient_cycle {
            MissingReason::LazyTransientCycle
        } else if self.has_empty_collection {
            MissingReason::EmptyCollection
        } else {
            MissingReason::NoDeclaration
        };

        MissingParameter {
            name: self.name.clone(),
            ty: self.parameter_type.clone(),
            key: self.key.clone(),
            reason,
        }
    }
}
