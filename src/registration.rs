use alloc::{sync::Arc, vec::Vec};
use core::fmt::{self, Display, Formatter};

use crate::{oracle::ParameterDecl, types::TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lifetime {
    Singleton,
    Scoped,
    Transient,
}

impl Display for Lifetime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lifetime::Singleton => "singleton",
            Lifetime::Scoped => "scoped",
            Lifetime::Transient => "transient",
        })
    }
}

/// Factory function producing the registered service.
/// Its parameter list replaces the constructor of the resolved type.
#[derive(Debug, Clone, PartialEq)]
pub struct FactoryMethod {
    pub name: Arc<str>,
    pub is_static: bool,
    pub generic_params: Vec<Arc<str>>,
    pub return_type: TypeRef,
    pub parameters: Vec<ParameterDecl>,
}

impl FactoryMethod {
    #[must_use]
    pub fn new(name: &str, return_type: TypeRef, parameters: impl IntoIterator<Item = ParameterDecl>) -> Self {
        Self {
            name: name.into(),
            is_static: true,
            generic_params: Vec::new(),
            return_type,
            parameters: parameters.into_iter().collect(),
        }
    }

    #[inline]
    #[must_use]
    pub fn instance(mut self) -> Self {
        self.is_static = false;
        self
    }

    #[inline]
    #[must_use]
    pub fn generic(mut self, params: impl IntoIterator<Item = &'static str>) -> Self {
        self.generic_params = params.into_iter().map(Into::into).collect();
        self
    }
}

/// Field or property whose value is the registered service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub name: Arc<str>,
    pub is_static: bool,
}

/// How a registration is materialized
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Construction {
    #[default]
    Constructor,
    Factory(FactoryMethod),
    Member(MemberRef),
}

impl Construction {
    #[must_use]
    pub fn member(name: &str) -> Self {
        Self::Member(MemberRef {
            name: name.into(),
            is_static: false,
        })
    }
}

/// Raw registration declaration as produced by the declaration scanner
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub service_type: TypeRef,
    pub implementation_type: Option<TypeRef>,
    pub lifetime: Lifetime,
    pub key: Option<Arc<str>>,
    pub construction: Construction,
}

impl Declaration {
    #[must_use]
    pub fn new(service_type: TypeRef, lifetime: Lifetime) -> Self {
        Self {
            service_type,
            implementation_type: None,
            lifetime,
            key: None,
            construction: Construction::Constructor,
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

    #[inline]
    #[must_use]
    pub fn implemented_by(mut self, implementation_type: TypeRef) -> Self {
        self.implementation_type = Some(implementation_type);
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
    pub fn constructed_by(mut self, construction: Construction) -> Self {
        self.construction = construction;
        self
    }
}

/// Index of a registration inside its [`crate::ServiceRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationId(pub(crate) usize);

impl RegistrationId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Disposal capabilities of a resolved type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub disposable: bool,
    pub async_disposable: bool,
}

/// One declared or derived binding
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub id: RegistrationId,
    pub service_type: TypeRef,
    pub implementation_type: Option<TypeRef>,
    pub lifetime: Lifetime,
    pub key: Option<Arc<str>>,
    pub construction: Construction,
    /// Present only for synthesized collection aggregates
    pub members: Option<Vec<RegistrationId>>,
    pub ordinal: usize,
    pub is_disposable: bool,
    pub is_async_disposable: bool,
}

impl Registration {
    /// Implementation type if present, the service type otherwise
    #[inline]
    #[must_use]
    pub fn resolved_type(&self) -> &TypeRef {
        self.implementation_type.as_ref().unwrap_or(&self.service_type)
    }

    #[inline]
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        self.members.is_some()
    }

    /// Whether this is an unresolved open-generic placeholder
    #[inline]
    #[must_use]
    pub fn is_open_generic(&self) -> bool {
        self.service_type.is_open() || self.resolved_type().is_open()
    }

    #[inline]
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.ordinal == 0
    }

    #[inline]
    #[must_use]
    pub fn matches_key(&self, key: Option<&str>) -> bool {
        self.key.as_deref() == key
    }
}
