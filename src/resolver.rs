use alloc::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    vec,
    vec::Vec,
};
use tracing::{debug, debug_span, error, warn};

use crate::{
    errors::ResolveErrorKind,
    oracle::{ConstructorDecl, ParameterDecl, TypeShapeOracle},
    registration::{Capabilities, Construction, Declaration, FactoryMethod, Lifetime, RegistrationId},
    registry::{NewRegistration, Selection, ServiceRegistry},
    resolution::{ConstructorResolution, ConstructorSource, ParameterResolution, ResolutionTarget},
    types::{Bindings, TypeRef},
};

/// Outcome of resolving one service request against the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(RegistrationId),
    Ambiguous(Vec<RegistrationId>),
    Missing,
    /// A deferred handle of a transient requested by a transient consumer
    LazyTransientCycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    pub lookup: Lookup,
    pub is_lazy: bool,
}

impl LookupResult {
    #[inline]
    fn eager(lookup: Lookup) -> Self {
        Self { lookup, is_lazy: false }
    }
}

/// Everything the resolution pass produced
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub registry: ServiceRegistry,
    pub constructors: BTreeMap<ResolutionTarget, ConstructorResolution>,
    pub errors: Vec<ResolveErrorKind>,
}

/// Resolves every registration's constructor against the registry.
///
/// Resolution may grow the registry: closing an open generic inserts a concrete registration
/// (resolved eagerly before the inserting call returns), and requesting a collection
/// synthesizes an aggregate. [`Self::resolve_all`] walks the registry as a worklist,
/// so registrations appended during the pass are visited too.
pub struct DependencyResolver<'o, O: ?Sized> {
    oracle: &'o O,
    registry: ServiceRegistry,
    constructors: BTreeMap<ResolutionTarget, ConstructorResolution>,
    visited: BTreeSet<ResolutionTarget>,
    errors: Vec<ResolveErrorKind>,
    dynamic_registrations: bool,
}

impl<'o, O> DependencyResolver<'o, O>
where
    O: TypeShapeOracle + ?Sized,
{
    #[inline]
    #[must_use]
    pub fn new(oracle: &'o O) -> Self {
        Self {
            oracle,
            registry: ServiceRegistry::new(),
            constructors: BTreeMap::new(),
            visited: BTreeSet::new(),
            errors: Vec::new(),
            dynamic_registrations: false,
        }
    }

    /// Every unresolved parameter may be supplied by the hybrid runtime resolver
    #[inline]
    #[must_use]
    pub fn with_dynamic_registrations(mut self, enabled: bool) -> Self {
        self.dynamic_registrations = enabled;
        self
    }

    pub fn declare(&mut self, declaration: Declaration) -> RegistrationId {
        let Declaration {
            service_type,
            implementation_type,
            lifetime,
            key,
            construction,
        } = declaration;

        self.insert(NewRegistration {
            implementation_type,
            key,
            construction,
            ..NewRegistration::new(service_type, lifetime)
        })
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn constructor(&self, target: &ResolutionTarget) -> Option<&ConstructorResolution> {
        self.constructors.get(target)
    }

    pub fn resolve_all(mut self) -> ResolveOutcome {
        let span = debug_span!("resolve_all", registrations = self.registry.len());
        let _guard = span.enter();

        let mut next = 0;
        while next < self.registry.len() {
            self.resolve_registration(RegistrationId(next));
            next += 1;
        }
        debug!(registrations = self.registry.len(), errors = self.errors.len(), "Resolved");

        ResolveOutcome {
            registry: self.registry,
            constructors: self.constructors,
            errors: self.errors,
        }
    }

    /// Resolves the constructor dependencies of one registration, once per target
    pub fn resolve_registration(&mut self, id: RegistrationId) {
        let registration = self.registry.get(id).clone();
        if registration.is_aggregate() || registration.is_open_generic() {
            return;
        }

        let resolved_type = registration.resolved_type().clone();
        let target = match &registration.construction {
            Construction::Member(_) => return,
            Construction::Constructor => ResolutionTarget::Constructor {
                ty: resolved_type.key(),
                lifetime: registration.lifetime,
            },
            Construction::Factory(_) => ResolutionTarget::Factory(id),
        };
        if !self.visited.insert(target.clone()) {
            return;
        }

        let span = debug_span!("resolve_constructor", ty = %resolved_type, lifetime = %registration.lifetime);
        let _guard = span.enter();

        let result = match &registration.construction {
            Construction::Factory(factory) => self.resolve_factory(factory, &resolved_type, registration.lifetime),
            Construction::Constructor | Construction::Member(_) => self.resolve_constructor(&resolved_type, registration.lifetime),
        };

        match result {
            Ok(resolution) => {
                let parameters = resolution.missing(&self.registry);
                if !parameters.is_empty() {
                    let err = ResolveErrorKind::MissingDependencies {
                        ty: resolved_type,
                        parameters,
                    };
                    error!("{}", err);
                    self.errors.push(err);
                }
                self.constructors.insert(target, resolution);
            }
            Err(err) => {
                error!("{}", err);
                self.errors.push(err);
            }
        }
    }

    /// Resolves a service request on behalf of a consumer with the given lifetime
    pub fn resolve(&mut self, ty: &TypeRef, key: Option<&str>, consumer: Lifetime) -> LookupResult {
        let span = debug_span!("resolve", dependency = %ty, ?key);
        let _guard = span.enter();

        match self.registry.select(ty, key) {
            Selection::Single(id) => {
                debug!("Found in registry");
                return LookupResult::eager(Lookup::Found(self.registry.concretize(id)));
            }
            Selection::Ambiguous(ids) => {
                warn!(candidates = ids.len(), "Ambiguous registrations");
                return LookupResult::eager(Lookup::Ambiguous(ids));
            }
            Selection::None => {}
        }

        if let Some(elem) = self.oracle.collection_element(ty) {
            return LookupResult::eager(Lookup::Found(self.aggregate(ty, &elem, key)));
        }

        if let Some(inner) = self.oracle.deferred_inner(ty) {
            let lookup = match self.resolve(&inner, key, consumer).lookup {
                Lookup::Found(id) if consumer == Lifetime::Transient && self.registry.get(id).lifetime == Lifetime::Transient => {
                    warn!("Deferred transient requested by a transient");
                    Lookup::LazyTransientCycle
                }
                lookup => lookup,
            };
            return LookupResult { lookup, is_lazy: true };
        }

        if ty.is_closed_generic() {
            if let Some(lookup) = self.close_generic(ty, key) {
                return LookupResult::eager(lookup);
            }
        }

        debug!("No declaration");
        LookupResult::eager(Lookup::Missing)
    }
}

impl<'o, O> DependencyResolver<'o, O>
where
    O: TypeShapeOracle + ?Sized,
{
    fn insert(&mut self, registration: NewRegistration) -> RegistrationId {
        let resolved_type = registration.implementation_type.as_ref().unwrap_or(&registration.service_type);
        let capabilities = self
            .oracle
            .describe_closed(resolved_type)
            .map(|descriptor| Capabilities {
                disposable: descriptor.disposable,
                async_disposable: descriptor.async_disposable,
            })
            .unwrap_or_default();

        self.registry.add(NewRegistration {
            capabilities,
            ..registration
        })
    }

    fn resolve_constructor(&mut self, ty: &TypeRef, lifetime: Lifetime) -> Result<ConstructorResolution, ResolveErrorKind> {
        let Some(descriptor) = self.oracle.describe_closed(ty).filter(|descriptor| descriptor.is_constructible()) else {
            return Err(ResolveErrorKind::NotConstructible { ty: ty.clone() });
        };

        let authored = descriptor
            .constructors
            .iter()
            .enumerate()
            .filter(|(_, constructor)| constructor.is_authored_public())
            .collect::<Vec<_>>();

        let (source, parameters) = match authored.as_slice() {
            [(index, constructor)] => (ConstructorSource::Authored { index: *index }, constructor.parameters.clone()),
            [] => (
                ConstructorSource::Implicit,
                descriptor
                    .constructors
                    .iter()
                    .find(|constructor| constructor.implicit)
                    .map(|constructor: &ConstructorDecl| constructor.parameters.clone())
                    .unwrap_or_default(),
            ),
            _ => {
                return Err(ResolveErrorKind::AmbiguousConstructors {
                    ty: ty.clone(),
                    count: authored.len(),
                })
            }
        };

        Ok(ConstructorResolution {
            ty: ty.clone(),
            source,
            parameters: self.resolve_parameters(&parameters, lifetime),
        })
    }

    fn resolve_factory(
        &mut self,
        factory: &FactoryMethod,
        ty: &TypeRef,
        lifetime: Lifetime,
    ) -> Result<ConstructorResolution, ResolveErrorKind> {
        let mismatch = || ResolveErrorKind::FactoryReturnMismatch {
            factory: factory.name.clone(),
            expected: ty.clone(),
            actual: factory.return_type.clone(),
        };

        if factory.return_type.path() != ty.path() {
            return Err(mismatch());
        }

        let parameters = if factory.generic_params.is_empty() {
            factory.parameters.clone()
        } else {
            let mut bindings = Bindings::new();
            if !factory.return_type.bind(ty, &mut bindings) {
                return Err(mismatch());
            }
            debug!(factory = %factory.name, "Generic factory specialized");
            factory.parameters.iter().map(|parameter| parameter.substitute(&bindings)).collect()
        };

        Ok(ConstructorResolution {
            ty: ty.clone(),
            source: ConstructorSource::Factory {
                name: factory.name.clone(),
            },
            parameters: self.resolve_parameters(&parameters, lifetime),
        })
    }

    fn resolve_parameters(&mut self, parameters: &[ParameterDecl], consumer: Lifetime) -> Vec<ParameterResolution> {
        parameters
            .iter()
            .map(|parameter| self.resolve_parameter(parameter, consumer))
            .collect()
    }

    fn resolve_parameter(&mut self, parameter: &ParameterDecl, consumer: Lifetime) -> ParameterResolution {
        let (parameter_type, wrapped) = match self.oracle.nullable_inner(&parameter.ty) {
            Some(inner) => (inner, true),
            None => (parameter.ty.clone(), false),
        };

        let LookupResult { lookup, is_lazy } = self.resolve(&parameter_type, parameter.key.as_deref(), consumer);

        let mut resolution = ParameterResolution {
            name: parameter.name.clone(),
            parameter_type,
            key: parameter.key.clone(),
            is_nullable: parameter.nullable || wrapped,
            default_value: parameter.default_value.clone(),
            use_dynamic: parameter.allow_dynamic || self.dynamic_registrations,
            is_lazy,
            selected_service: None,
            has_no_declaration: false,
            multiple_registrations: Vec::new(),
            creates_lazy_transient_cycle: false,
            has_empty_collection: false,
        };

        match lookup {
            Lookup::Found(id) => {
                let is_empty = self.registry.get(id).members.as_ref().is_some_and(Vec::is_empty);
                if parameter.require_non_empty && is_empty {
                    resolution.has_empty_collection = true;
                } else {
                    resolution.selected_service = Some(id);
                }
            }
            Lookup::Ambiguous(ids) => resolution.multiple_registrations = ids,
            Lookup::Missing => resolution.has_no_declaration = true,
            Lookup::LazyTransientCycle => resolution.creates_lazy_transient_cycle = true,
        }

        if !resolution.is_resolved() && !resolution.is_fatal() {
            debug!(parameter = %resolution.name, "Unresolved parameter is optional");
        }
        resolution
    }

    /// Synthesizes the aggregate of every registration of `elem`
    fn aggregate(&mut self, ty: &TypeRef, elem: &TypeRef, key: Option<&str>) -> RegistrationId {
        if elem.is_closed_generic() {
            // Open registrations contribute next to closed ones of the same element
            self.close_all(elem, key);
            // Closing resolves eagerly and may have requested this very collection
            if let Some(id) = self.registry.aggregate(elem, key) {
                return id;
            }
        }

        let mut members = Vec::new();
        for id in self.registry.lookup(elem).to_vec() {
            let registration = self.registry.get(id);
            if registration.is_aggregate() || registration.is_open_generic() {
                continue;
            }
            if key.is_some() && !registration.matches_key(key) {
                continue;
            }
            let member = self.registry.concretize(id);
            if !members.contains(&member) {
                members.push(member);
            }
        }
        debug!(elem = %elem, members = members.len(), "Aggregate synthesized");

        let key: Option<Arc<str>> = key.map(Into::into);
        let id = self.insert(NewRegistration {
            key: key.clone(),
            members: Some(members),
            ..NewRegistration::new(ty.clone(), Lifetime::Transient)
        });
        let shapes = self.oracle.collection_shapes(elem);
        self.registry.index_aggregate(elem, key, id, &shapes);
        id
    }

    fn open_candidates(&self, ty: &TypeRef, key: Option<&str>, any_key: bool) -> Vec<RegistrationId> {
        let Some(definition) = ty.definition_key() else {
            return Vec::new();
        };
        self.registry
            .lookup_key(&definition)
            .iter()
            .copied()
            .filter(|id| {
                let registration = self.registry.get(*id);
                registration.is_open_generic() && !registration.is_aggregate() && (any_key || registration.matches_key(key))
            })
            .collect()
    }

    fn close_generic(&mut self, ty: &TypeRef, key: Option<&str>) -> Option<Lookup> {
        let candidates = self.open_candidates(ty, key, false);
        match candidates.as_slice() {
            [] => None,
            [open] => {
                let closed = self.instantiate_closed(*open, ty);
                Some(Lookup::Found(self.registry.concretize(closed)))
            }
            _ => Some(Lookup::Ambiguous(candidates)),
        }
    }

    fn close_all(&mut self, elem: &TypeRef, key: Option<&str>) {
        for open in self.open_candidates(elem, key, key.is_none()) {
            self.instantiate_closed(open, elem);
        }
    }

    /// Inserts the closed registration of `ty` from an open one, resolves it right away
    /// and registers it under its supertypes. Closing the same type twice yields the same registration.
    fn instantiate_closed(&mut self, open: RegistrationId, ty: &TypeRef) -> RegistrationId {
        let open = self.registry.get(open).clone();
        let mut bindings = Bindings::new();
        let matches = open.service_type.bind(ty, &mut bindings);
        let implementation_type = open
            .implementation_type
            .as_ref()
            .map(|implementation| implementation.substitute(&bindings));

        // Closed before, or declared closed with the same implementation
        let resolved_type = implementation_type.as_ref().unwrap_or(ty);
        let existing = self.registry.lookup(ty).iter().copied().find(|id| {
            let registration = self.registry.get(*id);
            !registration.is_aggregate() && registration.matches_key(open.key.as_deref()) && registration.resolved_type() == resolved_type
        });
        if let Some(existing) = existing {
            return existing;
        }

        let span = debug_span!("close_generic", ty = %ty);
        let _guard = span.enter();

        if !matches {
            warn!(open = %open.service_type, "Open registration doesn't match the requested shape");
        }

        let id = self.insert(NewRegistration {
            implementation_type,
            key: open.key.clone(),
            construction: open.construction.clone(),
            ..NewRegistration::new(ty.clone(), open.lifetime)
        });
        debug!("Closed generic registration added");

        self.resolve_registration(id);
        self.register_supertypes(id);
        id
    }

    fn register_supertypes(&mut self, id: RegistrationId) {
        let registration = self.registry.get(id).clone();
        let resolved_type = registration.resolved_type().clone();
        let key = registration.key.as_deref();

        self.append_to_aggregates(&registration.service_type, key, id);

        for supertype in self.supertypes_of(&resolved_type) {
            if supertype == registration.service_type {
                continue;
            }

            let exists = self.registry.lookup(&supertype).iter().any(|other| {
                let other = self.registry.get(*other);
                other.matches_key(key) && *other.resolved_type() == resolved_type
            });
            if !exists {
                self.insert(NewRegistration {
                    implementation_type: Some(resolved_type.clone()),
                    key: registration.key.clone(),
                    construction: registration.construction.clone(),
                    ..NewRegistration::new(supertype.clone(), registration.lifetime)
                });
                debug!(%supertype, "Registered under supertype");
            }
            self.append_to_aggregates(&supertype, key, id);
        }
    }

    /// Transitive supertypes, excluding markers
    fn supertypes_of(&self, ty: &TypeRef) -> Vec<TypeRef> {
        let mut found: Vec<TypeRef> = Vec::new();
        let mut pending = vec![ty.clone()];
        while let Some(current) = pending.pop() {
            let Some(descriptor) = self.oracle.describe_closed(&current) else {
                continue;
            };
            for supertype in descriptor.supertypes {
                if self.oracle.is_marker(&supertype) || supertype == *ty || found.contains(&supertype) {
                    continue;
                }
                found.push(supertype.clone());
                pending.push(supertype);
            }
        }
        found
    }

    fn append_to_aggregates(&mut self, elem: &TypeRef, key: Option<&str>, member: RegistrationId) {
        let mut aggregates = vec![self.registry.aggregate(elem, None)];
        if key.is_some() {
            aggregates.push(self.registry.aggregate(elem, key));
        }
        for aggregate in aggregates.into_iter().flatten() {
            self.registry.push_member(aggregate, member);
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::{DependencyResolver, Lookup};
    use crate::{
        errors::{MissingReason, ResolveErrorKind},
        oracle::{ConstructorDecl, DefaultValue, ParameterDecl, TypeCatalog, TypeDescriptor},
        registration::{Construction, Declaration, FactoryMethod, Lifetime::*},
        resolution::{ConstructorSource, ResolutionTarget},
        types::TypeRef,
    };

    use alloc::{vec, vec::Vec};
    use tracing_test::traced_test;

    fn ty(name: &str) -> TypeRef {
        TypeRef::named(name)
    }

    fn class(name: &str, parameters: impl IntoIterator<Item = ParameterDecl>) -> TypeDescriptor {
        TypeDescriptor::class(ty(name)).constructor(ConstructorDecl::public(parameters))
    }

    fn param(name: &str, ty: TypeRef) -> ParameterDecl {
        ParameterDecl::new(name, ty)
    }

    #[test]
    #[traced_test]
    fn test_plugins_aggregate_and_ambiguity() {
        let plugin = ty("IPlugin");
        let sequence = TypeRef::generic("IEnumerable", [plugin.clone()]);
        let catalog = TypeCatalog::new()
            .with_type(class("PluginA", []))
            .with_type(class("PluginB", []))
            .with_type(class("PluginC", []))
            .with_type(class("Host", [param("plugins", sequence.clone())]))
            .with_type(class("Single", [param("plugin", plugin.clone())]));

        let mut resolver = DependencyResolver::new(&catalog);
        let a = resolver.declare(Declaration::singleton(plugin.clone()).implemented_by(ty("PluginA")));
        let b = resolver.declare(Declaration::singleton(plugin.clone()).implemented_by(ty("PluginB")));
        let c = resolver.declare(Declaration::singleton(plugin.clone()).implemented_by(ty("PluginC")));
        resolver.declare(Declaration::singleton(ty("Host")));
        resolver.declare(Declaration::singleton(ty("Single")));

        let outcome = resolver.resolve_all();

        let host = &outcome.constructors[&ResolutionTarget::Constructor {
            ty: ty("Host").key(),
            lifetime: Singleton,
        }];
        let aggregate = host.parameters[0].selected_service.unwrap();
        assert_eq!(outcome.registry.get(aggregate).members.as_deref(), Some(&[a, b, c][..]));

        assert_eq!(outcome.errors.len(), 1);
        let ResolveErrorKind::MissingDependencies { ty: missing_ty, parameters } = &outcome.errors[0] else {
            panic!("unexpected error {:?}", outcome.errors[0]);
        };
        assert_eq!(*missing_ty, ty("Single"));
        assert_eq!(
            parameters[0].reason,
            MissingReason::Ambiguous {
                candidates: vec![ty("PluginA"), ty("PluginB"), ty("PluginC")],
            }
        );
    }

    #[test]
    #[traced_test]
    fn test_every_collection_shape_returns_one_aggregate() {
        let plugin = ty("IPlugin");
        let catalog = TypeCatalog::new().with_type(class("PluginA", []));

        let mut resolver = DependencyResolver::new(&catalog);
        resolver.declare(Declaration::singleton(plugin.clone()).implemented_by(ty("PluginA")));

        let Lookup::Found(sequence) = resolver
            .resolve(&TypeRef::generic("IEnumerable", [plugin.clone()]), None, Singleton)
            .lookup
        else {
            panic!("sequence not resolved");
        };
        let Lookup::Found(list) = resolver
            .resolve(&TypeRef::generic("IReadOnlyList", [plugin.clone()]), None, Singleton)
            .lookup
        else {
            panic!("list not resolved");
        };
        let Lookup::Found(array) = resolver.resolve(&TypeRef::array(plugin), None, Singleton).lookup else {
            panic!("array not resolved");
        };

        assert_eq!(sequence, list);
        assert_eq!(sequence, array);
    }

    #[test]
    #[traced_test]
    fn test_keyed_lookup_does_not_fall_back() {
        let keyed = ty("IKeyed");
        let catalog = TypeCatalog::new()
            .with_type(class("Impl", []))
            .with_type(class("Consumer", [param("keyed", keyed.clone()).keyed("k2")]));

        let mut resolver = DependencyResolver::new(&catalog);
        resolver.declare(Declaration::singleton(keyed.clone()).implemented_by(ty("Impl")).keyed("k1"));
        resolver.declare(Declaration::singleton(ty("Consumer")));

        assert!(matches!(resolver.resolve(&keyed, Some("k1"), Singleton).lookup, Lookup::Found(_)));
        assert_eq!(resolver.resolve(&keyed, Some("k2"), Singleton).lookup, Lookup::Missing);

        let outcome = resolver.resolve_all();
        let ResolveErrorKind::MissingDependencies { parameters, .. } = &outcome.errors[0] else {
            panic!("unexpected error {:?}", outcome.errors[0]);
        };
        assert_eq!(parameters[0].reason, MissingReason::NoDeclaration);
        assert_eq!(parameters[0].key.as_deref(), Some("k2"));
    }

    #[test]
    #[traced_test]
    fn test_second_unkeyed_registration_makes_lookup_ambiguous() {
        let service = ty("IService");
        let catalog = TypeCatalog::new().with_type(class("A", [])).with_type(class("B", []));

        let mut resolver = DependencyResolver::new(&catalog);
        resolver.declare(Declaration::singleton(service.clone()).implemented_by(ty("A")).keyed("a"));
        let unkeyed = resolver.declare(Declaration::singleton(service.clone()).implemented_by(ty("A")));
        assert!(matches!(resolver.resolve(&service, None, Singleton).lookup, Lookup::Found(_)));

        let second = resolver.declare(Declaration::singleton(service.clone()).implemented_by(ty("B")));
        assert_eq!(
            resolver.resolve(&service, None, Singleton).lookup,
            Lookup::Ambiguous(vec![unkeyed, second])
        );
        assert!(matches!(resolver.resolve(&service, Some("a"), Singleton).lookup, Lookup::Found(_)));
    }

    #[test]
    #[traced_test]
    fn test_lazy_transient_cycle() {
        let lazy_b = TypeRef::generic("Lazy", [ty("B")]);
        let catalog = TypeCatalog::new()
            .with_type(class("A", [param("b", lazy_b.clone())]))
            .with_type(class("B", []));

        let mut resolver = DependencyResolver::new(&catalog);
        resolver.declare(Declaration::transient(ty("A")));
        resolver.declare(Declaration::transient(ty("B")));

        let result = resolver.resolve(&lazy_b, None, Transient);
        assert!(result.is_lazy);
        assert_eq!(result.lookup, Lookup::LazyTransientCycle);
        assert!(matches!(resolver.resolve(&lazy_b, None, Singleton).lookup, Lookup::Found(_)));

        let outcome = resolver.resolve_all();
        let a = &outcome.constructors[&ResolutionTarget::Constructor {
            ty: ty("A").key(),
            lifetime: Transient,
        }];
        assert!(a.parameters[0].creates_lazy_transient_cycle);
        assert!(a.parameters[0].selected_service.is_none());
        let ResolveErrorKind::MissingDependencies { parameters, .. } = &outcome.errors[0] else {
            panic!("unexpected error {:?}", outcome.errors[0]);
        };
        assert_eq!(parameters[0].reason, MissingReason::LazyTransientCycle);
    }

    #[test]
    #[traced_test]
    fn test_generic_closing_is_idempotent() {
        let repo_t = TypeRef::generic("Repository", [TypeRef::param("T")]);
        let repo_int = TypeRef::generic("Repository", [ty("int")]);
        let catalog = TypeCatalog::new().with_type(TypeDescriptor::class(repo_t.clone()).constructor(ConstructorDecl::implicit()));

        let mut resolver = DependencyResolver::new(&catalog);
        resolver.declare(Declaration::scoped(repo_t));

        let Lookup::Found(first) = resolver.resolve(&repo_int, None, Singleton).lookup else {
            panic!("not closed");
        };
        let Lookup::Found(second) = resolver.resolve(&repo_int, None, Singleton).lookup else {
            panic!("not closed");
        };
        assert_eq!(first, second);
        assert_eq!(resolver.registry().lookup(&repo_int), [first]);

        let closed = resolver.registry().get(first);
        assert_eq!(closed.lifetime, Scoped);
        assert!(resolver
            .constructor(&ResolutionTarget::Constructor {
                ty: repo_int.key(),
                lifetime: Scoped
            })
            .is_some());
    }

    #[test]
    #[traced_test]
    fn test_generic_closing_grows_existing_aggregates() {
        let handler_int = TypeRef::generic("IHandler", [ty("int")]);
        let handlers = TypeRef::generic("IEnumerable", [handler_int.clone()]);
        let catalog = TypeCatalog::new()
            .with_type(class("IntHandler", []).implements(handler_int.clone()))
            .with_type(
                TypeDescriptor::class(TypeRef::generic("Audit", [TypeRef::param("T")]))
                    .constructor(ConstructorDecl::implicit())
                    .implements(TypeRef::generic("IHandler", [TypeRef::param("T")]))
                    .implements(ty("IDisposable")),
            )
            .with_type(class("Dispatcher", [param("handlers", handlers.clone())]))
            .with_type(class("Auditor", [param("audit", TypeRef::generic("Audit", [ty("int")]))]));

        let mut resolver = DependencyResolver::new(&catalog);
        let int_handler = resolver.declare(Declaration::singleton(handler_int.clone()).implemented_by(ty("IntHandler")));
        resolver.declare(Declaration::singleton(ty("Dispatcher")));
        resolver.declare(Declaration::transient(TypeRef::generic("Audit", [TypeRef::param("T")])));
        resolver.declare(Declaration::singleton(ty("Auditor")));

        let outcome = resolver.resolve_all();
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);

        let aggregate = outcome.registry.aggregate(&handler_int, None).unwrap();
        let members = outcome.registry.get(aggregate).members.clone().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0], int_handler);
        assert_eq!(
            *outcome.registry.get(members[1]).resolved_type(),
            TypeRef::generic("Audit", [ty("int")])
        );
        assert!(outcome.registry.lookup(&ty("IDisposable")).is_empty());
    }

    #[test]
    #[traced_test]
    fn test_aggregate_closes_open_registrations_next_to_closed_ones() {
        let handler = |arg: TypeRef| TypeRef::generic("IHandler", [arg]);
        let sequence = |arg: TypeRef| TypeRef::generic("IEnumerable", [handler(arg)]);
        let audit_t = TypeRef::generic("Audit", [TypeRef::param("T")]);
        let catalog = TypeCatalog::new()
            .with_type(class("IntHandler", []).implements(handler(ty("int"))))
            .with_type(
                TypeDescriptor::class(audit_t.clone())
                    .constructor(ConstructorDecl::implicit())
                    .implements(handler(TypeRef::param("T"))),
            )
            .with_type(class("IntDispatcher", [param("handlers", sequence(ty("int")))]))
            .with_type(class("TextDispatcher", [param("handlers", sequence(ty("string")))]));

        let mut resolver = DependencyResolver::new(&catalog);
        let int_handler = resolver.declare(Declaration::singleton(handler(ty("int"))).implemented_by(ty("IntHandler")));
        resolver.declare(Declaration::transient(handler(TypeRef::param("T"))).implemented_by(audit_t));
        resolver.declare(Declaration::singleton(ty("IntDispatcher")));
        resolver.declare(Declaration::singleton(ty("TextDispatcher")));

        let outcome = resolver.resolve_all();
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);

        let members_of = |arg: TypeRef| {
            let aggregate = outcome.registry.aggregate(&handler(arg), None).unwrap();
            outcome
                .registry
                .get(aggregate)
                .members
                .clone()
                .unwrap()
                .into_iter()
                .map(|id| outcome.registry.get(id).resolved_type().clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(
            members_of(ty("int")),
            [ty("IntHandler"), TypeRef::generic("Audit", [ty("int")])]
        );
        assert_eq!(members_of(ty("string")), [TypeRef::generic("Audit", [ty("string")])]);
        assert_eq!(outcome.registry.get(int_handler).ordinal, 0);
        // Both the declared and the closed registration answer a single lookup now
        assert_eq!(outcome.registry.lookup(&handler(ty("int"))).iter().filter(|id| !outcome.registry.get(**id).is_aggregate()).count(), 2);
    }

    #[test]
    #[traced_test]
    fn test_alias_prefers_identically_keyed_concrete_registration() {
        let service = ty("IService");
        let catalog = TypeCatalog::new().with_type(class("Impl", []));

        let mut resolver = DependencyResolver::new(&catalog);
        let alias = resolver.declare(Declaration::singleton(service.clone()).implemented_by(ty("Impl")));
        assert_eq!(resolver.resolve(&service, None, Singleton).lookup, Lookup::Found(alias));

        let concrete = resolver.declare(Declaration::transient(ty("Impl")));
        assert_eq!(resolver.resolve(&service, None, Singleton).lookup, Lookup::Found(concrete));
    }

    #[test]
    #[traced_test]
    fn test_structural_errors() {
        let catalog = TypeCatalog::new()
            .with_type(
                TypeDescriptor::class(ty("TwoCtors"))
                    .constructor(ConstructorDecl::public([]))
                    .constructor(ConstructorDecl::public([param("x", ty("int"))])),
            )
            .with_type(TypeDescriptor::interface(ty("IAbstract")))
            .with_type(class("Widget", []));

        let mut resolver = DependencyResolver::new(&catalog);
        resolver.declare(Declaration::singleton(ty("TwoCtors")));
        resolver.declare(Declaration::singleton(ty("IAbstract")));
        resolver.declare(
            Declaration::singleton(ty("Widget")).constructed_by(Construction::Factory(FactoryMethod::new("MakeGadget", ty("Gadget"), []))),
        );
        resolver.declare(Declaration::singleton(ty("Widget")).constructed_by(Construction::member("widget")));

        let errors = resolver.resolve_all().errors;
        assert_eq!(
            errors,
            vec![
                ResolveErrorKind::AmbiguousConstructors {
                    ty: ty("TwoCtors"),
                    count: 2
                },
                ResolveErrorKind::NotConstructible { ty: ty("IAbstract") },
                ResolveErrorKind::FactoryReturnMismatch {
                    factory: "MakeGadget".into(),
                    expected: ty("Widget"),
                    actual: ty("Gadget"),
                },
            ]
        );
    }

    #[test]
    #[traced_test]
    fn test_generic_factory_is_specialized() {
        let repo_t = TypeRef::generic("Repo", [TypeRef::param("T")]);
        let repo_int = TypeRef::generic("Repo", [ty("int")]);
        let catalog = TypeCatalog::new()
            .with_type(class("Options", []))
            .with_type(TypeDescriptor::class(repo_t.clone()));
        let factory = FactoryMethod::new(
            "CreateRepo",
            repo_t.clone(),
            [
                param("options", ty("Options")),
                param("seed", TypeRef::generic("IEnumerable", [TypeRef::param("T")])),
            ],
        )
        .generic(["T"]);

        let mut resolver = DependencyResolver::new(&catalog);
        resolver.declare(Declaration::singleton(ty("Options")));
        resolver.declare(Declaration::singleton(repo_t).constructed_by(Construction::Factory(factory)));

        let Lookup::Found(closed) = resolver.resolve(&repo_int, None, Singleton).lookup else {
            panic!("not closed");
        };
        let resolution = resolver.constructor(&ResolutionTarget::Factory(closed)).unwrap();
        assert_eq!(
            resolution.source,
            ConstructorSource::Factory {
                name: "CreateRepo".into()
            }
        );
        assert_eq!(
            resolution.parameters[1].parameter_type,
            TypeRef::generic("IEnumerable", [ty("int")])
        );
        assert!(resolution.is_complete());
    }

    #[test]
    #[traced_test]
    fn test_optional_parameters_and_batching() {
        let catalog = TypeCatalog::new().with_type(class(
            "Service",
            [
                param("logger", ty("ILogger")).nullable(),
                param("retries", ty("int")).with_default(DefaultValue::Int(3)),
                param("clock", TypeRef::generic("Nullable", [ty("Clock")])),
                param("remote", ty("IRemote")).dynamic(),
                param("store", ty("IStore")),
                param("cache", ty("ICache")).keyed("fast"),
                param("plugins", TypeRef::generic("IEnumerable", [ty("IPlugin")])).non_empty(),
            ],
        ));

        let mut resolver = DependencyResolver::new(&catalog);
        resolver.declare(Declaration::scoped(ty("Service")));
        let outcome = resolver.resolve_all();

        let resolution = &outcome.constructors[&ResolutionTarget::Constructor {
            ty: ty("Service").key(),
            lifetime: Scoped,
        }];
        assert!(resolution.parameters[2].is_nullable);
        assert_eq!(resolution.parameters[2].parameter_type, ty("Clock"));
        assert!(resolution.parameters[3].use_dynamic);

        let ResolveErrorKind::MissingDependencies { parameters, .. } = &outcome.errors[0] else {
            panic!("unexpected error {:?}", outcome.errors[0]);
        };
        let names = parameters.iter().map(|parameter| &*parameter.name).collect::<Vec<_>>();
        assert_eq!(names, ["store", "cache", "plugins"]);
        assert_eq!(parameters[2].reason, MissingReason::EmptyCollection);
    }

    #[test]
    #[traced_test]
    fn test_dynamic_registrations_tolerate_missing() {
        let catalog = TypeCatalog::new().with_type(class("Service", [param("store", ty("IStore"))]));

        let mut resolver = DependencyResolver::new(&catalog).with_dynamic_registrations(true);
        resolver.declare(Declaration::scoped(ty("Service")));
        let outcome = resolver.resolve_all();

        assert!(outcome.errors.is_empty());
        let resolution = outcome.constructors.values().next().unwrap();
        assert!(resolution.parameters[0].use_dynamic);
        assert!(resolution.parameters[0].has_no_declaration);
    }
}
