use alloc::{sync::Arc, vec, vec::Vec};
use parking_lot::Mutex;
use tracing::{debug, debug_span, error, info_span};

use super::{
    activator::{downcast, ActivatorTable, Arguments, Instance},
    cache::{CacheKey, InstanceCache, Resolved, SingletonCells},
    collection::Collection,
    deferred::Deferred,
    dynamic::{DynamicRegistration, DynamicSource, DynamicTable},
    finalizer::BoxedFinalizer,
};
use crate::{
    errors::RuntimeErrorKind,
    graph::ResolvedGraph,
    registration::{Construction, Lifetime, RegistrationId},
    registry::Selection,
    types::TypeRef,
};

type Constructed = (Instance, Option<BoxedFinalizer>);

pub(crate) struct ResolverInner {
    graph: ResolvedGraph,
    activators: ActivatorTable,
    dynamic: Option<DynamicTable>,
    singletons: SingletonCells,
    root: Arc<ScopeInner>,
}

pub(crate) struct ScopeInner {
    cache: Mutex<InstanceCache>,
    is_root: bool,
}

impl ScopeInner {
    fn new(is_root: bool) -> Self {
        Self {
            cache: Mutex::new(InstanceCache::default()),
            is_root,
        }
    }

    fn track(&self, ty: &TypeRef, instance: &Instance, finalizer: Option<BoxedFinalizer>) {
        if let Some(finalizer) = finalizer {
            self.cache.lock().push_resolved(Resolved {
                ty: ty.clone(),
                instance: instance.clone(),
                finalizer,
            });
            debug!("Pushed to resolved set");
        }
    }

    fn close(&self) {
        let mut resolved_set = self.cache.lock().take_resolved_set();
        while let Some(Resolved { ty, instance, finalizer }) = resolved_set.0.pop_back() {
            finalizer(instance);
            debug!(%ty, "Finalizer called");
        }
        self.cache.lock().clear();
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.close();
        debug!(root = self.is_root, "Scope closed on drop");
    }
}

/// Runtime resolver over a compiled graph and, when the provider opted in, a dynamic registration table.
///
/// Statically owned services are built from their constructor resolutions.
/// Everything else is looked up in the dynamic table with the same matching rules.
/// The resolver itself acts as the root scope.
#[derive(Clone)]
pub struct HybridResolver {
    pub(crate) inner: Arc<ResolverInner>,
}

impl HybridResolver {
    /// # Errors
    /// Returns [`RuntimeErrorKind::DynamicRegistrationsDisabled`] if the provider didn't opt into dynamic registrations
    pub fn new(graph: ResolvedGraph, activators: ActivatorTable, dynamic: DynamicTable) -> Result<Self, RuntimeErrorKind> {
        if !graph.dynamic_registrations() {
            let err = RuntimeErrorKind::DynamicRegistrationsDisabled;
            error!("{}", err);
            return Err(err);
        }
        Ok(Self::build(graph, activators, Some(dynamic)))
    }

    #[must_use]
    pub fn from_graph(graph: ResolvedGraph, activators: ActivatorTable) -> Self {
        Self::build(graph, activators, None)
    }

    fn build(graph: ResolvedGraph, activators: ActivatorTable, dynamic: Option<DynamicTable>) -> Self {
        debug!(
            provider = graph.provider(),
            dynamic = dynamic.as_ref().map_or(0, DynamicTable::len),
            "Hybrid resolver created"
        );
        Self {
            inner: Arc::new(ResolverInner {
                graph,
                activators,
                dynamic,
                singletons: SingletonCells::default(),
                root: Arc::new(ScopeInner::new(true)),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn graph(&self) -> &ResolvedGraph {
        &self.inner.graph
    }

    /// Root scope, sharing the resolver's caches
    #[inline]
    #[must_use]
    pub fn root(&self) -> HybridScope {
        HybridScope {
            resolver: self.clone(),
            scope: self.inner.root.clone(),
        }
    }

    #[inline]
    #[must_use]
    pub fn create_scope(&self) -> HybridScope {
        debug!("Scope created");
        HybridScope {
            resolver: self.clone(),
            scope: Arc::new(ScopeInner::new(false)),
        }
    }

    /// Absent services resolve to `None`
    #[inline]
    pub fn get(&self, ty: &TypeRef) -> Result<Option<Instance>, RuntimeErrorKind> {
        self.root().get(ty)
    }

    #[inline]
    pub fn get_required(&self, ty: &TypeRef) -> Result<Instance, RuntimeErrorKind> {
        self.root().get_required(ty)
    }

    #[inline]
    pub fn get_keyed(&self, ty: &TypeRef, key: &str) -> Result<Instance, RuntimeErrorKind> {
        self.root().get_keyed(ty, key)
    }

    #[inline]
    pub fn try_get_keyed(&self, ty: &TypeRef, key: &str) -> Result<Option<Instance>, RuntimeErrorKind> {
        self.root().try_get_keyed(ty, key)
    }

    #[inline]
    pub fn get_as<T: Send + Sync + 'static>(&self, ty: &TypeRef) -> Result<Arc<T>, RuntimeErrorKind> {
        self.root().get_as(ty)
    }

    /// Closes the root scope, calling finalizers of singletons and root-owned instances in LIFO order.
    ///
    /// # Warning
    /// This method can be called multiple times, but it will only call finalizers for instances that were resolved since the last call
    pub fn close(&self) {
        self.inner.root.close();
        self.inner.singletons.clear();
        debug!("Root scope closed");
    }
}

impl HybridResolver {
    pub(crate) fn require(
        &self,
        scope: &Arc<ScopeInner>,
        ty: &TypeRef,
        key: Option<&str>,
        path: &mut Vec<TypeRef>,
    ) -> Result<Instance, RuntimeErrorKind> {
        if let Some(instance) = self.resolve(scope, ty, key, path)? {
            return Ok(instance);
        }

        let err = match key {
            Some(key) => RuntimeErrorKind::KeyedNotFound {
                ty: ty.clone(),
                key: key.into(),
            },
            None => RuntimeErrorKind::NotFound { ty: ty.clone() },
        };
        error!("{}", err);
        Err(err)
    }

    fn resolve(
        &self,
        scope: &Arc<ScopeInner>,
        ty: &TypeRef,
        key: Option<&str>,
        path: &mut Vec<TypeRef>,
    ) -> Result<Option<Instance>, RuntimeErrorKind> {
        let span = debug_span!("resolve", dependency = %ty, ?key);
        let _guard = span.enter();

        let graph = &self.inner.graph;
        match graph.registry().select(ty, key) {
            Selection::Single(id) => {
                debug!("Found in static graph");
                return self.build_static(scope, graph.registry().concretize(id), path).map(Some);
            }
            Selection::Ambiguous(ids) => return Err(ambiguous(ty, ids.len())),
            Selection::None => {}
        }

        let shapes = graph.shapes();
        if let Some(elem) = shapes.collection_element(ty) {
            let members = self.static_members(&elem, key);
            return self.collect(scope, &elem, key, &members, path).map(Some);
        }

        if let Some(inner) = shapes.deferred_inner(ty) {
            if !self.can_resolve(&inner, key) {
                debug!("Deferred service not found");
                return Ok(None);
            }
            let deferred: Instance = Arc::new(Deferred::new(&self.inner, scope, inner, key.map(Into::into)));
            return Ok(Some(deferred));
        }

        if let Some(dynamic) = &self.inner.dynamic {
            for candidates in [dynamic.exact(ty, key, false), dynamic.open(ty, key, false)] {
                match candidates.as_slice() {
                    [] => {}
                    [index] => {
                        debug!("Found in dynamic table");
                        return self.build_dynamic(scope, *index, ty, path).map(Some);
                    }
                    _ => return Err(ambiguous(ty, candidates.len())),
                }
            }
        }

        debug!("Not found");
        Ok(None)
    }

    /// Whether `resolve` would produce an instance, without constructing anything
    fn can_resolve(&self, ty: &TypeRef, key: Option<&str>) -> bool {
        let graph = &self.inner.graph;
        match graph.registry().select(ty, key) {
            Selection::Single(_) => return true,
            Selection::Ambiguous(_) => return false,
            Selection::None => {}
        }

        let shapes = graph.shapes();
        if shapes.collection_element(ty).is_some() {
            return true;
        }
        if let Some(inner) = shapes.deferred_inner(ty) {
            return self.can_resolve(&inner, key);
        }

        self.inner.dynamic.as_ref().is_some_and(|dynamic| {
            match (dynamic.exact(ty, key, false).len(), dynamic.open(ty, key, false).len()) {
                (1, _) | (0, 1) => true,
                _ => false,
            }
        })
    }

    /// Static members of the collection of `elem`, the compiled aggregate if there is one
    fn static_members(&self, elem: &TypeRef, key: Option<&str>) -> Vec<RegistrationId> {
        let registry = self.inner.graph.registry();
        if let Some(aggregate) = registry.aggregate(elem, key) {
            return registry.get(aggregate).members.clone().unwrap_or_default();
        }

        let mut members = Vec::new();
        for id in registry.lookup(elem) {
            let registration = registry.get(*id);
            if registration.is_aggregate() || registration.is_open_generic() || (key.is_some() && !registration.matches_key(key)) {
                continue;
            }
            let member = registry.concretize(*id);
            if !members.contains(&member) {
                members.push(member);
            }
        }
        members
    }

    fn collect(
        &self,
        scope: &Arc<ScopeInner>,
        elem: &TypeRef,
        key: Option<&str>,
        members: &[RegistrationId],
        path: &mut Vec<TypeRef>,
    ) -> Result<Instance, RuntimeErrorKind> {
        let mut items = Vec::with_capacity(members.len());
        for member in members {
            items.push(self.build_static(scope, *member, path)?);
        }

        if let Some(dynamic) = &self.inner.dynamic {
            let any_key = key.is_none();
            for index in dynamic.exact(elem, key, any_key).into_iter().chain(dynamic.open(elem, key, any_key)) {
                items.push(self.build_dynamic(scope, index, elem, path)?);
            }
        }
        debug!(elem = %elem, members = items.len(), "Collection resolved");

        Ok(Arc::new(Collection::new(elem.clone(), items)))
    }

    fn build_static(&self, scope: &Arc<ScopeInner>, id: RegistrationId, path: &mut Vec<TypeRef>) -> Result<Instance, RuntimeErrorKind> {
        let graph = &self.inner.graph;
        let registration = graph.registration(id);

        if let Some(members) = &registration.members {
            let elem = graph
                .shapes()
                .collection_element(&registration.service_type)
                .unwrap_or_else(|| registration.service_type.clone());
            return self.collect(scope, &elem, registration.key.as_deref(), members, path);
        }

        let ty = registration.resolved_type();
        enter(ty, path)?;
        let result = self.with_lifetime(scope, registration.lifetime, CacheKey::Static(id), ty, path, |owner, path| {
            self.construct_static(owner, id, path)
        });
        path.pop();
        result
    }

    fn build_dynamic(
        &self,
        scope: &Arc<ScopeInner>,
        index: usize,
        requested: &TypeRef,
        path: &mut Vec<TypeRef>,
    ) -> Result<Instance, RuntimeErrorKind> {
        let Some(registration) = self.inner.dynamic.as_ref().and_then(|dynamic| dynamic.get(index)) else {
            let err = RuntimeErrorKind::NotFound { ty: requested.clone() };
            error!("{}", err);
            return Err(err);
        };
        if let DynamicSource::Instance(instance) = &registration.source {
            return Ok(instance.clone());
        }

        let ty = registration
            .implementation_for(requested)
            .unwrap_or_else(|| requested.clone());
        enter(&ty, path)?;
        let cache_key = CacheKey::Dynamic {
            index,
            ty: requested.clone(),
        };
        let result = self.with_lifetime(scope, registration.lifetime, cache_key, &ty, path, |owner, path| {
            self.construct_dynamic(owner, registration, &ty, path)
        });
        path.pop();
        result
    }

    fn with_lifetime<F>(
        &self,
        scope: &Arc<ScopeInner>,
        lifetime: Lifetime,
        cache_key: CacheKey,
        ty: &TypeRef,
        path: &mut Vec<TypeRef>,
        construct: F,
    ) -> Result<Instance, RuntimeErrorKind>
    where
        F: FnOnce(&Arc<ScopeInner>, &mut Vec<TypeRef>) -> Result<Constructed, RuntimeErrorKind>,
    {
        match lifetime {
            Lifetime::Singleton => {
                let cell = self.inner.singletons.cell(&cache_key);
                if let Some(instance) = cell.get() {
                    debug!("Found in cache");
                    return Ok(instance.clone());
                }
                debug!("Not found in cache");

                // Requested again from inside its own construction, through a deferred handle or a factory
                if self.inner.singletons.is_initializing(&cache_key) {
                    let mut cycle = vec![ty.clone()];
                    cycle.extend(path.iter().cloned());
                    let err = RuntimeErrorKind::CircularDependency { path: cycle };
                    error!("{}", err);
                    return Err(err);
                }

                let root = &self.inner.root;
                cell.get_or_try_init(|| -> Result<Instance, RuntimeErrorKind> {
                    let _initializing = self.inner.singletons.begin(&cache_key);
                    let (instance, finalizer) = construct(root, path)?;
                    root.track(ty, &instance, finalizer);
                    debug!("Cached");
                    Ok(instance)
                })
                .cloned()
            }
            Lifetime::Scoped => {
                if let Some(instance) = scope.cache.lock().get(&cache_key) {
                    debug!("Found in cache");
                    return Ok(instance);
                }
                debug!("Not found in cache");

                let (instance, finalizer) = construct(scope, path)?;
                let (instance, published) = scope.cache.lock().publish(cache_key, instance);
                if published {
                    scope.track(ty, &instance, finalizer);
                    debug!("Cached");
                } else {
                    debug!("Another instance was published first");
                }
                Ok(instance)
            }
            Lifetime::Transient => {
                let (instance, finalizer) = construct(scope, path)?;
                scope.track(ty, &instance, finalizer);
                Ok(instance)
            }
        }
    }

    fn construct_static(&self, owner: &Arc<ScopeInner>, id: RegistrationId, path: &mut Vec<TypeRef>) -> Result<Constructed, RuntimeErrorKind> {
        let activators = &self.inner.activators;
        let registration = self.inner.graph.registration(id);
        let ty = registration.resolved_type();

        let instance = match &registration.construction {
            Construction::Member(member) => {
                let Some(activate) = activators.member(&member.name) else {
                    return Err(no_named_activator(&member.name));
                };
                activate(&Arguments::new(ty.clone(), Vec::new()))?
            }
            Construction::Factory(factory) => {
                let Some(activate) = activators.factory(&factory.name) else {
                    return Err(no_named_activator(&factory.name));
                };
                let arguments = self.static_arguments(owner, id, path)?;
                activate(&arguments)?
            }
            Construction::Constructor => {
                let Some(runtime_type) = activators.runtime_type(ty) else {
                    let err = RuntimeErrorKind::NoActivator { ty: ty.clone() };
                    error!("{}", err);
                    return Err(err);
                };
                let arguments = self.static_arguments(owner, id, path)?;
                let Some(constructor) = runtime_type
                    .constructors_for(ty)
                    .into_iter()
                    .find(|constructor| constructor.parameters.len() == arguments.len())
                else {
                    return Err(no_usable_constructor(ty));
                };
                constructor.invoke(&arguments)?
            }
        };
        debug!(%ty, "Constructed");

        Ok((instance, activators.finalizer(ty)))
    }

    /// Arguments of a statically resolved constructor. Deferred edges become [`Deferred`] handles,
    /// parameters left to the dynamic table are asked of the whole resolver.
    fn static_arguments(&self, owner: &Arc<ScopeInner>, id: RegistrationId, path: &mut Vec<TypeRef>) -> Result<Arguments, RuntimeErrorKind> {
        let graph = &self.inner.graph;
        let Some(resolution) = graph.constructor_for(id) else {
            return Err(no_usable_constructor(graph.registration(id).resolved_type()));
        };

        let mut values = Vec::with_capacity(resolution.parameters.len());
        for parameter in &resolution.parameters {
            let key = parameter.key.as_deref();
            let value = if parameter.is_lazy && (parameter.is_resolved() || parameter.use_dynamic) {
                let inner = graph
                    .shapes()
                    .deferred_inner(&parameter.parameter_type)
                    .unwrap_or_else(|| parameter.parameter_type.clone());
                let deferred: Instance = Arc::new(Deferred::new(&self.inner, owner, inner, parameter.key.clone()));
                Some(deferred)
            } else if let Some(selected) = parameter.selected_service {
                Some(self.build_static(owner, selected, path)?)
            } else if parameter.use_dynamic {
                self.resolve(owner, &parameter.parameter_type, key, path)?
            } else {
                None
            };
            values.push(value);
        }
        Ok(Arguments::new(resolution.ty.clone(), values))
    }

    fn construct_dynamic(
        &self,
        owner: &Arc<ScopeInner>,
        registration: &DynamicRegistration,
        ty: &TypeRef,
        path: &mut Vec<TypeRef>,
    ) -> Result<Constructed, RuntimeErrorKind> {
        let activators = &self.inner.activators;
        match &registration.source {
            DynamicSource::Instance(instance) => Ok((instance.clone(), None)),
            DynamicSource::Factory(factory) => {
                let scope = HybridScope {
                    resolver: self.clone(),
                    scope: owner.clone(),
                };
                let instance = factory(&scope)?;
                Ok((instance, activators.finalizer(ty)))
            }
            DynamicSource::Type(_) => {
                let Some(runtime_type) = activators.runtime_type(ty) else {
                    let err = RuntimeErrorKind::NoActivator { ty: ty.clone() };
                    error!("{}", err);
                    return Err(err);
                };

                // Most parameters first, the zero-argument constructor is the last resort
                let mut constructors = runtime_type.constructors_for(ty);
                constructors.sort_by(|a, b| b.parameters.len().cmp(&a.parameters.len()));
                let Some(constructor) = constructors.iter().find(|constructor| {
                    constructor
                        .parameters
                        .iter()
                        .all(|parameter| parameter.has_default || self.can_resolve(&parameter.ty, parameter.key.as_deref()))
                }) else {
                    return Err(no_usable_constructor(ty));
                };

                let mut values = Vec::with_capacity(constructor.parameters.len());
                for parameter in &constructor.parameters {
                    values.push(self.resolve(owner, &parameter.ty, parameter.key.as_deref(), path)?);
                }
                let instance = constructor.invoke(&Arguments::new(ty.clone(), values))?;
                debug!(%ty, "Constructed");

                Ok((instance, runtime_type.finalizer.clone()))
            }
        }
    }
}

/// Guards against re-entering a service already being constructed on this path
fn enter(ty: &TypeRef, path: &mut Vec<TypeRef>) -> Result<(), RuntimeErrorKind> {
    if let Some(start) = path.iter().position(|on_path| on_path == ty) {
        let mut cycle = path.split_at(start).1.to_vec();
        cycle.push(ty.clone());

        let err = RuntimeErrorKind::CircularDependency { path: cycle };
        error!("{}", err);
        return Err(err);
    }
    path.push(ty.clone());
    Ok(())
}

fn ambiguous(ty: &TypeRef, count: usize) -> RuntimeErrorKind {
    let err = RuntimeErrorKind::Ambiguous { ty: ty.clone(), count };
    error!("{}", err);
    err
}

fn no_named_activator(name: &Arc<str>) -> RuntimeErrorKind {
    let err = RuntimeErrorKind::NoNamedActivator { name: name.clone() };
    error!("{}", err);
    err
}

fn no_usable_constructor(ty: &TypeRef) -> RuntimeErrorKind {
    let err = RuntimeErrorKind::NoUsableConstructor { ty: ty.clone() };
    error!("{}", err);
    err
}

/// Unit of work owning scoped instances. Dropping the last handle closes it.
#[derive(Clone)]
pub struct HybridScope {
    resolver: HybridResolver,
    scope: Arc<ScopeInner>,
}

impl HybridScope {
    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &HybridResolver {
        &self.resolver
    }

    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.scope.is_root
    }

    /// Absent services resolve to `None`
    pub fn get(&self, ty: &TypeRef) -> Result<Option<Instance>, RuntimeErrorKind> {
        let span = info_span!("get", dependency = %ty, root = self.scope.is_root);
        let _guard = span.enter();

        self.resolver.resolve(&self.scope, ty, None, &mut Vec::new())
    }

    pub fn get_required(&self, ty: &TypeRef) -> Result<Instance, RuntimeErrorKind> {
        let span = info_span!("get_required", dependency = %ty, root = self.scope.is_root);
        let _guard = span.enter();

        self.resolver.require(&self.scope, ty, None, &mut Vec::new())
    }

    /// A keyed service that can't be found is an error
    pub fn get_keyed(&self, ty: &TypeRef, key: &str) -> Result<Instance, RuntimeErrorKind> {
        let span = info_span!("get_keyed", dependency = %ty, key, root = self.scope.is_root);
        let _guard = span.enter();

        self.resolver.require(&self.scope, ty, Some(key), &mut Vec::new())
    }

    pub fn try_get_keyed(&self, ty: &TypeRef, key: &str) -> Result<Option<Instance>, RuntimeErrorKind> {
        let span = info_span!("try_get_keyed", dependency = %ty, key, root = self.scope.is_root);
        let _guard = span.enter();

        self.resolver.resolve(&self.scope, ty, Some(key), &mut Vec::new())
    }

    pub fn get_as<T: Send + Sync + 'static>(&self, ty: &TypeRef) -> Result<Arc<T>, RuntimeErrorKind> {
        downcast(self.get_required(ty)?)
    }

    /// Calls finalizers of instances owned by this scope in LIFO order and clears its cache.
    /// Closing the root scope also drops the singletons.
    pub fn close(&self) {
        if self.scope.is_root {
            self.resolver.close();
        } else {
            self.scope.close();
            debug!("Scope closed");
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::HybridResolver;
    use crate::{
        errors::RuntimeErrorKind,
        graph::compile,
        import::{ModuleSet, ProviderDecl},
        oracle::{ConstructorDecl, ParameterDecl, TypeCatalog, TypeDescriptor},
        registration::Declaration,
        runtime::{
            activator::{ActivatorTable, RuntimeConstructor, RuntimeParameter, RuntimeType},
            deferred::Deferred,
            dynamic::{DynamicRegistration, DynamicTable},
        },
        types::TypeRef,
    };

    use alloc::{sync::Arc, vec::Vec};
    use core::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use parking_lot::Mutex;
    use std::{sync::Barrier, thread};
    use tracing_test::traced_test;

    fn ty(name: &str) -> TypeRef {
        TypeRef::named(name)
    }

    struct Counter(usize);

    fn counting(name: &'static str, created: &Arc<AtomicUsize>) -> RuntimeType {
        let created = created.clone();
        RuntimeType::new(ty(name)).constructor(RuntimeConstructor::new([], move |_| {
            Ok(Counter(created.fetch_add(1, Ordering::SeqCst)))
        }))
    }

    fn resolver(provider: ProviderDecl, catalog: &TypeCatalog, activators: ActivatorTable) -> HybridResolver {
        let graph = compile(&provider, &ModuleSet::new(), catalog).unwrap();
        HybridResolver::from_graph(graph, activators)
    }

    #[test]
    #[traced_test]
    fn test_lifetimes() {
        let catalog = TypeCatalog::new()
            .with_type(TypeDescriptor::class(ty("Single")).constructor(ConstructorDecl::implicit()))
            .with_type(TypeDescriptor::class(ty("PerScope")).constructor(ConstructorDecl::implicit()))
            .with_type(TypeDescriptor::class(ty("Each")).constructor(ConstructorDecl::implicit()));
        let created = Arc::new(AtomicUsize::new(0));
        let activators = ActivatorTable::new()
            .with_type(counting("Single", &created))
            .with_type(counting("PerScope", &created))
            .with_type(counting("Each", &created));
        let provider = ProviderDecl::new("App")
            .declare(Declaration::singleton(ty("Single")))
            .declare(Declaration::scoped(ty("PerScope")))
            .declare(Declaration::transient(ty("Each")));

        let resolver = resolver(provider, &catalog, activators);
        let first = resolver.create_scope();
        let second = resolver.create_scope();

        let single = first.get_as::<Counter>(&ty("Single")).unwrap();
        assert!(Arc::ptr_eq(&single, &second.get_as::<Counter>(&ty("Single")).unwrap()));

        let scoped = first.get_as::<Counter>(&ty("PerScope")).unwrap();
        assert!(Arc::ptr_eq(&scoped, &first.get_as::<Counter>(&ty("PerScope")).unwrap()));
        assert!(!Arc::ptr_eq(&scoped, &second.get_as::<Counter>(&ty("PerScope")).unwrap()));

        let each = first.get_as::<Counter>(&ty("Each")).unwrap();
        assert!(!Arc::ptr_eq(&each, &first.get_as::<Counter>(&ty("Each")).unwrap()));

        // One singleton, two scoped, two transients
        assert_eq!(created.load(Ordering::SeqCst), 5);
    }

    #[test]
    #[traced_test]
    fn test_finalizers_run_lifo() {
        let catalog = TypeCatalog::new()
            .with_type(TypeDescriptor::class(ty("Db")).constructor(ConstructorDecl::implicit()))
            .with_type(
                TypeDescriptor::class(ty("Session")).constructor(ConstructorDecl::public([ParameterDecl::new("db", ty("Db"))])),
            );
        let finalized = Arc::new(Mutex::new(Vec::new()));
        let activators = ActivatorTable::new()
            .with_type(
                RuntimeType::new(ty("Db"))
                    .constructor(RuntimeConstructor::new([], |_| Ok("db")))
                    .finalizer({
                        let finalized = finalized.clone();
                        move |db: Arc<&'static str>| finalized.lock().push(*db)
                    }),
            )
            .with_type(
                RuntimeType::new(ty("Session"))
                    .constructor(RuntimeConstructor::new([RuntimeParameter::new(ty("Db"))], |arguments| {
                        arguments.get::<&'static str>(0)?;
                        Ok("session")
                    }))
                    .finalizer({
                        let finalized = finalized.clone();
                        move |session: Arc<&'static str>| finalized.lock().push(*session)
                    }),
            );
        let provider = ProviderDecl::new("App")
            .declare(Declaration::scoped(ty("Db")))
            .declare(Declaration::scoped(ty("Session")));

        let resolver = resolver(provider, &catalog, activators);
        let scope = resolver.create_scope();
        scope.get_required(&ty("Session")).unwrap();
        scope.close();
        assert_eq!(*finalized.lock(), ["session", "db"]);

        scope.close();
        assert_eq!(finalized.lock().len(), 2);

        {
            let scope = resolver.create_scope();
            scope.get_required(&ty("Db")).unwrap();
        }
        assert_eq!(finalized.lock().len(), 3);
    }

    #[test]
    #[traced_test]
    fn test_dynamic_requires_opt_in() {
        let graph = compile(&ProviderDecl::new("App"), &ModuleSet::new(), &TypeCatalog::new()).unwrap();
        assert!(matches!(
            HybridResolver::new(graph, ActivatorTable::new(), DynamicTable::new()),
            Err(RuntimeErrorKind::DynamicRegistrationsDisabled)
        ));
    }

    #[test]
    #[traced_test]
    fn test_dynamic_constructor_selection() {
        let graph = compile(&ProviderDecl::new("App").dynamic(), &ModuleSet::new(), &TypeCatalog::new()).unwrap();
        let activators = ActivatorTable::new()
            .with_type(RuntimeType::new(ty("Clock")).constructor(RuntimeConstructor::new([], |_| Ok(0_u32))))
            .with_type(
                RuntimeType::new(ty("Service"))
                    .constructor(RuntimeConstructor::new([], |_| Ok("empty")))
                    .constructor(RuntimeConstructor::new(
                        [RuntimeParameter::new(ty("IClock")), RuntimeParameter::new(ty("IMissing"))],
                        |_| Ok("both"),
                    ))
                    .constructor(RuntimeConstructor::new(
                        [
                            RuntimeParameter::new(ty("IClock")),
                            RuntimeParameter::new(ty("IMissing")).with_default(),
                            RuntimeParameter::new(ty("IOther")).with_default(),
                        ],
                        |arguments| {
                            assert!(arguments.optional::<u32>(1)?.is_none());
                            Ok("defaults")
                        },
                    )),
            );
        let dynamic = DynamicTable::new()
            .with(DynamicRegistration::singleton(ty("IClock")).implemented_by(ty("Clock")))
            .with(DynamicRegistration::transient(ty("Service")));

        let resolver = HybridResolver::new(graph, activators, dynamic).unwrap();
        assert_eq!(*resolver.get_as::<&'static str>(&ty("Service")).unwrap(), "defaults");
        assert!(resolver.get(&ty("IMissing")).unwrap().is_none());
        assert!(matches!(
            resolver.get_required(&ty("IMissing")),
            Err(RuntimeErrorKind::NotFound { .. })
        ));
    }

    #[test]
    #[traced_test]
    fn test_runtime_cycle_guard() {
        let graph = compile(&ProviderDecl::new("App").dynamic(), &ModuleSet::new(), &TypeCatalog::new()).unwrap();
        let activators = ActivatorTable::new()
            .with_type(
                RuntimeType::new(ty("A")).constructor(RuntimeConstructor::new([RuntimeParameter::new(ty("B"))], |_| Ok(()))),
            )
            .with_type(
                RuntimeType::new(ty("B")).constructor(RuntimeConstructor::new([RuntimeParameter::new(ty("A"))], |_| Ok(()))),
            );
        let dynamic = DynamicTable::new()
            .with(DynamicRegistration::singleton(ty("A")))
            .with(DynamicRegistration::singleton(ty("B")));

        let resolver = HybridResolver::new(graph, activators, dynamic).unwrap();
        let Err(RuntimeErrorKind::CircularDependency { path }) = resolver.get(&ty("A")) else {
            panic!("cycle not detected");
        };
        assert_eq!(path, [ty("A"), ty("B"), ty("A")]);
    }

    #[test]
    #[traced_test]
    fn test_singleton_requested_from_its_own_construction() {
        let lazy_b = TypeRef::generic("Lazy", [ty("B")]);
        let catalog = TypeCatalog::new()
            .with_type(TypeDescriptor::class(ty("A")).constructor(ConstructorDecl::public([ParameterDecl::new("b", lazy_b.clone())])))
            .with_type(TypeDescriptor::class(ty("B")).constructor(ConstructorDecl::public([ParameterDecl::new("a", ty("A"))])));
        let activators = ActivatorTable::new()
            .with_type(
                RuntimeType::new(ty("A")).constructor(RuntimeConstructor::new([RuntimeParameter::new(lazy_b)], |arguments| {
                    // Forces the deferred edge while A is still being built
                    arguments.get::<Deferred>(0)?.get()?;
                    Ok("a")
                })),
            )
            .with_type(
                RuntimeType::new(ty("B")).constructor(RuntimeConstructor::new([RuntimeParameter::new(ty("A"))], |arguments| {
                    arguments.get::<&'static str>(0)?;
                    Ok("b")
                })),
            );
        let provider = ProviderDecl::new("App")
            .declare(Declaration::singleton(ty("A")))
            .declare(Declaration::singleton(ty("B")));

        let resolver = resolver(provider, &catalog, activators);
        let Err(RuntimeErrorKind::CircularDependency { path }) = resolver.get(&ty("A")) else {
            panic!("re-entered singleton not reported");
        };
        assert_eq!(path, [ty("A"), ty("B"), ty("A")]);

        // Nothing was left marked as under construction
        let Err(RuntimeErrorKind::CircularDependency { .. }) = resolver.get(&ty("A")) else {
            panic!("second request behaved differently");
        };
    }

    #[test]
    #[traced_test]
    fn test_singleton_factory_requesting_itself() {
        let graph = compile(&ProviderDecl::new("App").dynamic(), &ModuleSet::new(), &TypeCatalog::new()).unwrap();
        let dynamic = DynamicTable::new().with(
            DynamicRegistration::singleton(ty("Config")).factory(|scope| Ok(*scope.get_as::<u32>(&ty("Config"))? + 1)),
        );

        let resolver = HybridResolver::new(graph, ActivatorTable::new(), dynamic).unwrap();
        let Err(RuntimeErrorKind::CircularDependency { path }) = resolver.get(&ty("Config")) else {
            panic!("re-entered factory not reported");
        };
        assert_eq!(path, [ty("Config"), ty("Config")]);
    }

    #[test]
    #[traced_test]
    fn test_singleton_built_once_across_threads() {
        const THREADS: usize = 8;

        let catalog = TypeCatalog::new().with_type(TypeDescriptor::class(ty("Pool")).constructor(ConstructorDecl::implicit()));
        let created = Arc::new(AtomicUsize::new(0));
        let activators = ActivatorTable::new().with_type(RuntimeType::new(ty("Pool")).constructor(RuntimeConstructor::new([], {
            let created = created.clone();
            move |_| {
                // Keeps the other threads waiting on the slot
                thread::sleep(Duration::from_millis(20));
                Ok(Counter(created.fetch_add(1, Ordering::SeqCst)))
            }
        })));
        let resolver = resolver(ProviderDecl::new("App").declare(Declaration::singleton(ty("Pool"))), &catalog, activators);

        let barrier = Arc::new(Barrier::new(THREADS));
        let handles = (0..THREADS)
            .map(|_| {
                let resolver = resolver.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    resolver.get_as::<Counter>(&ty("Pool")).unwrap()
                })
            })
            .collect::<Vec<_>>();
        let pools = handles.into_iter().map(|handle| handle.join().unwrap()).collect::<Vec<_>>();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(pools[0].0, 0);
        assert!(pools.iter().all(|pool| Arc::ptr_eq(pool, &pools[0])));
    }

    #[test]
    #[traced_test]
    fn test_activation_failure_is_not_cached() {
        let catalog = TypeCatalog::new().with_type(TypeDescriptor::class(ty("Conn")).constructor(ConstructorDecl::implicit()));
        let attempts = Arc::new(AtomicUsize::new(0));
        let activators = ActivatorTable::new().with_type(RuntimeType::new(ty("Conn")).constructor(RuntimeConstructor::new([], {
            let attempts = attempts.clone();
            move |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("connection refused"))?;
                Ok(())
            }
        })));
        let resolver = resolver(ProviderDecl::new("App").declare(Declaration::singleton(ty("Conn"))), &catalog, activators);

        for _ in 0..2 {
            let Err(RuntimeErrorKind::Activation(err)) = resolver.get(&ty("Conn")) else {
                panic!("activation error not surfaced");
            };
            assert_eq!(alloc::format!("{err}"), "connection refused");
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
