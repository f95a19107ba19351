use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use tracing::{error, info, info_span};

use crate::{
    config::ShapeConfig,
    errors::{CompileErrorKind, Diagnostics},
    import::{ModuleSet, ProviderDecl},
    oracle::TypeShapeOracle,
    registration::{Construction, Registration, RegistrationId},
    registry::ServiceRegistry,
    resolution::{ConstructorResolution, ResolutionTarget},
    resolver::DependencyResolver,
    types::{TypeKey, TypeRef},
    validator::CycleValidator,
};

/// Frozen result of compiling a provider
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    provider: Arc<str>,
    dynamic_registrations: bool,
    shapes: ShapeConfig,
    registry: ServiceRegistry,
    constructors: BTreeMap<ResolutionTarget, ConstructorResolution>,
}

impl ResolvedGraph {
    #[inline]
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[inline]
    #[must_use]
    pub fn dynamic_registrations(&self) -> bool {
        self.dynamic_registrations
    }

    /// Shape names the graph was compiled with
    #[inline]
    #[must_use]
    pub fn shapes(&self) -> &ShapeConfig {
        &self.shapes
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn registration(&self, id: RegistrationId) -> &Registration {
        self.registry.get(id)
    }

    /// Constructor resolution a registration is built from.
    /// Aggregates, member aliases and open generics have none.
    #[must_use]
    pub fn constructor_for(&self, id: RegistrationId) -> Option<&ConstructorResolution> {
        let registration = self.registry.get(id);
        let target = match &registration.construction {
            Construction::Constructor => ResolutionTarget::Constructor {
                ty: registration.resolved_type().key(),
                lifetime: registration.lifetime,
            },
            Construction::Factory(_) => ResolutionTarget::Factory(id),
            Construction::Member(_) => return None,
        };
        self.constructors.get(&target)
    }

    #[inline]
    pub fn constructors(&self) -> impl Iterator<Item = (&ResolutionTarget, &ConstructorResolution)> {
        self.constructors.iter()
    }

    /// Registrations grouped by service type, in type-key order
    pub fn groups(&self) -> impl Iterator<Item = (&TypeKey, Vec<&Registration>)> {
        self.registry
            .groups()
            .map(|(key, ids)| (key, ids.iter().map(|id| self.registry.get(*id)).collect()))
    }

    /// Registrations of a service type in insertion order
    pub fn registrations_of(&self, ty: &TypeRef) -> impl Iterator<Item = &Registration> {
        self.registry.lookup(ty).iter().map(|id| self.registry.get(*id))
    }
}

/// Compiles a provider and everything it imports.
///
/// Every failure is collected into [`Diagnostics`]. Cycle validation runs on the final graph
/// even when resolution failed, over the edges that did resolve.
pub fn compile<O>(provider: &ProviderDecl, modules: &ModuleSet, oracle: &O) -> Result<ResolvedGraph, Diagnostics>
where
    O: TypeShapeOracle + ?Sized,
{
    let span = info_span!("compile", provider = %provider.name);
    let _guard = span.enter();

    let mut diagnostics = Diagnostics::default();

    if let Err(err) = provider.check() {
        diagnostics.errors.push(err.into());
    }
    let declarations = match modules.flatten(provider) {
        Ok(declarations) => declarations,
        Err(err) => {
            diagnostics.errors.push(err.into());
            return Err(diagnostics);
        }
    };

    let mut resolver = DependencyResolver::new(oracle).with_dynamic_registrations(provider.dynamic_registrations);
    for declaration in declarations {
        resolver.declare(declaration);
    }
    let outcome = resolver.resolve_all();
    diagnostics.errors.extend(outcome.errors.into_iter().map(CompileErrorKind::from));

    // Unresolved parameters contribute no edge, so cycles among the resolved part are still reported
    if let Err(err) = CycleValidator::new(&outcome.registry, &outcome.constructors).validate() {
        diagnostics.errors.push(err.into());
    }

    if !diagnostics.is_empty() {
        error!("{}", diagnostics);
        return Err(diagnostics);
    }

    info!(
        registrations = outcome.registry.len(),
        constructors = outcome.constructors.len(),
        "Provider compiled"
    );
    Ok(ResolvedGraph {
        provider: provider.name.clone(),
        dynamic_registrations: provider.dynamic_registrations,
        shapes: oracle.shapes().clone(),
        registry: outcome.registry,
        constructors: outcome.constructors,
    })
}
