#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub(crate) mod config;
pub(crate) mod errors;
pub(crate) mod graph;
pub(crate) mod import;
pub(crate) mod oracle;
pub(crate) mod registration;
pub(crate) mod registry;
pub(crate) mod resolution;
pub(crate) mod resolver;
pub(crate) mod runtime;
pub(crate) mod types;
pub(crate) mod validator;

pub use config::ShapeConfig;
pub use errors::{
    CompileErrorKind, CycleErrorKind, Diagnostics, MissingParameter, MissingReason, ProviderErrorKind, ResolveErrorKind,
    RuntimeErrorKind,
};
pub use graph::{compile, ResolvedGraph};
pub use import::{ModuleSet, ProviderDecl};
pub use oracle::{
    specialize, ConstructorDecl, DefaultValue, ParameterDecl, TypeCatalog, TypeDescriptor, TypeKind, TypeShapeOracle, Visibility,
};
pub use registration::{Capabilities, Construction, Declaration, FactoryMethod, Lifetime, MemberRef, Registration, RegistrationId};
pub use registry::{NewRegistration, Selection, ServiceRegistry};
pub use resolution::{ConstructorResolution, ConstructorSource, ParameterResolution, ResolutionTarget};
pub use resolver::{DependencyResolver, Lookup, LookupResult, ResolveOutcome};
pub use runtime::{
    downcast, ActivatorTable, Arguments, Collection, Deferred, DynamicRegistration, DynamicSource, DynamicTable, Finalizer,
    HybridResolver, HybridScope, Instance, RuntimeConstructor, RuntimeParameter, RuntimeType,
};
pub use types::{Bindings, TypeKey, TypeRef};
pub use validator::CycleValidator;
