use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};

use crate::types::TypeRef;

#[derive(thiserror::Error, Debug)]
pub enum RuntimeErrorKind {
    #[error("No registration found for {ty}")]
    NotFound { ty: TypeRef },
    #[error("No registration found for {ty} with key {key:?}")]
    KeyedNotFound { ty: TypeRef, key: Arc<str> },
    #[error("{count} registrations match {ty}")]
    Ambiguous { ty: TypeRef, count: usize },
    #[error("No activator registered for {ty}")]
    NoActivator { ty: TypeRef },
    #[error("No activator registered for factory or member {name}")]
    NoNamedActivator { name: Arc<str> },
    #[error("No constructor of {ty} can be satisfied")]
    NoUsableConstructor { ty: TypeRef },
    #[error("Missing argument {index} of {ty}")]
    MissingArgument { ty: TypeRef, index: usize },
    #[error("Incorrect instance type. Expected: {expected}")]
    IncorrectType { expected: &'static str },
    #[error("Circular dependency detected: {}", display_path(path))]
    CircularDependency { path: Vec<TypeRef> },
    #[error("Provider doesn't allow dynamic registrations")]
    DynamicRegistrationsDisabled,
    #[error("Scope was disposed before the deferred handle was evaluated")]
    ScopeDisposed,
    #[error(transparent)]
    Activation(#[from] anyhow::Error),
}

fn display_path(path: &[TypeRef]) -> String {
    path.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
}
