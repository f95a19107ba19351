use alloc::{sync::Arc, vec::Vec};
use core::fmt::{self, Display, Formatter};

use crate::types::TypeRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingReason {
    NoDeclaration,
    Ambiguous { candidates: Vec<TypeRef> },
    LazyTransientCycle,
    EmptyCollection,
}

/// One constructor parameter that could not be bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingParameter {
    pub name: Arc<str>,
    pub ty: TypeRef,
    pub key: Option<Arc<str>>,
    pub reason: MissingReason,
}

impl Display for MissingParameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)?;
        if let Some(key) = &self.key {
            write!(f, " (key {key:?})")?;
        }
        match &self.reason {
            MissingReason::NoDeclaration => write!(f, " has no declaration"),
            MissingReason::LazyTransientCycle => write!(f, " is a transient behind a deferred handle of a transient"),
            MissingReason::EmptyCollection => write!(f, " requires at least one member"),
            MissingReason::Ambiguous { candidates } => {
                write!(f, " is ambiguous between")?;
                for candidate in candidates {
                    write!(f, " {candidate}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveErrorKind {
    #[error("Type {ty} must be a named constructible type")]
    NotConstructible { ty: TypeRef },
    #[error("Type {ty} has {count} public constructors, only one is allowed")]
    AmbiguousConstructors { ty: TypeRef, count: usize },
    #[error("Factory {factory} returns {actual}, expected {expected}")]
    FactoryReturnMismatch {
        factory: Arc<str>,
        expected: TypeRef,
        actual: TypeRef,
    },
    #[error("Type {ty} has {} missing dependencies", parameters.len())]
    MissingDependencies { ty: TypeRef, parameters: Vec<MissingParameter> },
}
