use alloc::{boxed::Box, collections::BTreeMap, sync::Arc, vec::Vec};
use core::fmt::{self, Display, Formatter};

/// Bindings of unbound generic parameters to concrete types
pub type Bindings = BTreeMap<Arc<str>, TypeRef>;

/// Structural type identity.
///
/// A type is either a named (possibly generic) type, an unbound generic parameter
/// or an array of another type. Two `TypeRef`s are equal iff they are structurally equal,
/// so `Repo<T>` and `Repo<U>` are different values; use [`TypeRef::key`] to compare
/// them as lookup keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeRef {
    Named { path: Arc<str>, args: Vec<TypeRef> },
    Param(Arc<str>),
    Array(Box<TypeRef>),
}

impl TypeRef {
    #[inline]
    #[must_use]
    pub fn named(path: &str) -> Self {
        Self::Named {
            path: path.into(),
            args: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn generic(path: &str, args: impl IntoIterator<Item = TypeRef>) -> Self {
        Self::Named {
            path: path.into(),
            args: args.into_iter().collect(),
        }
    }

    #[inline]
    #[must_use]
    pub fn param(name: &str) -> Self {
        Self::Param(name.into())
    }

    #[inline]
    #[must_use]
    pub fn array(elem: TypeRef) -> Self {
        Self::Array(Box::new(elem))
    }

    /// Path of the named type, `None` for parameters and arrays
    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Named { path, .. } => Some(&**path),
            Self::Param(_) | Self::Array(_) => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn args(&self) -> &[TypeRef] {
        match self {
            Self::Named { args, .. } => args,
            Self::Param(_) | Self::Array(_) => &[],
        }
    }

    #[inline]
    #[must_use]
    pub fn is_generic(&self) -> bool {
        matches!(self, Self::Named { args, .. } if !args.is_empty())
    }

    /// Whether the type mentions an unbound generic parameter anywhere
    #[must_use]
    pub fn is_open(&self) -> bool {
        match self {
            Self::Named { args, .. } => args.iter().any(TypeRef::is_open),
            Self::Param(_) => true,
            Self::Array(elem) => elem.is_open(),
        }
    }

    /// Whether the type is a fully specialized generic instantiation
    #[inline]
    #[must_use]
    pub fn is_closed_generic(&self) -> bool {
        self.is_generic() && !self.is_open()
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> TypeKey {
        TypeKey::of(self)
    }

    /// Key of the generic definition this type is an instantiation of
    #[must_use]
    pub fn definition_key(&self) -> Option<TypeKey> {
        match self {
            Self::Named { path, args } if !args.is_empty() => Some(TypeKey::Definition {
                path: path.clone(),
                arity: args.len(),
            }),
            Self::Array(_) => Some(TypeKey::Definition {
                path: ARRAY_PATH.into(),
                arity: 1,
            }),
            Self::Named { .. } | Self::Param(_) => None,
        }
    }

    /// Replaces bound parameters, leaving unknown ones untouched
    #[must_use]
    pub fn substitute(&self, bindings: &Bindings) -> TypeRef {
        match self {
            Self::Named { path, args } => Self::Named {
                path: path.clone(),
                args: args.iter().map(|arg| arg.substitute(bindings)).collect(),
            },
            Self::Param(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            Self::Array(elem) => Self::Array(Box::new(elem.substitute(bindings))),
        }
    }

    /// One-way unification of `self` (which may contain parameters) against `concrete`.
    /// Returns `false` on a shape mismatch or a conflicting binding.
    pub fn bind(&self, concrete: &TypeRef, bindings: &mut Bindings) -> bool {
        match (self, concrete) {
            (Self::Param(name), _) => match bindings.get(name) {
                Some(bound) => bound == concrete,
                None => {
                    bindings.insert(name.clone(), concrete.clone());
                    true
                }
            },
            (
                Self::Named { path, args },
                Self::Named {
                    path: concrete_path,
                    args: concrete_args,
                },
            ) => {
                path == concrete_path
                    && args.len() == concrete_args.len()
                    && args.iter().zip(concrete_args).all(|(arg, concrete)| arg.bind(concrete, bindings))
            }
            (Self::Array(elem), Self::Array(concrete_elem)) => elem.bind(concrete_elem, bindings),
            _ => false,
        }
    }

    /// Last path segment, used in diagnostics
    #[inline]
    #[must_use]
    pub fn short_name(&self) -> &str {
        match self {
            Self::Named { path, .. } => {
                let path: &str = path;
                path.rsplit_once("::").map_or(path, |(_, name)| name)
            }
            Self::Param(name) => &**name,
            Self::Array(_) => ARRAY_PATH,
        }
    }
}

const ARRAY_PATH: &str = "[]";

impl Display for TypeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { path, args } => {
                write!(f, "{path}")?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (index, arg) in args.iter().enumerate() {
                        if index > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Self::Param(name) => write!(f, "{name}"),
            Self::Array(elem) => write!(f, "{elem}[]"),
        }
    }
}

/// Normalized lookup key.
///
/// Types mentioning unbound parameters collapse to their generic definition,
/// everything else is compared structurally.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeKey {
    Closed(TypeRef),
    Definition { path: Arc<str>, arity: usize },
}

impl TypeKey {
    #[must_use]
    pub fn of(ty: &TypeRef) -> Self {
        if ty.is_open() {
            if let Some(definition) = ty.definition_key() {
                return definition;
            }
            // A bare parameter has no definition of its own
            return Self::Definition {
                path: ty.short_name().into(),
                arity: 0,
            };
        }
        Self::Closed(ty.clone())
    }

    #[inline]
    #[must_use]
    pub fn is_definition(&self) -> bool {
        matches!(self, Self::Definition { .. })
    }
}

impl Display for TypeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(ty) => write!(f, "{ty}"),
            Self::Definition { path, arity } => {
                write!(f, "{path}<")?;
                for _ in 1..*arity {
                    write!(f, ",")?;
                }
                write!(f, ">")
            }
        }
    }
}
