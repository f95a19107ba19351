use alloc::{sync::Arc, vec, vec::Vec};

use crate::types::TypeRef;

/// Recognized type shapes
/// ## Fields
/// - `collections`:
///   Names of generic read-only sequence shapes of one argument.
///   Arrays (`T[]`) are always a collection shape.
///
/// - `deferred`:
///   Names of deferred-handle shapes of one argument.
///   A deferred handle is the sanctioned way to break dependency cycles.
///
/// - `nullable`:
///   Names of nullable wrappers. Exactly one level is stripped from a parameter type.
///
/// - `markers`:
///   Universal or marker supertypes. A closed generic registration is never added under them.
#[derive(Debug, Clone)]
pub struct ShapeConfig {
    pub collections: Vec<Arc<str>>,
    pub deferred: Vec<Arc<str>>,
    pub nullable: Vec<Arc<str>>,
    pub markers: Vec<Arc<str>>,
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            collections: vec!["IEnumerable".into(), "IReadOnlyList".into(), "IReadOnlyCollection".into()],
            deferred: vec!["Lazy".into()],
            nullable: vec!["Nullable".into()],
            markers: vec!["object".into(), "IDisposable".into(), "IAsyncDisposable".into()],
        }
    }
}

impl ShapeConfig {
    /// Element type of a collection shape
    #[must_use]
    pub fn collection_element(&self, ty: &TypeRef) -> Option<TypeRef> {
        match ty {
            TypeRef::Array(elem) => Some((**elem).clone()),
            TypeRef::Named { path, args } if args.len() == 1 && self.collections.contains(path) => Some(args[0].clone()),
            TypeRef::Named { .. } | TypeRef::Param(_) => None,
        }
    }

    /// Every recognized collection shape of `elem`, arrays last
    #[must_use]
    pub fn collection_shapes(&self, elem: &TypeRef) -> Vec<TypeRef> {
        let mut shapes: Vec<_> = self
            .collections
            .iter()
            .map(|path| TypeRef::Named {
                path: path.clone(),
                args: vec![elem.clone()],
            })
            .collect();
        shapes.push(TypeRef::array(elem.clone()));
        shapes
    }

    #[must_use]
    pub fn deferred_inner(&self, ty: &TypeRef) -> Option<TypeRef> {
        Self::unwrap_one(&self.deferred, ty)
    }

    #[must_use]
    pub fn nullable_inner(&self, ty: &TypeRef) -> Option<TypeRef> {
        Self::unwrap_one(&self.nullable, ty)
    }

    #[must_use]
    pub fn is_marker(&self, ty: &TypeRef) -> bool {
        ty.path().is_some_and(|path| self.markers.iter().any(|marker| &**marker == path))
    }

    fn unwrap_one(names: &[Arc<str>], ty: &TypeRef) -> Option<TypeRef> {
        match ty {
            TypeRef::Named { path, args } if args.len() == 1 && names.contains(path) => Some(args[0].clone()),
            TypeRef::Named { .. } | TypeRef::Param(_) | TypeRef::Array(_) => None,
        }
    }
}
