use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};

use crate::{
    config::ShapeConfig,
    types::{Bindings, TypeRef},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Abstract,
    Interface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    NonPublic,
}

/// Declared default value of a parameter
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDecl {
    pub name: Arc<str>,
    pub ty: TypeRef,
    pub nullable: bool,
    pub key: Option<Arc<str>>,
    pub default_value: Option<DefaultValue>,
    pub allow_dynamic: bool,
    pub require_non_empty: bool,
}

impl ParameterDecl {
    #[must_use]
    pub fn new(name: &str, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            key: None,
            default_value: None,
            allow_dynamic: false,
            require_non_empty: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
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
    pub fn with_default(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    #[inline]
    #[must_use]
    pub fn dynamic(mut self) -> Self {
        self.allow_dynamic = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn non_empty(mut self) -> Self {
        self.require_non_empty = true;
        self
    }

    pub(crate) fn substitute(&self, bindings: &Bindings) -> Self {
        Self {
            ty: self.ty.substitute(bindings),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorDecl {
    pub parameters: Vec<ParameterDecl>,
    pub visibility: Visibility,
    /// Synthesized by the language rather than written by the author
    pub implicit: bool,
}

impl ConstructorDecl {
    #[must_use]
    pub fn public(parameters: impl IntoIterator<Item = ParameterDecl>) -> Self {
        Self {
            parameters: parameters.into_iter().collect(),
            visibility: Visibility::Public,
            implicit: false,
        }
    }

    #[must_use]
    pub fn non_public(parameters: impl IntoIterator<Item = ParameterDecl>) -> Self {
        Self {
            visibility: Visibility::NonPublic,
            ..Self::public(parameters)
        }
    }

    #[must_use]
    pub fn implicit() -> Self {
        Self {
            parameters: Vec::new(),
            visibility: Visibility::Public,
            implicit: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_authored_public(&self) -> bool {
        self.visibility == Visibility::Public && !self.implicit
    }
}

/// Declared shape of a type, at the level of its generic definition.
///
/// Constructor parameters and supertypes may mention the definition's generic parameters,
/// see [`specialize`] to get the view of a closed instantiation.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub ty: TypeRef,
    pub kind: TypeKind,
    pub constructors: Vec<ConstructorDecl>,
    pub supertypes: Vec<TypeRef>,
    pub disposable: bool,
    pub async_disposable: bool,
}

impl TypeDescriptor {
    #[must_use]
    pub fn class(ty: TypeRef) -> Self {
        Self {
            ty,
            kind: TypeKind::Class,
            constructors: Vec::new(),
            supertypes: Vec::new(),
            disposable: false,
            async_disposable: false,
        }
    }

    #[must_use]
    pub fn interface(ty: TypeRef) -> Self {
        Self {
            kind: TypeKind::Interface,
            ..Self::class(ty)
        }
    }

    #[must_use]
    pub fn abstract_class(ty: TypeRef) -> Self {
        Self {
            kind: TypeKind::Abstract,
            ..Self::class(ty)
        }
    }

    #[inline]
    #[must_use]
    pub fn constructor(mut self, constructor: ConstructorDecl) -> Self {
        self.constructors.push(constructor);
        self
    }

    #[inline]
    #[must_use]
    pub fn implements(mut self, supertype: TypeRef) -> Self {
        self.supertypes.push(supertype);
        self
    }

    #[inline]
    #[must_use]
    pub fn disposable(mut self) -> Self {
        self.disposable = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn async_disposable(mut self) -> Self {
        self.async_disposable = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn is_constructible(&self) -> bool {
        self.kind == TypeKind::Class
    }
}

/// Specializes a definition-level descriptor against a closed instantiation of it.
/// Non-generic descriptors are returned as is.
#[must_use]
pub fn specialize(descriptor: &TypeDescriptor, ty: &TypeRef) -> TypeDescriptor {
    let mut bindings = Bindings::new();
    if !descriptor.ty.bind(ty, &mut bindings) || bindings.is_empty() {
        return descriptor.clone();
    }

    TypeDescriptor {
        ty: ty.clone(),
        kind: descriptor.kind,
        constructors: descriptor
            .constructors
            .iter()
            .map(|constructor| ConstructorDecl {
                parameters: constructor.parameters.iter().map(|parameter| parameter.substitute(&bindings)).collect(),
                ..constructor.clone()
            })
            .collect(),
        supertypes: descriptor.supertypes.iter().map(|supertype| supertype.substitute(&bindings)).collect(),
        disposable: descriptor.disposable,
        async_disposable: descriptor.async_disposable,
    }
}

/// Type-identity and type-shape queries the resolver consumes.
///
/// Shape queries have default implementations on top of [`ShapeConfig`],
/// implementors usually only provide the descriptors.
pub trait TypeShapeOracle {
    fn shapes(&self) -> &ShapeConfig;

    /// Descriptor of the generic definition (or plain type) `ty` refers to
    fn describe(&self, ty: &TypeRef) -> Option<TypeDescriptor>;

    #[inline]
    fn collection_element(&self, ty: &TypeRef) -> Option<TypeRef> {
        self.shapes().collection_element(ty)
    }

    #[inline]
    fn collection_shapes(&self, elem: &TypeRef) -> Vec<TypeRef> {
        self.shapes().collection_shapes(elem)
    }

    #[inline]
    fn deferred_inner(&self, ty: &TypeRef) -> Option<TypeRef> {
        self.shapes().deferred_inner(ty)
    }

    #[inline]
    fn nullable_inner(&self, ty: &TypeRef) -> Option<TypeRef> {
        self.shapes().nullable_inner(ty)
    }

    #[inline]
    fn is_marker(&self, ty: &TypeRef) -> bool {
        self.shapes().is_marker(ty)
    }

    /// Descriptor of `ty` specialized against its type arguments
    fn describe_closed(&self, ty: &TypeRef) -> Option<TypeDescriptor> {
        self.describe(ty).map(|descriptor| specialize(&descriptor, ty))
    }
}

/// In-memory [`TypeShapeOracle`] keyed by type path
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    shapes: ShapeConfig,
    descriptors: BTreeMap<Arc<str>, TypeDescriptor>,
}

impl TypeCatalog {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_shapes(shapes: ShapeConfig) -> Self {
        Self {
            shapes,
            descriptors: BTreeMap::new(),
        }
    }

    /// Adds a descriptor, replacing a previous one for the same path.
    /// Descriptors without a path (parameters, arrays) are ignored.
    #[inline]
    #[must_use]
    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    pub fn insert(&mut self, descriptor: TypeDescriptor) -> Option<TypeDescriptor> {
        let path: Arc<str> = descriptor.ty.path()?.into();
        self.descriptors.insert(path, descriptor)
    }
}

impl TypeShapeOracle for TypeCatalog {
    #[inline]
    fn shapes(&self) -> &ShapeConfig {
        &self.shapes
    }

    fn describe(&self, ty: &TypeRef) -> Option<TypeDescriptor> {
        self.descriptors.get(ty.path()?).cloned()
    }
}
