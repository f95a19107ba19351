use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::any::{type_name, Any};
use tracing::error;

use super::finalizer::{boxed_finalizer_factory, BoxedFinalizer, Finalizer};
use crate::{
    errors::RuntimeErrorKind,
    types::{Bindings, TypeKey, TypeRef},
};

/// Type-erased service instance
pub type Instance = Arc<dyn Any + Send + Sync>;

pub(crate) type Activate = Arc<dyn Fn(&Arguments) -> Result<Instance, RuntimeErrorKind> + Send + Sync>;

/// Downcasts an instance, reporting the expected type on mismatch
pub fn downcast<T: Send + Sync + 'static>(instance: Instance) -> Result<Arc<T>, RuntimeErrorKind> {
    instance.downcast::<T>().map_err(|_| {
        let err = RuntimeErrorKind::IncorrectType {
            expected: type_name::<T>(),
        };
        error!("{}", err);
        err
    })
}

fn activate<T, F>(activator: F) -> Activate
where
    T: Send + Sync + 'static,
    F: Fn(&Arguments) -> Result<T, RuntimeErrorKind> + Send + Sync + 'static,
{
    Arc::new(move |arguments: &Arguments| Ok(Arc::new(activator(arguments)?) as Instance))
}

/// Resolved arguments of one activation, in parameter order.
/// Unresolved optional parameters are `None`.
pub struct Arguments {
    ty: TypeRef,
    values: Vec<Option<Instance>>,
}

impl Arguments {
    #[inline]
    #[must_use]
    pub(crate) fn new(ty: TypeRef, values: Vec<Option<Instance>>) -> Self {
        Self { ty, values }
    }

    /// The concrete type being activated, useful for generic activators
    #[inline]
    #[must_use]
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn instance(&self, index: usize) -> Option<&Instance> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Required argument
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, RuntimeErrorKind> {
        match self.optional(index)? {
            Some(value) => Ok(value),
            None => {
                let err = RuntimeErrorKind::MissingArgument {
                    ty: self.ty.clone(),
                    index,
                };
                error!("{}", err);
                Err(err)
            }
        }
    }

    /// Argument of a nullable or defaulted parameter
    pub fn optional<T: Send + Sync + 'static>(&self, index: usize) -> Result<Option<Arc<T>>, RuntimeErrorKind> {
        self.instance(index).cloned().map(downcast::<T>).transpose()
    }
}

/// Parameter of a runtime constructor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeParameter {
    pub ty: TypeRef,
    pub key: Option<Arc<str>>,
    pub has_default: bool,
}

impl RuntimeParameter {
    #[must_use]
    pub fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            key: None,
            has_default: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn keyed(mut self, key: &str) -> Self {
        self.key = Some(key.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    fn substitute(&self, bindings: &Bindings) -> Self {
        Self {
            ty: self.ty.substitute(bindings),
            ..self.clone()
        }
    }
}

#[derive(Clone)]
pub struct RuntimeConstructor {
    pub parameters: Vec<RuntimeParameter>,
    pub(crate) invoke: Activate,
}

impl RuntimeConstructor {
    #[must_use]
    pub fn new<T, F>(parameters: impl IntoIterator<Item = RuntimeParameter>, activator: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Arguments) -> Result<T, RuntimeErrorKind> + Send + Sync + 'static,
    {
        Self {
            parameters: parameters.into_iter().collect(),
            invoke: activate(activator),
        }
    }

    #[inline]
    pub(crate) fn invoke(&self, arguments: &Arguments) -> Result<Instance, RuntimeErrorKind> {
        (self.invoke)(arguments)
    }
}

/// Runtime counterpart of a declared type: how to construct it and how to tear it down
#[derive(Clone)]
pub struct RuntimeType {
    pub ty: TypeRef,
    pub constructors: Vec<RuntimeConstructor>,
    pub(crate) finalizer: Option<BoxedFinalizer>,
}

impl RuntimeType {
    #[must_use]
    pub fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            constructors: Vec::new(),
            finalizer: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn constructor(mut self, constructor: RuntimeConstructor) -> Self {
        self.constructors.push(constructor);
        self
    }

    #[inline]
    #[must_use]
    pub fn finalizer<T, F>(mut self, finalizer: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Finalizer<T>,
    {
        self.finalizer = Some(boxed_finalizer_factory(finalizer));
        self
    }

    /// Constructors specialized against a closed instantiation of a generic runtime type
    pub(crate) fn constructors_for(&self, ty: &TypeRef) -> Vec<RuntimeConstructor> {
        let mut bindings = Bindings::new();
        if !self.ty.bind(ty, &mut bindings) || bindings.is_empty() {
            return self.constructors.clone();
        }
        self.constructors
            .iter()
            .map(|constructor| RuntimeConstructor {
                parameters: constructor.parameters.iter().map(|parameter| parameter.substitute(&bindings)).collect(),
                invoke: constructor.invoke.clone(),
            })
            .collect()
    }
}

/// Activation code for every type, factory and member the graph may construct
#[derive(Clone, Default)]
pub struct ActivatorTable {
    types: BTreeMap<TypeKey, RuntimeType>,
    factories: BTreeMap<Arc<str>, Activate>,
    members: BTreeMap<Arc<str>, Activate>,
}

impl ActivatorTable {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a runtime type. Open generic types serve every closed instantiation.
    #[inline]
    #[must_use]
    pub fn with_type(mut self, runtime_type: RuntimeType) -> Self {
        self.types.insert(runtime_type.ty.key(), runtime_type);
        self
    }

    /// Registers a named factory. Arguments follow the factory's declared parameters.
    #[inline]
    #[must_use]
    pub fn with_factory<T, F>(mut self, name: &str, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Arguments) -> Result<T, RuntimeErrorKind> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), activate(factory));
        self
    }

    /// Registers the accessor of a field or property. Arguments are always empty.
    #[inline]
    #[must_use]
    pub fn with_member<T, F>(mut self, name: &str, member: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Arguments) -> Result<T, RuntimeErrorKind> + Send + Sync + 'static,
    {
        self.members.insert(name.into(), activate(member));
        self
    }

    /// Runtime type of `ty`, falling back to the generic definition
    #[must_use]
    pub fn runtime_type(&self, ty: &TypeRef) -> Option<&RuntimeType> {
        self.types
            .get(&ty.key())
            .or_else(|| ty.definition_key().and_then(|definition| self.types.get(&definition)))
    }

    #[inline]
    pub(crate) fn factory(&self, name: &str) -> Option<&Activate> {
        self.factories.get(name)
    }

    #[inline]
    pub(crate) fn member(&self, name: &str) -> Option<&Activate> {
        self.members.get(name)
    }

    pub(crate) fn finalizer(&self, ty: &TypeRef) -> Option<BoxedFinalizer> {
        self.runtime_type(ty).and_then(|runtime_type| runtime_type.finalizer.clone())
    }
}
