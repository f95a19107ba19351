use alloc::{
    sync::{Arc, Weak},
    vec::Vec,
};
use once_cell::sync::OnceCell;
use tracing::{debug, debug_span, error};

use super::{
    activator::{downcast, Instance},
    hybrid::{HybridResolver, ResolverInner, ScopeInner},
};
use crate::{errors::RuntimeErrorKind, types::TypeRef};

/// Handle resolving its service on first access and memoizing it.
///
/// It doesn't keep the resolver or its scope alive: once either is gone,
/// an unevaluated handle fails with [`RuntimeErrorKind::ScopeDisposed`].
pub struct Deferred {
    resolver: Weak<ResolverInner>,
    scope: Weak<ScopeInner>,
    ty: TypeRef,
    key: Option<Arc<str>>,
    value: OnceCell<Instance>,
}

impl Deferred {
    pub(crate) fn new(resolver: &Arc<ResolverInner>, scope: &Arc<ScopeInner>, ty: TypeRef, key: Option<Arc<str>>) -> Self {
        Self {
            resolver: Arc::downgrade(resolver),
            scope: Arc::downgrade(scope),
            ty,
            key,
            value: OnceCell::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn get(&self) -> Result<Instance, RuntimeErrorKind> {
        self.value
            .get_or_try_init(|| {
                let span = debug_span!("deferred", dependency = %self.ty, key = ?self.key);
                let _guard = span.enter();

                let (Some(inner), Some(scope)) = (self.resolver.upgrade(), self.scope.upgrade()) else {
                    let err = RuntimeErrorKind::ScopeDisposed;
                    error!("{}", err);
                    return Err(err);
                };
                let instance = HybridResolver { inner }.require(&scope, &self.ty, self.key.as_deref(), &mut Vec::new())?;
                debug!("Deferred evaluated");
                Ok(instance)
            })
            .cloned()
    }

    #[inline]
    pub fn get_as<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, RuntimeErrorKind> {
        downcast(self.get()?)
    }
}
