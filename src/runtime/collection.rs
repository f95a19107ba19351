use alloc::{sync::Arc, vec::Vec};

use super::activator::{downcast, Instance};
use crate::{errors::RuntimeErrorKind, types::TypeRef};

/// Resolved members of a collection shape, in registration order
pub struct Collection {
    elem: TypeRef,
    items: Vec<Instance>,
}

impl Collection {
    #[inline]
    #[must_use]
    pub(crate) fn new(elem: TypeRef, items: Vec<Instance>) -> Self {
        Self { elem, items }
    }

    #[inline]
    #[must_use]
    pub fn elem(&self) -> &TypeRef {
        &self.elem
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.items.iter()
    }

    pub fn get_as<T: Send + Sync + 'static>(&self, index: usize) -> Option<Result<Arc<T>, RuntimeErrorKind>> {
        self.items.get(index).cloned().map(downcast::<T>)
    }

    /// Every member downcast to `T`
    pub fn items_as<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>, RuntimeErrorKind> {
        self.items.iter().cloned().map(downcast::<T>).collect()
    }
}
