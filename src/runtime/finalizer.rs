use alloc::sync::Arc;
use core::any::type_name;
use tracing::error;

use super::activator::Instance;

pub trait Finalizer<T>: Send + Sync + 'static {
    fn finalize(&self, instance: Arc<T>);
}

pub(crate) type BoxedFinalizer = Arc<dyn Fn(Instance) + Send + Sync>;

#[must_use]
pub(crate) fn boxed_finalizer_factory<T, Fin>(finalizer: Fin) -> BoxedFinalizer
where
    T: Send + Sync + 'static,
    Fin: Finalizer<T>,
{
    Arc::new(move |instance: Instance| match instance.downcast::<T>() {
        Ok(instance) => finalizer.finalize(instance),
        Err(_) => error!(expected = type_name::<T>(), "Finalizer skipped, incorrect instance type"),
    })
}

impl<F, T> Finalizer<T> for F
where
    F: Fn(Arc<T>) + Send + Sync + 'static,
{
    #[inline]
    fn finalize(&self, instance: Arc<T>) {
        self(instance);
    }
}
