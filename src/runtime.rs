mod activator;
mod cache;
mod collection;
mod deferred;
mod dynamic;
mod finalizer;
mod hybrid;

pub use activator::{downcast, ActivatorTable, Arguments, Instance, RuntimeConstructor, RuntimeParameter, RuntimeType};
pub use collection::Collection;
pub use deferred::Deferred;
pub use dynamic::{DynamicRegistration, DynamicSource, DynamicTable};
pub use finalizer::Finalizer;
pub use hybrid::{HybridResolver, HybridScope};
