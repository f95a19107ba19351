mod compile;
mod cycle;
mod provider;
mod resolve;
mod runtime;

pub use compile::{CompileErrorKind, Diagnostics};
pub use cycle::CycleErrorKind;
pub use provider::ProviderErrorKind;
pub use resolve::{MissingParameter, MissingReason, ResolveErrorKind};
pub use runtime::RuntimeErrorKind;
