use alloc::vec::Vec;
use core::fmt::{self, Display, Formatter};

use super::{CycleErrorKind, ProviderErrorKind, ResolveErrorKind};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    #[error(transparent)]
    Provider(#[from] ProviderErrorKind),
    #[error(transparent)]
    Resolve(#[from] ResolveErrorKind),
    #[error(transparent)]
    Cycle(#[from] CycleErrorKind),
}

/// Every failure collected while compiling a provider
#[derive(thiserror::Error, Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub errors: Vec<CompileErrorKind>,
}

impl Diagnostics {
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &CompileErrorKind> {
        self.errors.iter()
    }

    #[must_use]
    pub fn cycle(&self) -> Option<&CycleErrorKind> {
        self.errors.iter().find_map(|err| match err {
            CompileErrorKind::Cycle(err) => Some(err),
            CompileErrorKind::Provider(_) | CompileErrorKind::Resolve(_) => None,
        })
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration errors", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  {err}")?;
        }
        Ok(())
    }
}
