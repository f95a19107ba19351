use alloc::vec::Vec;
use core::fmt::{self, Display, Formatter};

use crate::types::TypeRef;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleErrorKind {
    /// The path starts and ends with the repeated type
    CyclicDependency { path: Vec<TypeRef> },
}

impl Display for CycleErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CycleErrorKind::CyclicDependency { path } => {
                write!(f, "Cyclic dependency detected: ")?;
                for (index, ty) in path.iter().enumerate() {
                    if index > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{ty}")?;
                }
            }
        }
        Ok(())
    }
}
