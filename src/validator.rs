use alloc::{
    collections::{BTreeMap, BTreeSet},
    vec::Vec,
};
use tracing::{debug, debug_span, error};

use crate::{
    errors::CycleErrorKind,
    registry::ServiceRegistry,
    resolution::{ConstructorResolution, ResolutionTarget},
    types::{TypeKey, TypeRef},
};

#[derive(Debug, Default)]
struct Node {
    ty: Option<TypeRef>,
    dependencies: BTreeSet<TypeKey>,
}

/// Whole-graph pass rejecting non-lazy circular dependencies.
///
/// Nodes are resolved types. Edges are the non-lazy parameters of every resolved constructor
/// and, for collection aggregates, the edges to every member's resolved type.
#[derive(Debug, Default)]
pub struct CycleValidator {
    nodes: BTreeMap<TypeKey, Node>,
}

impl CycleValidator {
    #[must_use]
    pub fn new<'a>(
        registry: &ServiceRegistry,
        constructors: impl IntoIterator<Item = (&'a ResolutionTarget, &'a ConstructorResolution)>,
    ) -> Self {
        let mut validator = Self::default();

        for registration in registry.iter() {
            validator.node(registration.resolved_type());
            if let Some(members) = &registration.members {
                let from = registration.resolved_type().key();
                for member in members {
                    let to = registry.get(*member).resolved_type();
                    validator.edge(&from, to);
                }
            }
        }

        for (_, resolution) in constructors {
            let from = validator.node(&resolution.ty);
            for parameter in &resolution.parameters {
                if parameter.is_lazy {
                    continue;
                }
                if let Some(selected) = parameter.selected_service {
                    validator.edge(&from, registry.get(selected).resolved_type());
                }
            }
        }
        validator
    }

    fn node(&mut self, ty: &TypeRef) -> TypeKey {
        let key = ty.key();
        self.nodes.entry(key.clone()).or_default().ty.get_or_insert_with(|| ty.clone());
        key
    }

    fn edge(&mut self, from: &TypeKey, to: &TypeRef) {
        let to = self.node(to);
        self.nodes.entry(from.clone()).or_default().dependencies.insert(to);
    }

    /// Dependencies of a resolved type, empty for unknown types
    #[must_use]
    pub fn dependencies(&self, ty: &TypeRef) -> Vec<TypeRef> {
        self.nodes
            .get(&ty.key())
            .map(|node| node.dependencies.iter().filter_map(|key| self.type_of(key)).collect())
            .unwrap_or_default()
    }

    fn type_of(&self, key: &TypeKey) -> Option<TypeRef> {
        self.nodes.get(key).and_then(|node| node.ty.clone())
    }

    /// Reports the first cycle found with its path from the repeated type back to itself
    pub fn validate(&self) -> Result<(), CycleErrorKind> {
        let span = debug_span!("validate", nodes = self.nodes.len());
        let _guard = span.enter();

        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();

        for key in self.nodes.keys() {
            if let Some(start) = self.dfs_visit(key, &mut visited, &mut stack) {
                let mut path = stack.split_off(start).into_iter().filter_map(|key| self.type_of(&key)).collect::<Vec<_>>();
                if let Some(repeated) = path.first().cloned() {
                    path.push(repeated);
                }

                let err = CycleErrorKind::CyclicDependency { path };
                error!("{}", err);
                return Err(err);
            }
        }

        debug!("No cycles");
        Ok(())
    }

    /// Returns the stack position where the cycle starts
    fn dfs_visit(&self, key: &TypeKey, visited: &mut BTreeSet<TypeKey>, stack: &mut Vec<TypeKey>) -> Option<usize> {
        if visited.contains(key) {
            return None;
        }
        if let Some(position) = stack.iter().position(|on_path| on_path == key) {
            return Some(position);
        }
        stack.push(key.clone());

        if let Some(node) = self.nodes.get(key) {
            for dependency in &node.dependencies {
                if let Some(position) = self.dfs_visit(dependency, visited, stack) {
                    return Some(position);
                }
            }
        }

        stack.pop();
        visited.insert(key.clone());
        None
    }
}
