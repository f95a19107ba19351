use alloc::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    vec::Vec,
};
use tracing::{debug, debug_span, error};

use crate::{errors::ProviderErrorKind, registration::Declaration};

/// Declarations of one provider or importable module
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDecl {
    pub name: Arc<str>,
    /// Whether unresolved dependencies may be supplied at runtime
    pub dynamic_registrations: bool,
    /// Count of constructors authored on the provider itself
    pub public_constructors: usize,
    pub declarations: Vec<Declaration>,
    pub imports: Vec<Arc<str>>,
}

impl ProviderDecl {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            dynamic_registrations: false,
            public_constructors: 0,
            declarations: Vec::new(),
            imports: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn dynamic(mut self) -> Self {
        self.dynamic_registrations = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn public_constructors(mut self, count: usize) -> Self {
        self.public_constructors = count;
        self
    }

    #[inline]
    #[must_use]
    pub fn declare(mut self, declaration: Declaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    #[inline]
    #[must_use]
    pub fn import(mut self, module: &str) -> Self {
        self.imports.push(module.into());
        self
    }

    /// Dynamic mode changes how the provider is constructed, so it can't declare its own constructors
    pub fn check(&self) -> Result<(), ProviderErrorKind> {
        if self.dynamic_registrations && self.public_constructors > 0 {
            let err = ProviderErrorKind::PublicConstructorsInDynamicMode {
                provider: self.name.clone(),
                count: self.public_constructors,
            };
            error!("{}", err);
            return Err(err);
        }
        Ok(())
    }
}

/// Named modules available for import
#[derive(Debug, Clone, Default)]
pub struct ModuleSet {
    modules: BTreeMap<Arc<str>, ProviderDecl>,
}

impl ModuleSet {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_module(mut self, module: ProviderDecl) -> Self {
        self.insert(module);
        self
    }

    pub fn insert(&mut self, module: ProviderDecl) -> Option<ProviderDecl> {
        self.modules.insert(module.name.clone(), module)
    }

    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderDecl> {
        self.modules.get(name)
    }

    /// Declarations of `root` followed by those of its imports, depth-first.
    /// Each module is visited once, so import loops terminate.
    pub fn flatten(&self, root: &ProviderDecl) -> Result<Vec<Declaration>, ProviderErrorKind> {
        let span = debug_span!("flatten", provider = %root.name);
        let _guard = span.enter();

        let mut visited = BTreeSet::new();
        let mut declarations = Vec::new();
        self.visit(root, &mut visited, &mut declarations)?;

        debug!(declarations = declarations.len(), modules = visited.len(), "Flattened");
        Ok(declarations)
    }

    fn visit(
        &self,
        module: &ProviderDecl,
        visited: &mut BTreeSet<Arc<str>>,
        declarations: &mut Vec<Declaration>,
    ) -> Result<(), ProviderErrorKind> {
        if !visited.insert(module.name.clone()) {
            debug!(module = %module.name, "Already imported");
            return Ok(());
        }
        declarations.extend(module.declarations.iter().cloned());

        for name in &module.imports {
            let Some(imported) = self.modules.get(name) else {
                let err = ProviderErrorKind::UnknownImport {
                    provider: module.name.clone(),
                    module: name.clone(),
                };
                error!("{}", err);
                return Err(err);
            };
            self.visit(imported, visited, declarations)?;
        }
        Ok(())
    }
}
