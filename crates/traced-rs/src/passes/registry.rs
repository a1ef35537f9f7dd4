//! Name-keyed pass registry handed to the [`PassManager`](super::PassManager).

use std::collections::BTreeMap;
use std::fmt;

use super::{AttrToConstant, FixInputShape, FoldConstant, NormElemWise, Pass};

/// Factory function that creates a fresh pass instance.
pub type PassConstructor = Box<dyn Fn() -> Box<dyn Pass> + Send + Sync>;

#[derive(Default)]
pub struct PassRegistry {
    constructors: BTreeMap<String, PassConstructor>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the constant-folding passes and the arithmetic normalization pass.
    pub fn with_default_passes() -> Self {
        let mut registry = Self::new();
        registry.register_pass(AttrToConstant::NAME, || Box::new(AttrToConstant));
        registry.register_pass(FixInputShape::NAME, || Box::new(FixInputShape));
        registry.register_pass(FoldConstant::NAME, || Box::new(FoldConstant));
        registry.register_pass(NormElemWise::NAME, || Box::new(NormElemWise::new()));
        registry
    }

    /// Registers `constructor` under `name`, replacing any previous registration.
    pub fn register_pass<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Pass> + Send + Sync + 'static,
    {
        let name = name.into();
        if self
            .constructors
            .insert(name.clone(), Box::new(constructor))
            .is_some()
        {
            tracing::debug!(pass = %name, "replaced pass registration");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn instantiate(&self, name: &str) -> Option<Box<dyn Pass>> {
        self.constructors.get(name).map(|constructor| constructor())
    }

    /// Registered pass names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl fmt::Debug for PassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}
