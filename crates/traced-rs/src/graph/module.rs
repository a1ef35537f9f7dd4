//! Frozen module states referenced by module-handle nodes.
//!
//! The module system owns learnable state outside of the graph. The graph only
//! needs to read attributes (for attribute-to-constant promotion) and to default
//! attributes introduced by newer formats (for compatibility loaders), so this
//! table is the entire surface it consumes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::Value;
use super::GraphError;

/// Type identity of a module: defining module path plus type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleKey {
    pub module: String,
    pub name: String,
}

impl ModuleKey {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    pub key: ModuleKey,
    pub attrs: BTreeMap<String, Value>,
    pub submodules: BTreeMap<String, ModuleId>,
}

impl ModuleState {
    pub fn new(key: ModuleKey) -> Self {
        Self {
            key,
            attrs: BTreeMap::new(),
            submodules: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn with_submodule(mut self, name: impl Into<String>, id: ModuleId) -> Self {
        self.submodules.insert(name.into(), id);
        self
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name) || self.submodules.contains_key(name)
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: Value) {
        self.attrs.insert(name.into(), value);
    }
}

/// Result of resolving a dotted attribute path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attr<'a> {
    Value(&'a Value),
    Module(ModuleId),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleTable {
    modules: Vec<ModuleState>,
}

impl ModuleTable {
    pub fn insert(&mut self, state: ModuleState) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(state);
        id
    }

    pub fn get(&self, id: ModuleId) -> Result<&ModuleState, GraphError> {
        self.modules
            .get(id.0 as usize)
            .ok_or(GraphError::UnknownModule { module: id })
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Result<&mut ModuleState, GraphError> {
        self.modules
            .get_mut(id.0 as usize)
            .ok_or(GraphError::UnknownModule { module: id })
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Resolves `path` (e.g. `"bn.weight"`) starting from `root`.
    pub fn resolve(&self, root: ModuleId, path: &str) -> Result<Attr<'_>, GraphError> {
        let mut current = root;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let state = self.get(current)?;
            if segments.peek().is_none() {
                if let Some(value) = state.attrs.get(segment) {
                    return Ok(Attr::Value(value));
                }
                if let Some(&child) = state.submodules.get(segment) {
                    return Ok(Attr::Module(child));
                }
            } else if let Some(&child) = state.submodules.get(segment) {
                current = child;
                continue;
            }
            return Err(GraphError::MissingAttribute {
                module: state.key.clone(),
                path: path.to_string(),
            });
        }
        Ok(Attr::Module(current))
    }
}
