//! Load-time compatibility fixes for graphs persisted by older format versions.
//!
//! A loader is keyed by the called module type, the opdef kind, the free
//! function, or the tensor method name of an expression. The deserializer calls
//! [`LoaderRegistry::apply`] once per reconstructed expression with the format
//! version recorded in the file (`None` for pre-versioning files). Loaders must
//! leave an already-current expression untouched.

mod loaders;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::{
    ExprId, FunctionRef, Graph, GraphError, ModuleKey, NodeKind, OpDefKind, Operand, Target,
};

pub use loaders::{BATCHNORM_MODULES, CONV_BN_MODULES, PARAM_DIM_DEFAULT};

pub type LoadResult<T> = Result<T, LoadError>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("cannot upgrade {expr}: {reason}")]
    Malformed { expr: ExprId, reason: String },
}

impl LoadError {
    pub(crate) fn malformed(expr: ExprId, reason: impl Into<String>) -> Self {
        LoadError::Malformed {
            expr,
            reason: reason.into(),
        }
    }
}

/// Rewrites one expression in place given the file's format version. Returns
/// whether anything changed.
pub type ExprLoader = Arc<dyn Fn(&mut Graph, ExprId, Option<&str>) -> LoadResult<bool> + Send + Sync>;

#[derive(Default, Clone)]
pub struct LoaderRegistry {
    module: HashMap<ModuleKey, ExprLoader>,
    opdef: HashMap<OpDefKind, ExprLoader>,
    functional: HashMap<FunctionRef, ExprLoader>,
    tensor_method: HashMap<String, ExprLoader>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the loaders for every known format change.
    pub fn with_builtin_loaders() -> Self {
        let mut registry = Self::new();
        loaders::register_builtin(&mut registry);
        registry
    }

    pub fn register_module_loader<F>(&mut self, keys: &[ModuleKey], loader: F)
    where
        F: Fn(&mut Graph, ExprId, Option<&str>) -> LoadResult<bool> + Send + Sync + 'static,
    {
        let loader: ExprLoader = Arc::new(loader);
        for key in keys {
            self.module.insert(key.clone(), Arc::clone(&loader));
        }
    }

    pub fn register_opdef_loader<F>(&mut self, kind: OpDefKind, loader: F)
    where
        F: Fn(&mut Graph, ExprId, Option<&str>) -> LoadResult<bool> + Send + Sync + 'static,
    {
        self.opdef.insert(kind, Arc::new(loader));
    }

    pub fn register_functional_loader<F>(&mut self, keys: &[FunctionRef], loader: F)
    where
        F: Fn(&mut Graph, ExprId, Option<&str>) -> LoadResult<bool> + Send + Sync + 'static,
    {
        let loader: ExprLoader = Arc::new(loader);
        for key in keys {
            self.functional.insert(key.clone(), Arc::clone(&loader));
        }
    }

    pub fn register_tensor_method_loader<F>(&mut self, method: &str, loader: F)
    where
        F: Fn(&mut Graph, ExprId, Option<&str>) -> LoadResult<bool> + Send + Sync + 'static,
    {
        self.tensor_method.insert(method.to_string(), Arc::new(loader));
    }

    /// Loader registered for the operation `expr` performs, if any.
    pub fn loader_for(&self, graph: &Graph, expr: ExprId) -> LoadResult<Option<ExprLoader>> {
        let e = graph.expr(expr)?;
        let loader = match &e.target {
            Target::CallModule => {
                let Some(module) = called_module(graph, e.args.first())? else {
                    return Ok(None);
                };
                let key = &graph.modules().get(module)?.key;
                self.module.get(key)
            }
            Target::Apply(op) => self.opdef.get(&op.kind()),
            Target::CallFunction(func) => self.functional.get(func),
            Target::CallMethod(name) => self.tensor_method.get(name),
            Target::Input | Target::Constant | Target::GetAttr(_) => None,
        };
        Ok(loader.cloned())
    }

    /// Runs the matching loader on `expr`. Returns whether the expression changed.
    pub fn apply(&self, graph: &mut Graph, expr: ExprId, version: Option<&str>) -> LoadResult<bool> {
        let Some(loader) = self.loader_for(graph, expr)? else {
            return Ok(false);
        };
        let changed = loader(graph, expr, version)?;
        if changed {
            tracing::debug!(expr = %expr, version = ?version, "applied compatibility loader");
        }
        Ok(changed)
    }

    /// Runs [`LoaderRegistry::apply`] over every expression, returning how many changed.
    pub fn apply_all(&self, graph: &mut Graph, version: Option<&str>) -> LoadResult<usize> {
        let mut changed = 0;
        for expr in graph.exprs_in_order() {
            if graph.contains_expr(expr) && self.apply(graph, expr, version)? {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("module", &self.module.keys().collect::<Vec<_>>())
            .field("opdef", &self.opdef.keys().collect::<Vec<_>>())
            .field("functional", &self.functional.keys().collect::<Vec<_>>())
            .field("tensor_method", &self.tensor_method.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Module handle passed as the receiver of a module call.
pub(crate) fn called_module(
    graph: &Graph,
    receiver: Option<&Operand>,
) -> LoadResult<Option<crate::graph::ModuleId>> {
    let Some(node) = receiver.and_then(Operand::as_node) else {
        return Ok(None);
    };
    match graph.node(node)?.kind {
        NodeKind::Module(module) => Ok(Some(module)),
        _ => Ok(None),
    }
}
