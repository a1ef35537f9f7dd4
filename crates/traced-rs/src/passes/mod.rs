//! Pass infrastructure: the [`Pass`] contract, configuration, statistics and errors.
//!
//! Passes are looked up by name in a [`PassRegistry`] and run by a
//! [`PassManager`], which orders them by their declared requirements and sweeps
//! the graph once or to a fixpoint.

mod const_fold;
mod manager;
mod norm_elemwise;
mod registry;

use thiserror::Error;

use crate::eval::{EvalError, Evaluator};
use crate::graph::{ExprId, Graph, GraphError};

pub use const_fold::{AttrToConstant, FixInputShape, FoldConstant};
pub use manager::{PassManager, RunReport};
pub use norm_elemwise::NormElemWise;
pub use registry::{PassConstructor, PassRegistry};

pub type PassResult<T> = Result<T, PassError>;

/// Order in which a sweep visits expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Execution order: upstream rewrites are visible downstream in the same sweep.
    Forward,
    /// Reverse execution order.
    Backward,
}

/// Outcome of visiting one expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Unchanged,
    /// The site now lives at the given expression; the sweep offers it to the pass again.
    Replaced(ExprId),
}

/// Collaborators available to a running pass.
pub struct PassContext<'a> {
    evaluator: &'a dyn Evaluator,
}

impl<'a> PassContext<'a> {
    pub fn new(evaluator: &'a dyn Evaluator) -> Self {
        Self { evaluator }
    }

    pub fn evaluator(&self) -> &'a dyn Evaluator {
        self.evaluator
    }
}

/// A named graph transformation run by the [`PassManager`].
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Passes that must have completed before this one runs.
    fn required_passes(&self) -> &'static [&'static str] {
        &[]
    }

    /// `true` for a single sweep, `false` to iterate until a sweep makes no substitution.
    fn run_once(&self) -> bool;

    fn direction(&self) -> Direction;

    fn run_transform(
        &self,
        graph: &mut Graph,
        expr: ExprId,
        cx: &PassContext<'_>,
    ) -> PassResult<Transform>;
}

#[derive(Debug, Error)]
pub enum PassError {
    #[error("unknown pass `{name}`{}", required_by_suffix(required_by))]
    UnknownPass {
        name: String,
        required_by: Option<String>,
    },
    #[error("cyclic pass dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
    #[error("pass `{pass}` did not converge within {max_iterations} iteration(s)")]
    NonConvergence { pass: String, max_iterations: usize },
    #[error("pass `{pass}` failed to evaluate {expr}")]
    EvaluationFailure {
        pass: String,
        expr: ExprId,
        #[source]
        source: EvalError,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

fn required_by_suffix(required_by: &Option<String>) -> String {
    match required_by {
        Some(pass) => format!(" (required by `{pass}`)"),
        None => String::new(),
    }
}

/// Statistics collected while running one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    /// Number of full sweeps executed.
    pub iterations: usize,
    /// Number of `Replaced` results across all sweeps.
    pub substitutions: usize,
    /// Expressions removed by recompilation.
    pub erased: usize,
}

impl PassStats {
    pub fn merge(self, other: PassStats) -> PassStats {
        PassStats {
            iterations: self.iterations + other.iterations,
            substitutions: self.substitutions + other.substitutions,
            erased: self.erased + other.erased,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassConfig {
    /// Sweep cap for fixpoint passes.
    pub max_iterations: usize,
    /// Cap on consecutive `Replaced` results at one site within a sweep.
    pub max_chain: usize,
    /// Recompile the graph after every pass.
    pub recompile_after_pass: bool,
    /// Log a per-pass stats summary at info level.
    pub log_stats: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            max_iterations: 32,
            max_chain: 8,
            recompile_after_pass: true,
            log_stats: false,
        }
    }
}

impl PassConfig {
    /// Defaults overridden by `TRACED_PASS_MAX_ITERS` and `TRACED_PASS_STATS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(max_iterations) = crate::env::pass_max_iters() {
            config.max_iterations = max_iterations;
        }
        config.log_stats = crate::env::pass_stats_enabled();
        config
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_max_chain(mut self, max_chain: usize) -> Self {
        self.max_chain = max_chain.max(1);
        self
    }
}
