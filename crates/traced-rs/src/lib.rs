pub mod compat;
mod env;
pub mod eval;
pub mod graph;
pub mod ops;
pub mod passes;
pub mod pattern;

pub use compat::{LoadError, LoaderRegistry};
pub use eval::{EvalError, Evaluator};
pub use graph::{Expr, ExprId, Graph, GraphError, Node, NodeId, NodeKind, Operand, Target, Value};
pub use passes::{Pass, PassConfig, PassError, PassManager, PassRegistry, RunReport};
pub use pattern::{is_op, Pattern, PatternMatcher};
