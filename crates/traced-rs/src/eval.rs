//! Interface to the numeric compute collaborator.
//!
//! Constant folding never computes values itself; it hands the target and the
//! concrete operand values to an [`Evaluator`]. `interpret` evaluates one
//! expression whose operands are already constant, `execute` runs a whole graph
//! and is what equivalence tests compare before and after a rewrite.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

use crate::graph::{Attr, ExprId, Graph, GraphError, NodeId, NodeKind, Operand, Target, Value};

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("operation `{op}` is not supported: {reason}")]
    Unimplemented { op: String, reason: String },
    #[error("evaluation failed: {message}")]
    Execution { message: String },
    #[error("argument mismatch for `{op}`: {reason}")]
    ArgumentMismatch { op: String, reason: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl EvalError {
    pub fn unimplemented(op: impl fmt::Display, reason: impl Into<String>) -> Self {
        EvalError::Unimplemented {
            op: op.to_string(),
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        EvalError::Execution {
            message: message.into(),
        }
    }

    pub fn argument_mismatch(op: impl fmt::Display, reason: impl Into<String>) -> Self {
        EvalError::ArgumentMismatch {
            op: op.to_string(),
            reason: reason.into(),
        }
    }
}

/// Deterministic executor of single operations over concrete values.
pub trait Evaluator {
    fn name(&self) -> &str;

    /// Evaluates `target` and returns one value per expression output.
    fn evaluate(
        &self,
        target: &Target,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
    ) -> EvalResult<Vec<Value>>;
}

/// Evaluates `expr`, whose node operands must all be constant nodes.
pub fn interpret(graph: &Graph, expr: ExprId, evaluator: &dyn Evaluator) -> EvalResult<Vec<Value>> {
    let resolve = |operand: &Operand| -> EvalResult<Value> {
        match operand {
            Operand::Value(value) => Ok(value.clone()),
            Operand::Node(node) => graph.const_value(*node).cloned().ok_or_else(|| {
                EvalError::argument_mismatch(
                    &graph.node(*node).map(|n| n.name.clone()).unwrap_or_default(),
                    format!("operand {node} is not a constant"),
                )
            }),
        }
    };
    evaluate_expr(graph, expr, evaluator, resolve)
}

/// Runs every expression of `graph` in order and returns the output values.
///
/// `feeds` supplies values for the non-module graph inputs, in declaration order.
pub fn execute(graph: &Graph, evaluator: &dyn Evaluator, feeds: &[Value]) -> EvalResult<Vec<Value>> {
    let mut env: HashMap<NodeId, Value> = HashMap::new();
    let mut feeds = feeds.iter();
    for &input in graph.inputs() {
        if matches!(graph.node(input)?.kind, NodeKind::Module(_)) {
            continue;
        }
        let value = feeds
            .next()
            .ok_or_else(|| EvalError::argument_mismatch(graph.name(), "too few input values"))?;
        env.insert(input, value.clone());
    }
    if feeds.next().is_some() {
        return Err(EvalError::argument_mismatch(graph.name(), "too many input values"));
    }

    for &id in graph.order() {
        let expr = graph.expr(id)?;
        if expr.target == Target::Input {
            continue;
        }
        let values = evaluate_expr(graph, id, evaluator, |operand| match operand {
            Operand::Value(value) => Ok(value.clone()),
            Operand::Node(node) => match env.get(node) {
                Some(value) => Ok(value.clone()),
                None => graph
                    .const_value(*node)
                    .cloned()
                    .ok_or_else(|| EvalError::execution(format!("{node} has no value yet"))),
            },
        })?;
        for (&output, value) in expr.outputs.iter().zip(values) {
            env.insert(output, value);
        }
    }

    graph
        .outputs()
        .iter()
        .map(|node| {
            env.get(node)
                .cloned()
                .ok_or_else(|| EvalError::execution(format!("output {node} was never computed")))
        })
        .collect()
}

fn evaluate_expr(
    graph: &Graph,
    id: ExprId,
    evaluator: &dyn Evaluator,
    mut resolve: impl FnMut(&Operand) -> EvalResult<Value>,
) -> EvalResult<Vec<Value>> {
    let expr = graph.expr(id)?;
    let values = match &expr.target {
        Target::Input => {
            return Err(EvalError::unimplemented(&expr.target, "graph inputs have no value"));
        }
        Target::Constant => expr
            .outputs
            .iter()
            .map(|&node| {
                graph
                    .const_value(node)
                    .cloned()
                    .ok_or_else(|| EvalError::execution(format!("{node} is not a constant")))
            })
            .collect::<EvalResult<Vec<_>>>()?,
        Target::GetAttr(path) => vec![read_attr(graph, expr.args.first(), path)?],
        Target::CallModule => {
            return Err(EvalError::unimplemented(
                &expr.target,
                "module calls are executed by the module system",
            ));
        }
        target => {
            let args = expr
                .args
                .iter()
                .map(&mut resolve)
                .collect::<EvalResult<Vec<_>>>()?;
            let mut kwargs = BTreeMap::new();
            for (name, operand) in &expr.kwargs {
                kwargs.insert(name.clone(), resolve(operand)?);
            }
            evaluator.evaluate(target, &args, &kwargs)?
        }
    };
    if values.len() != expr.outputs.len() {
        return Err(EvalError::argument_mismatch(
            &expr.target,
            format!(
                "produced {} value(s) for {} output(s)",
                values.len(),
                expr.outputs.len()
            ),
        ));
    }
    Ok(values)
}

/// Reads an attribute value through the module handle in `receiver`.
pub(crate) fn read_attr(graph: &Graph, receiver: Option<&Operand>, path: &str) -> EvalResult<Value> {
    let module = match receiver.and_then(Operand::as_node).map(|node| graph.node(node)) {
        Some(Ok(node)) => match node.kind {
            NodeKind::Module(module) => module,
            _ => {
                return Err(EvalError::argument_mismatch(
                    path,
                    format!("receiver `{}` is not a module", node.name),
                ))
            }
        },
        Some(Err(err)) => return Err(err.into()),
        None => return Err(EvalError::argument_mismatch(path, "missing module receiver")),
    };
    match graph.modules().resolve(module, path)? {
        Attr::Value(value) => Ok(value.clone()),
        Attr::Module(_) => Err(EvalError::unimplemented(
            path,
            "attribute resolves to a submodule",
        )),
    }
}
