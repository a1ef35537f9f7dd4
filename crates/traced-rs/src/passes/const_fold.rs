//! Passes that replace statically known values with constant nodes.

use crate::eval::{interpret, read_attr, EvalError};
use crate::graph::{ExprId, Graph, HostTensor, NodeKind, OpDef, Target, Value};

use super::{Direction, Pass, PassContext, PassError, PassResult, Transform};

/// Promotes module attribute reads with a tensor output to constants.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttrToConstant;

impl AttrToConstant {
    pub const NAME: &'static str = "AttrToConstant";
}

impl Pass for AttrToConstant {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run_once(&self) -> bool {
        true
    }

    fn direction(&self) -> Direction {
        Direction::Backward
    }

    fn run_transform(
        &self,
        graph: &mut Graph,
        expr: ExprId,
        _cx: &PassContext<'_>,
    ) -> PassResult<Transform> {
        let e = graph.expr(expr)?;
        let Target::GetAttr(path) = &e.target else {
            return Ok(Transform::Unchanged);
        };
        let &[output] = e.outputs.as_slice() else {
            return Ok(Transform::Unchanged);
        };
        if !matches!(graph.node(output)?.kind, NodeKind::Tensor(_)) {
            return Ok(Transform::Unchanged);
        }
        let value = read_attr(graph, e.args.first(), path)
            .map_err(|source| failure(self, expr, source))?;
        substitute(graph, expr, vec![value])
    }
}

/// Materializes shape queries over statically shaped inputs as int32 constants.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixInputShape;

impl FixInputShape {
    pub const NAME: &'static str = "FixInputShape";
}

impl Pass for FixInputShape {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run_once(&self) -> bool {
        true
    }

    fn direction(&self) -> Direction {
        Direction::Backward
    }

    fn run_transform(
        &self,
        graph: &mut Graph,
        expr: ExprId,
        _cx: &PassContext<'_>,
    ) -> PassResult<Transform> {
        let e = graph.expr(expr)?;
        let Target::Apply(OpDef::GetVarShape { axis }) = e.target else {
            return Ok(Transform::Unchanged);
        };
        let Some(&input) = e.inputs().first() else {
            return Ok(Transform::Unchanged);
        };
        let Some(meta) = graph.node(input)?.kind.tensor_meta() else {
            return Ok(Transform::Unchanged);
        };
        let shape = meta.shape();
        let Some(dims) = shape.static_dims() else {
            tracing::debug!(expr = %expr, shape = %shape, "shape is dynamic, kept");
            return Ok(Transform::Unchanged);
        };

        let extents: Vec<usize> = match axis {
            None => dims,
            Some(axis) => {
                let Some(index) = shape.axis_index(axis) else {
                    tracing::debug!(expr = %expr, axis, rank = shape.rank(), "shape axis out of range, kept");
                    return Ok(Transform::Unchanged);
                };
                vec![dims[index]]
            }
        };
        let Ok(extents) = extents
            .iter()
            .map(|&dim| i32::try_from(dim))
            .collect::<Result<Vec<i32>, _>>()
        else {
            tracing::debug!(expr = %expr, shape = %shape, "extent exceeds int32, kept");
            return Ok(Transform::Unchanged);
        };
        let value = Value::Tensor(HostTensor::from_i32(vec![extents.len()], extents));
        substitute(graph, expr, vec![value])
    }
}

/// Evaluates expressions whose inputs are all constant nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FoldConstant;

impl FoldConstant {
    pub const NAME: &'static str = "FoldConstant";
}

impl Pass for FoldConstant {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_passes(&self) -> &'static [&'static str] {
        &[AttrToConstant::NAME]
    }

    fn run_once(&self) -> bool {
        false
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn run_transform(
        &self,
        graph: &mut Graph,
        expr: ExprId,
        cx: &PassContext<'_>,
    ) -> PassResult<Transform> {
        let inputs = graph.expr(expr)?.inputs();
        let foldable = !inputs.is_empty()
            && inputs.iter().all(|&node| {
                graph
                    .producer(node)
                    .is_some_and(|producer| graph.is_constant_expr(producer))
            });
        if !foldable {
            return Ok(Transform::Unchanged);
        }
        let values =
            interpret(graph, expr, cx.evaluator()).map_err(|source| failure(self, expr, source))?;
        substitute(graph, expr, values)
    }
}

fn failure(pass: &dyn Pass, expr: ExprId, source: EvalError) -> PassError {
    PassError::EvaluationFailure {
        pass: pass.name().to_string(),
        expr,
        source,
    }
}

/// Replaces each output of `expr` with a constant node holding the matching value.
///
/// Constants are inserted before `expr` and take over the output names. The graph
/// is recompiled, so `expr` itself is gone afterwards unless something still uses it.
fn substitute(graph: &mut Graph, expr: ExprId, values: Vec<Value>) -> PassResult<Transform> {
    let outputs = graph.expr(expr)?.outputs.clone();
    let mut names = Vec::with_capacity(outputs.len());
    for &output in &outputs {
        names.push(graph.node(output)?.name.clone());
    }

    let constants = graph.insert_exprs(Some(expr), |b| -> PassResult<_> {
        let mut constants = Vec::with_capacity(values.len());
        for (value, name) in values.into_iter().zip(names) {
            let node = b.constant(value)?;
            b.rename(node, name)?;
            constants.push(node);
        }
        Ok(constants)
    })?;

    let mapping: Vec<_> = outputs.iter().copied().zip(constants.iter().copied()).collect();
    graph.replace_node(&mapping)?;
    let first = constants.first().and_then(|&node| graph.producer(node));
    graph.compile()?;
    for (old, new) in &mapping {
        tracing::trace!(expr = %expr, old = %old, new = %new, "folded to constant");
    }
    Ok(first.map_or(Transform::Unchanged, Transform::Replaced))
}
