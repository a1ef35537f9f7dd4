//! Lowers elementwise add/sub/mul/div call sites to add-only and mul-only chains.
//!
//! `a - b` becomes `a + neg(b)` and `a / b` becomes `a * pow(b, -1)`. Reflected
//! spellings (`b.__rsub__(a)`) are read back into `a - b` first, and a constant
//! operand always ends up on the right.

use crate::graph::{Expr, ExprId, Graph, NodeId, NodeKind, Operand, Value};
use crate::ops::{functional, method};
use crate::pattern::{is_op, OpKey, Pattern, PatternMatcher};

use super::{Direction, FoldConstant, Pass, PassContext, PassResult, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Spelling {
    Function,
    Method,
    InPlace,
    Reflected,
}

const METHODS: [(&str, Family, Spelling); 12] = [
    (method::ADD, Family::Add, Spelling::Method),
    (method::IADD, Family::Add, Spelling::InPlace),
    (method::RADD, Family::Add, Spelling::Reflected),
    (method::SUB, Family::Sub, Spelling::Method),
    (method::ISUB, Family::Sub, Spelling::InPlace),
    (method::RSUB, Family::Sub, Spelling::Reflected),
    (method::MUL, Family::Mul, Spelling::Method),
    (method::IMUL, Family::Mul, Spelling::InPlace),
    (method::RMUL, Family::Mul, Spelling::Reflected),
    (method::TRUEDIV, Family::Div, Spelling::Method),
    (method::ITRUEDIV, Family::Div, Spelling::InPlace),
    (method::RTRUEDIV, Family::Div, Spelling::Reflected),
];

fn functions() -> [(crate::graph::FunctionRef, Family); 4] {
    [
        (functional::add(), Family::Add),
        (functional::sub(), Family::Sub),
        (functional::mul(), Family::Mul),
        (functional::div(), Family::Div),
    ]
}

fn classify(op: &OpKey) -> Option<(Family, Spelling)> {
    match op {
        OpKey::Method(name) => METHODS
            .iter()
            .find(|(candidate, _, _)| candidate == name)
            .map(|&(_, family, spelling)| (family, spelling)),
        OpKey::Function(func) => functions()
            .into_iter()
            .find(|(candidate, _)| candidate == func)
            .map(|(_, family)| (family, Spelling::Function)),
        OpKey::OpDef(_) => None,
    }
}

/// Rewrites subtract and divide into add and multiply over canonical operands.
#[derive(Debug, Clone)]
pub struct NormElemWise {
    pattern: Pattern,
}

impl NormElemWise {
    pub const NAME: &'static str = "NormElemWise";

    pub fn new() -> Self {
        let mut pattern = is_op(functional::add());
        for func in [functional::sub(), functional::mul(), functional::div()] {
            pattern |= is_op(func);
        }
        for (name, _, _) in METHODS {
            pattern |= is_op(name);
        }
        Self { pattern }
    }
}

impl Default for NormElemWise {
    fn default() -> Self {
        Self::new()
    }
}

/// Operands of a matched site, read as `left <op> right`.
struct Site {
    family: Family,
    left: NodeId,
    right: Operand,
    /// The operands were swapped to put a constant on the right: the site computes
    /// `right - left` (or `right / left`).
    reversed: bool,
}

impl NormElemWise {
    fn read_site(&self, graph: &Graph, expr: &Expr) -> Option<Site> {
        let mut matcher = PatternMatcher::new();
        if !matcher.matches(&self.pattern, expr) {
            return None;
        }
        let (family, spelling) = classify(matcher.matched_op()?)?;
        let canonical = spelling == Spelling::Method && matches!(family, Family::Add | Family::Mul);
        let inverse = matches!(family, Family::Sub | Family::Div);
        let is_lhs = |node: NodeId| expr.arg(0, functional::LHS) == Some(&Operand::Node(node));
        let is_constant = |node: NodeId| {
            graph
                .producer(node)
                .is_some_and(|producer| graph.is_constant_expr(producer))
        };

        let inputs = expr.inputs();
        let mut reversed = false;
        let (left, right) = match inputs[..] {
            [left] if !canonical => {
                let right = expr.const_operands().first().map(|&v| v.clone())?;
                if inverse
                    && (spelling == Spelling::Reflected
                        || (spelling == Spelling::Function && !is_lhs(left)))
                {
                    reversed = true;
                }
                (left, Operand::Value(right))
            }
            [first, second] if !canonical || is_constant(first) => {
                let (mut left, mut right) = (first, second);
                if inverse && spelling == Spelling::Reflected {
                    std::mem::swap(&mut left, &mut right);
                }
                if inverse && spelling == Spelling::Function && !is_lhs(left) {
                    std::mem::swap(&mut left, &mut right);
                }
                if is_constant(left) {
                    std::mem::swap(&mut left, &mut right);
                    reversed = true;
                }
                let right = match graph.const_value(right) {
                    Some(value) if is_constant(right) => Operand::Value(value.clone()),
                    _ => Operand::Node(right),
                };
                (left, right)
            }
            _ => return None,
        };
        Some(Site {
            family,
            left,
            right,
            reversed,
        })
    }
}

impl Pass for NormElemWise {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_passes(&self) -> &'static [&'static str] {
        &[FoldConstant::NAME]
    }

    fn run_once(&self) -> bool {
        false
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
        let Some(site) = self.read_site(graph, e) else {
            return Ok(Transform::Unchanged);
        };
        let Some(output) = e.output() else {
            return Ok(Transform::Unchanged);
        };
        let out_node = graph.node(output)?;
        let (name, kind) = (out_node.name.clone(), out_node.kind.symbolic());
        let left_kind = symbolic_kind(graph, site.left);

        // Inline constants are inverted up front; a value without a negation or
        // reciprocal leaves the site alone.
        let right = match (site.family, site.reversed, &site.right) {
            (Family::Sub, false, Operand::Value(value)) => match value.negated() {
                Some(value) => Operand::Value(value),
                None => return Ok(Transform::Unchanged),
            },
            (Family::Div, false, Operand::Value(value)) => match value.reciprocal() {
                Some(value) => Operand::Value(value),
                None => return Ok(Transform::Unchanged),
            },
            _ => site.right.clone(),
        };

        let out = graph.insert_exprs(Some(expr), |b| -> PassResult<NodeId> {
            let left = Operand::Node(site.left);
            let out = match (site.family, site.reversed) {
                (Family::Add, _) => b.call_method(method::ADD, vec![left, right], kind)?,
                (Family::Mul, _) => b.call_method(method::MUL, vec![left, right], kind)?,
                (Family::Sub, true) => {
                    let negated = b.call_function(functional::neg(), vec![left], left_kind)?;
                    b.call_method(method::ADD, vec![Operand::Node(negated), right], kind)?
                }
                (Family::Sub, false) => {
                    let right = match right {
                        Operand::Node(node) => {
                            let node_kind = symbolic_kind(b.graph(), node);
                            let negated = b.call_function(
                                functional::neg(),
                                vec![Operand::Node(node)],
                                node_kind,
                            )?;
                            Operand::Node(negated)
                        }
                        value => value,
                    };
                    b.call_method(method::ADD, vec![left, right], kind)?
                }
                (Family::Div, true) => {
                    let inverse = b.call_function(
                        functional::pow(),
                        vec![left, Operand::Value(Value::Int(-1))],
                        left_kind,
                    )?;
                    b.call_method(method::MUL, vec![Operand::Node(inverse), right], kind)?
                }
                (Family::Div, false) => {
                    let right = match right {
                        Operand::Node(node) => {
                            let node_kind = symbolic_kind(b.graph(), node);
                            let inverse = b.call_function(
                                functional::pow(),
                                vec![Operand::Node(node), Operand::Value(Value::Int(-1))],
                                node_kind,
                            )?;
                            Operand::Node(inverse)
                        }
                        value => value,
                    };
                    b.call_method(method::MUL, vec![left, right], kind)?
                }
            };
            b.rename(out, name)?;
            Ok(out)
        })?;

        graph.replace_node(&[(output, out)])?;
        let replacement = graph.producer(out);
        graph.compile()?;
        tracing::trace!(expr = %expr, old = %output, new = %out, "normalized elementwise site");
        Ok(replacement.map_or(Transform::Unchanged, Transform::Replaced))
    }
}

fn symbolic_kind(graph: &Graph, node: NodeId) -> NodeKind {
    graph
        .node(node)
        .map(|n| n.kind.symbolic())
        .unwrap_or(NodeKind::Object)
}
