use std::collections::BTreeMap;

use super::expr::{ExprId, FunctionRef, NodeId, NodeKind, OpDef, Operand, Target};
use super::value::Value;
use super::{Graph, GraphError, GraphResult};

/// Builder handed to [`Graph::insert_exprs`] closures.
///
/// Every expression created here is recorded and spliced into the execution order
/// when the scope closes. Output nodes are named `{hint}_{id}` unless renamed.
pub struct InsertBuilder<'g> {
    graph: &'g mut Graph,
    created: Vec<ExprId>,
}

impl<'g> InsertBuilder<'g> {
    pub(super) fn new(graph: &'g mut Graph) -> Self {
        Self {
            graph,
            created: Vec::new(),
        }
    }

    pub(super) fn into_created(self) -> Vec<ExprId> {
        self.created
    }

    /// Read access to the graph being edited.
    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Expressions created so far in this scope, in creation order.
    pub fn created(&self) -> &[ExprId] {
        &self.created
    }

    /// Creates an expression with explicitly named outputs.
    pub fn push(
        &mut self,
        target: Target,
        args: Vec<Operand>,
        kwargs: BTreeMap<String, Operand>,
        outputs: Vec<(String, NodeKind)>,
    ) -> GraphResult<ExprId> {
        for node in args.iter().chain(kwargs.values()).filter_map(Operand::as_node) {
            self.graph.node(node)?;
        }
        let expr = self.graph.alloc_expr(target, args, kwargs);
        let mut nodes = Vec::with_capacity(outputs.len());
        for (name, kind) in outputs {
            nodes.push(self.graph.alloc_node(name, kind, expr));
        }
        if let Some(Some(slot)) = self.graph.exprs.get_mut(expr.0 as usize) {
            slot.outputs = nodes;
        }
        self.created.push(expr);
        Ok(expr)
    }

    fn push_single(
        &mut self,
        hint: &str,
        target: Target,
        args: Vec<Operand>,
        kwargs: BTreeMap<String, Operand>,
        kind: NodeKind,
    ) -> GraphResult<NodeId> {
        let name = format!("{hint}_{}", self.graph.next_node_id().0);
        let expr = self.push(target, args, kwargs, vec![(name, kind)])?;
        self.graph
            .expr(expr)?
            .output()
            .ok_or(GraphError::DeadExpr { expr })
    }

    /// Materializes `value` as a constant node.
    pub fn constant(&mut self, value: Value) -> GraphResult<NodeId> {
        let kind = NodeKind::Constant(value);
        self.push_single("const", Target::Constant, Vec::new(), BTreeMap::new(), kind)
    }

    pub fn call_function(
        &mut self,
        func: FunctionRef,
        args: Vec<Operand>,
        kind: NodeKind,
    ) -> GraphResult<NodeId> {
        let hint = func.name.clone();
        self.push_single(&hint, Target::CallFunction(func), args, BTreeMap::new(), kind)
    }

    /// Calls a bound method; `args[0]` is the receiver.
    pub fn call_method(
        &mut self,
        method: &str,
        args: Vec<Operand>,
        kind: NodeKind,
    ) -> GraphResult<NodeId> {
        let hint = method.trim_matches('_');
        self.push_single(
            hint,
            Target::CallMethod(method.to_string()),
            args,
            BTreeMap::new(),
            kind,
        )
    }

    pub fn apply(&mut self, op: OpDef, args: Vec<Operand>, kind: NodeKind) -> GraphResult<NodeId> {
        let hint = op.kind().to_string().to_lowercase();
        self.push_single(&hint, Target::Apply(op), args, BTreeMap::new(), kind)
    }

    pub fn get_attr(&mut self, module: NodeId, path: &str, kind: NodeKind) -> GraphResult<NodeId> {
        let hint = path.rsplit('.').next().unwrap_or(path).to_string();
        self.push_single(
            &hint,
            Target::GetAttr(path.to_string()),
            vec![Operand::Node(module)],
            BTreeMap::new(),
            kind,
        )
    }

    pub fn call_module(
        &mut self,
        module: NodeId,
        args: Vec<Operand>,
        kind: NodeKind,
    ) -> GraphResult<NodeId> {
        let mut operands = Vec::with_capacity(args.len() + 1);
        operands.push(Operand::Node(module));
        operands.extend(args);
        self.push_single("out", Target::CallModule, operands, BTreeMap::new(), kind)
    }

    pub fn rename(&mut self, node: NodeId, name: impl Into<String>) -> GraphResult<()> {
        self.graph.set_node_name(node, name)
    }
}
