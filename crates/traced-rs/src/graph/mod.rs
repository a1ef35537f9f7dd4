//! Arena-backed traced graph: nodes, expressions, scoped insertion,
//! node replacement and recompilation.

pub mod builder;
pub mod expr;
pub mod module;
pub mod spec;
pub mod value;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

pub use builder::InsertBuilder;
pub use expr::{
    ElemwiseMode, Expr, ExprId, FunctionRef, Node, NodeId, NodeKind, OpDef, OpDefKind, Operand,
    Target,
};
pub use module::{Attr, ModuleId, ModuleKey, ModuleState, ModuleTable};
pub use spec::{DType, DimSymbol, Dimension, QParams, Shape, TensorMeta, TensorSpec};
pub use value::{HostTensor, TensorData, Value};

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("expression {expr} is not live in the graph")]
    DeadExpr { expr: ExprId },
    #[error("node {node} is not live in the graph")]
    DeadNode { node: NodeId },
    #[error("module handle {} is not registered", module.0)]
    UnknownModule { module: ModuleId },
    #[error("module `{module}` has no attribute `{path}`")]
    MissingAttribute { module: ModuleKey, path: String },
    #[error("cannot replace {old} with {new}: {reason}")]
    InvalidReplacement {
        old: NodeId,
        new: NodeId,
        reason: &'static str,
    },
    #[error("graph contains a cycle through {remaining} expression(s)")]
    CyclicGraph { remaining: usize },
}

/// A traced computation graph.
///
/// Expressions and nodes live in append-only arenas; removal leaves a tombstone so
/// ids stay stable across edits. `order` holds the live expressions in execution
/// order and is re-derived by [`Graph::compile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    name: String,
    nodes: Vec<Option<Node>>,
    exprs: Vec<Option<Expr>>,
    order: Vec<ExprId>,
    inputs: Vec<NodeId>,
    outputs: Vec<NodeId>,
    #[serde(default)]
    modules: ModuleTable,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            exprs: Vec::new(),
            order: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            modules: ModuleTable::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares a graph input. Inputs are always kept by [`Graph::compile`].
    pub fn add_input(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let expr = self.alloc_expr(Target::Input, Vec::new(), BTreeMap::new());
        let node = self.alloc_node(name.into(), kind, expr);
        if let Some(Some(slot)) = self.exprs.get_mut(expr.0 as usize) {
            slot.outputs.push(node);
        }
        self.order.push(expr);
        self.inputs.push(node);
        node
    }

    pub fn add_module(&mut self, state: ModuleState) -> ModuleId {
        self.modules.insert(state)
    }

    /// Registers `state` and declares an input node holding its handle.
    pub fn add_module_input(&mut self, name: impl Into<String>, state: ModuleState) -> NodeId {
        let module = self.add_module(state);
        self.add_input(name, NodeKind::Module(module))
    }

    pub fn modules(&self) -> &ModuleTable {
        &self.modules
    }

    pub fn modules_mut(&mut self) -> &mut ModuleTable {
        &mut self.modules
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn set_outputs(&mut self, outputs: Vec<NodeId>) -> GraphResult<()> {
        for &node in &outputs {
            self.node(node)?;
        }
        self.outputs = outputs;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> GraphResult<&Node> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(GraphError::DeadNode { node: id })
    }

    pub fn expr(&self, id: ExprId) -> GraphResult<&Expr> {
        self.exprs
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(GraphError::DeadExpr { expr: id })
    }

    fn expr_mut(&mut self, id: ExprId) -> GraphResult<&mut Expr> {
        self.exprs
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(GraphError::DeadExpr { expr: id })
    }

    fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut Node> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(GraphError::DeadNode { node: id })
    }

    pub fn contains_expr(&self, id: ExprId) -> bool {
        self.expr(id).is_ok()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// Live expressions in execution order.
    pub fn order(&self) -> &[ExprId] {
        &self.order
    }

    /// Snapshot of the current execution order.
    pub fn exprs_in_order(&self) -> Vec<ExprId> {
        self.order.clone()
    }

    pub fn expr_count(&self) -> usize {
        self.order.len()
    }

    pub fn producer(&self, node: NodeId) -> Option<ExprId> {
        self.node(node).ok().and_then(Node::producer)
    }

    pub fn users(&self, node: NodeId) -> &[ExprId] {
        self.node(node).map(Node::users).unwrap_or(&[])
    }

    /// Returns `true` when `expr` materializes a literal.
    pub fn is_constant_expr(&self, expr: ExprId) -> bool {
        matches!(self.expr(expr), Ok(e) if e.target == Target::Constant)
    }

    /// Concrete value carried by a constant node.
    pub fn const_value(&self, node: NodeId) -> Option<&Value> {
        match &self.node(node).ok()?.kind {
            NodeKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn set_node_name(&mut self, node: NodeId, name: impl Into<String>) -> GraphResult<()> {
        self.node_mut(node)?.name = name.into();
        Ok(())
    }

    /// Rewrites the operands of `expr`, keeping the user index in sync.
    pub fn set_operands(
        &mut self,
        expr: ExprId,
        args: Vec<Operand>,
        kwargs: BTreeMap<String, Operand>,
    ) -> GraphResult<()> {
        for node in args.iter().chain(kwargs.values()).filter_map(Operand::as_node) {
            self.node(node)?;
        }
        let previous = self.expr(expr)?.inputs();
        for node in previous {
            if let Ok(slot) = self.node_mut(node) {
                slot.users.retain(|user| *user != expr);
            }
        }
        let slot = self.expr_mut(expr)?;
        slot.args = args;
        slot.kwargs = kwargs;
        let current = slot.inputs();
        self.register_uses(expr, &current);
        Ok(())
    }

    /// Adds an output node to `expr` at `index` (clamped to the current output count).
    pub fn insert_output(
        &mut self,
        expr: ExprId,
        index: usize,
        name: impl Into<String>,
        kind: NodeKind,
    ) -> GraphResult<NodeId> {
        self.expr(expr)?;
        let node = self.alloc_node(name.into(), kind, expr);
        let slot = self.expr_mut(expr)?;
        let index = index.min(slot.outputs.len());
        slot.outputs.insert(index, node);
        Ok(node)
    }

    /// Opens an insertion scope anchored before `anchor` (or at the end of the graph).
    ///
    /// Expressions created through the builder are spliced into the execution order
    /// once `build` returns, in creation order. New nodes have no consumers until
    /// [`Graph::replace_node`] wires them in.
    pub fn insert_exprs<R, E>(
        &mut self,
        anchor: Option<ExprId>,
        build: impl FnOnce(&mut InsertBuilder<'_>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<GraphError>,
    {
        if let Some(anchor) = anchor {
            self.expr(anchor)?;
        }
        let mut builder = InsertBuilder::new(self);
        let result = build(&mut builder);
        let created = builder.into_created();
        self.splice(anchor, &created);
        result
    }

    /// Repoints every use of each `old` node (operands and graph outputs) to its `new` node.
    ///
    /// Returns the number of rewired operand sites. The old producers stay in place
    /// until [`Graph::compile`] prunes them.
    pub fn replace_node(&mut self, mapping: &[(NodeId, NodeId)]) -> GraphResult<usize> {
        for &(old, new) in mapping {
            self.node(old)?;
            let replacement = self.node(new)?;
            if old == new {
                return Err(GraphError::InvalidReplacement {
                    old,
                    new,
                    reason: "node cannot replace itself",
                });
            }
            match replacement.producer {
                Some(producer) if self.contains_expr(producer) => {}
                _ => {
                    return Err(GraphError::InvalidReplacement {
                        old,
                        new,
                        reason: "replacement has no live producer",
                    })
                }
            }
            if self.depends_on(new, old) {
                return Err(GraphError::InvalidReplacement {
                    old,
                    new,
                    reason: "replacement is computed from the replaced node",
                });
            }
        }

        let mut rewired = 0;
        for &(old, new) in mapping {
            let users: Vec<ExprId> = self.node(old)?.users.to_vec();
            for user in users {
                let expr = self.expr_mut(user)?;
                for operand in expr.operands_mut() {
                    if *operand == Operand::Node(old) {
                        *operand = Operand::Node(new);
                        rewired += 1;
                    }
                }
                let new_slot = self.node_mut(new)?;
                if !new_slot.users.contains(&user) {
                    new_slot.users.push(user);
                }
            }
            self.node_mut(old)?.users.clear();
            for output in self.outputs.iter_mut().filter(|output| **output == old) {
                *output = new;
            }
        }
        Ok(rewired)
    }

    /// Prunes expressions unreachable from the graph outputs, re-derives a stable
    /// topological order and rebuilds the user index. Returns the number of erased
    /// expressions. Idempotent.
    pub fn compile(&mut self) -> GraphResult<usize> {
        let mut live: HashSet<ExprId> = HashSet::with_capacity(self.order.len());
        let mut worklist: Vec<ExprId> = Vec::new();
        for &node in self.outputs.iter().chain(self.inputs.iter()) {
            if let Some(producer) = self.producer(node) {
                worklist.push(producer);
            }
        }
        while let Some(expr) = worklist.pop() {
            if !live.insert(expr) {
                continue;
            }
            for input in self.expr(expr)?.inputs() {
                match self.producer(input) {
                    Some(producer) => worklist.push(producer),
                    None => return Err(GraphError::DeadNode { node: input }),
                }
            }
        }

        let mut erased = 0;
        for index in 0..self.exprs.len() {
            let id = ExprId(index as u32);
            if live.contains(&id) {
                continue;
            }
            if let Some(expr) = self.exprs[index].take() {
                for node in expr.outputs {
                    if let Some(slot) = self.nodes.get_mut(node.0 as usize) {
                        *slot = None;
                    }
                }
                erased += 1;
            }
        }

        self.order = self.topological_order(&live)?;
        self.rebuild_users();
        Ok(erased)
    }

    /// Kahn's algorithm over live expressions, preferring the previous relative order.
    fn topological_order(&self, live: &HashSet<ExprId>) -> GraphResult<Vec<ExprId>> {
        let mut position: HashMap<ExprId, usize> = HashMap::with_capacity(live.len());
        for (pos, &expr) in self.order.iter().enumerate() {
            if live.contains(&expr) {
                position.insert(expr, pos);
            }
        }
        // Live expressions missing from the order (never spliced) go last, by id.
        let mut stragglers: Vec<ExprId> = live
            .iter()
            .copied()
            .filter(|expr| !position.contains_key(expr))
            .collect();
        stragglers.sort();
        let base = self.order.len();
        for (offset, expr) in stragglers.into_iter().enumerate() {
            position.insert(expr, base + offset);
        }

        let mut indegree: HashMap<ExprId, usize> = HashMap::with_capacity(live.len());
        let mut dependents: HashMap<ExprId, Vec<ExprId>> = HashMap::new();
        for &expr in live {
            let mut deps: SmallVec<[ExprId; 4]> = SmallVec::new();
            for input in self.expr(expr)?.inputs() {
                if let Some(producer) = self.producer(input) {
                    if !deps.contains(&producer) {
                        deps.push(producer);
                    }
                }
            }
            indegree.insert(expr, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(expr);
            }
        }

        let mut ready: BinaryHeap<Reverse<(usize, ExprId)>> = indegree
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&expr, _)| Reverse((position[&expr], expr)))
            .collect();
        let mut order = Vec::with_capacity(live.len());
        while let Some(Reverse((_, expr))) = ready.pop() {
            order.push(expr);
            for &next in dependents.get(&expr).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(count) = indegree.get_mut(&next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse((position[&next], next)));
                    }
                }
            }
        }
        if order.len() != live.len() {
            return Err(GraphError::CyclicGraph {
                remaining: live.len() - order.len(),
            });
        }
        Ok(order)
    }

    fn rebuild_users(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.users.clear();
        }
        for index in 0..self.order.len() {
            let expr = self.order[index];
            let inputs = match self.expr(expr) {
                Ok(e) => e.inputs(),
                Err(_) => continue,
            };
            self.register_uses(expr, &inputs);
        }
    }

    fn register_uses(&mut self, expr: ExprId, inputs: &[NodeId]) {
        for &input in inputs {
            if let Ok(node) = self.node_mut(input) {
                if !node.users.contains(&expr) {
                    node.users.push(expr);
                }
            }
        }
    }

    /// Returns `true` when `node` is computed (transitively) from `ancestor`.
    fn depends_on(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut seen: HashSet<ExprId> = HashSet::new();
        let mut worklist: Vec<NodeId> = vec![node];
        while let Some(current) = worklist.pop() {
            if current == ancestor {
                return true;
            }
            let Some(producer) = self.producer(current) else {
                continue;
            };
            if !seen.insert(producer) {
                continue;
            }
            if let Ok(expr) = self.expr(producer) {
                worklist.extend(expr.inputs());
            }
        }
        false
    }

    fn splice(&mut self, anchor: Option<ExprId>, created: &[ExprId]) {
        if created.is_empty() {
            return;
        }
        let at = anchor
            .and_then(|anchor| self.order.iter().position(|expr| *expr == anchor))
            .unwrap_or(self.order.len());
        self.order.splice(at..at, created.iter().copied());
    }

    pub(crate) fn alloc_expr(
        &mut self,
        target: Target,
        args: Vec<Operand>,
        kwargs: BTreeMap<String, Operand>,
    ) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(Some(Expr {
            target,
            args,
            kwargs,
            outputs: Vec::new(),
        }));
        let inputs = self.exprs[id.0 as usize]
            .as_ref()
            .map(Expr::inputs)
            .unwrap_or_default();
        self.register_uses(id, &inputs);
        id
    }

    pub(crate) fn alloc_node(&mut self, name: String, kind: NodeKind, producer: ExprId) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(Node {
            name,
            kind,
            producer: Some(producer),
            users: SmallVec::new(),
        }));
        id
    }

    pub(crate) fn next_node_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph @{} {{", self.name)?;
        for &id in &self.order {
            let Ok(expr) = self.expr(id) else {
                continue;
            };
            let mut outputs = Vec::with_capacity(expr.outputs.len());
            let mut kinds = Vec::with_capacity(expr.outputs.len());
            for &output in &expr.outputs {
                match self.node(output) {
                    Ok(node) => {
                        outputs.push(format!("{output}:{}", node.name));
                        kinds.push(node.kind.to_string());
                    }
                    Err(_) => outputs.push(format!("{output}:<dead>")),
                }
            }
            let mut operands: Vec<String> = expr.args.iter().map(ToString::to_string).collect();
            operands.extend(
                expr.kwargs
                    .iter()
                    .map(|(name, operand)| format!("{name}={operand}")),
            );
            writeln!(
                f,
                "  {} = {}({}) : {}",
                outputs.join(", "),
                expr.target,
                operands.join(", "),
                kinds.join(", ")
            )?;
        }
        let outputs: Vec<String> = self.outputs.iter().map(ToString::to_string).collect();
        writeln!(f, "  return {}", outputs.join(", "))?;
        f.write_str("}")
    }
}
