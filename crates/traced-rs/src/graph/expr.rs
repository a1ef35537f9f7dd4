use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::module::ModuleId;
use super::spec::TensorMeta;
use super::value::Value;

/// Stable arena index of a node. Indices are never reused within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Stable arena index of an expression. Indices are never reused within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Symbolic tensor; value known only at execution time.
    Tensor(TensorMeta),
    /// Concrete value, only ever produced by a `Target::Constant` expression.
    Constant(Value),
    /// Handle to a frozen module state.
    Module(ModuleId),
    /// Symbolic non-tensor value.
    Object,
}

impl NodeKind {
    pub fn is_tensor(&self) -> bool {
        match self {
            NodeKind::Tensor(_) => true,
            NodeKind::Constant(value) => value.is_tensor(),
            NodeKind::Module(_) | NodeKind::Object => false,
        }
    }

    /// Tensor metadata, derived from the payload for constant tensors.
    pub fn tensor_meta(&self) -> Option<TensorMeta> {
        match self {
            NodeKind::Tensor(meta) => Some(meta.clone()),
            NodeKind::Constant(Value::Tensor(tensor)) => Some(tensor.meta()),
            _ => None,
        }
    }

    /// Kind of a symbolic value derived from this one (same tensor metadata, no payload).
    pub fn symbolic(&self) -> NodeKind {
        match self.tensor_meta() {
            Some(meta) => NodeKind::Tensor(meta),
            None => NodeKind::Object,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Tensor(meta) => write!(f, "{meta}"),
            NodeKind::Constant(value) => write!(f, "const {value}"),
            NodeKind::Module(id) => write!(f, "module<{}>", id.0),
            NodeKind::Object => f.write_str("object"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub(crate) producer: Option<ExprId>,
    pub(crate) users: SmallVec<[ExprId; 4]>,
}

impl Node {
    /// Expression that produced this node.
    pub fn producer(&self) -> Option<ExprId> {
        self.producer
    }

    /// Expressions consuming this node, in no particular order.
    pub fn users(&self) -> &[ExprId] {
        &self.users
    }
}

/// An expression argument: either a graph node or an inline concrete value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Node(NodeId),
    Value(Value),
}

impl Operand {
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Operand::Node(node) => Some(*node),
            Operand::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Operand::Value(value) => Some(value),
            Operand::Node(_) => None,
        }
    }
}

impl From<NodeId> for Operand {
    fn from(node: NodeId) -> Self {
        Operand::Node(node)
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Node(node) => write!(f, "{node}"),
            Operand::Value(value) => write!(f, "{value}"),
        }
    }
}

/// Identity of a free function: defining module path plus function name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionRef {
    pub module: String,
    pub name: String,
}

impl FunctionRef {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemwiseMode {
    Add,
    Sub,
    Mul,
    TrueDiv,
    Neg,
    Pow,
}

/// Operator-definition objects applied by `Target::Apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpDef {
    GetVarShape { axis: Option<i32> },
    Elemwise { mode: ElemwiseMode },
    BatchNorm { epsilon: f32, momentum: f32 },
    Other { name: String },
}

/// Type of an [`OpDef`]; opdefs compare by kind, never by their parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpDefKind {
    GetVarShape,
    Elemwise,
    BatchNorm,
    Other(String),
}

impl OpDef {
    pub fn kind(&self) -> OpDefKind {
        match self {
            OpDef::GetVarShape { .. } => OpDefKind::GetVarShape,
            OpDef::Elemwise { .. } => OpDefKind::Elemwise,
            OpDef::BatchNorm { .. } => OpDefKind::BatchNorm,
            OpDef::Other { name } => OpDefKind::Other(name.clone()),
        }
    }
}

impl fmt::Display for OpDefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpDefKind::GetVarShape => f.write_str("GetVarShape"),
            OpDefKind::Elemwise => f.write_str("Elemwise"),
            OpDefKind::BatchNorm => f.write_str("BatchNorm"),
            OpDefKind::Other(name) => f.write_str(name),
        }
    }
}

/// Operation identity of an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    /// Graph input placeholder.
    Input,
    /// Materialized literal; its single output is a `NodeKind::Constant`.
    Constant,
    /// Reads a dotted attribute path from the module passed as the first argument.
    GetAttr(String),
    CallFunction(FunctionRef),
    /// Bound-method call; the receiver is the first argument.
    CallMethod(String),
    /// Calls the module passed as the first argument.
    CallModule,
    Apply(OpDef),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Input => f.write_str("input"),
            Target::Constant => f.write_str("const"),
            Target::GetAttr(path) => write!(f, "getattr .{path}"),
            Target::CallFunction(func) => write!(f, "call {func}"),
            Target::CallMethod(name) => write!(f, "call_method {name}"),
            Target::CallModule => f.write_str("call_module"),
            Target::Apply(op) => write!(f, "apply {}", op.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub target: Target,
    pub args: Vec<Operand>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Operand>,
    pub outputs: Vec<NodeId>,
}

impl Expr {
    /// Node operands in order: positional first, then keyword (by name).
    pub fn inputs(&self) -> Vec<NodeId> {
        self.operands().filter_map(Operand::as_node).collect()
    }

    /// Inline constant operands in the same order as [`Expr::inputs`].
    pub fn const_operands(&self) -> Vec<&Value> {
        self.operands().filter_map(Operand::as_value).collect()
    }

    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        self.args.iter().chain(self.kwargs.values())
    }

    pub(crate) fn operands_mut(&mut self) -> impl Iterator<Item = &mut Operand> {
        self.args.iter_mut().chain(self.kwargs.values_mut())
    }

    /// Looks up an argument by keyword first, then by position.
    pub fn arg(&self, index: usize, name: &str) -> Option<&Operand> {
        self.kwargs.get(name).or_else(|| self.args.get(index))
    }

    pub fn output(&self) -> Option<NodeId> {
        self.outputs.first().copied()
    }

    pub fn uses(&self, node: NodeId) -> bool {
        self.operands().any(|operand| operand.as_node() == Some(node))
    }
}
