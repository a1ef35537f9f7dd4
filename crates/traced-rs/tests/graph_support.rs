#![allow(dead_code)]

use std::collections::BTreeMap;

use traced_rs::eval::execute;
use traced_rs::graph::{
    DType, ExprId, FunctionRef, Graph, GraphError, HostTensor, ModuleKey, ModuleState, NodeId,
    NodeKind, Operand, Shape, Target, TensorMeta, Value,
};
use traced_rs_eval_ref::RefEvaluator;

pub fn f32_kind(dims: &[usize]) -> NodeKind {
    NodeKind::Tensor(TensorMeta::new(DType::F32, Shape::from_static(dims)))
}

pub fn f32_value(dims: &[usize], values: &[f32]) -> Value {
    Value::Tensor(HostTensor::from_f32(dims, values.to_vec()))
}

pub fn node(id: NodeId) -> Operand {
    Operand::Node(id)
}

pub fn int(value: i64) -> Operand {
    Operand::Value(Value::Int(value))
}

/// Appends `target(args)` with a single named output.
pub fn push(
    graph: &mut Graph,
    target: Target,
    args: Vec<Operand>,
    name: &str,
    kind: NodeKind,
) -> Result<NodeId, GraphError> {
    push_kw(graph, target, args, BTreeMap::new(), name, kind)
}

pub fn push_kw(
    graph: &mut Graph,
    target: Target,
    args: Vec<Operand>,
    kwargs: BTreeMap<String, Operand>,
    name: &str,
    kind: NodeKind,
) -> Result<NodeId, GraphError> {
    graph.insert_exprs(None, |b| {
        let expr = b.push(target, args, kwargs, vec![(name.to_string(), kind)])?;
        Ok(b.graph().expr(expr)?.outputs[0])
    })
}

pub fn call(
    graph: &mut Graph,
    func: FunctionRef,
    args: Vec<Operand>,
    name: &str,
) -> Result<NodeId, GraphError> {
    push(graph, Target::CallFunction(func), args, name, f32_kind(&[2]))
}

pub fn call_method(
    graph: &mut Graph,
    method: &str,
    args: Vec<Operand>,
    name: &str,
) -> Result<NodeId, GraphError> {
    push(
        graph,
        Target::CallMethod(method.to_string()),
        args,
        name,
        f32_kind(&[2]),
    )
}

pub fn producer(graph: &Graph, node: NodeId) -> ExprId {
    graph.producer(node).expect("node has a producer")
}

pub fn frozen_module(attrs: &[(&str, Value)]) -> ModuleState {
    attrs.iter().fold(
        ModuleState::new(ModuleKey::new("module.frozen", "Frozen")),
        |state, (name, value)| state.with_attr(*name, value.clone()),
    )
}

/// `c = a + 1` where `a` is read from a frozen module holding 3.
pub fn attr_add_graph() -> Result<(Graph, NodeId), GraphError> {
    let mut graph = Graph::new("attr_add");
    let module = graph.add_module_input(
        "self",
        frozen_module(&[("a", Value::Tensor(HostTensor::scalar_f32(3.0)))]),
    );
    let a = push(
        &mut graph,
        Target::GetAttr("a".to_string()),
        vec![node(module)],
        "a",
        f32_kind(&[]),
    )?;
    let c = push(
        &mut graph,
        Target::CallFunction(traced_rs::ops::functional::add()),
        vec![node(a), int(1)],
        "c",
        f32_kind(&[]),
    )?;
    graph.set_outputs(vec![c])?;
    Ok((graph, c))
}

/// Runs `graph` on the reference evaluator and flattens the outputs to f32.
pub fn run_f32(graph: &Graph, feeds: &[Value]) -> Vec<Vec<f32>> {
    execute(graph, &RefEvaluator, feeds)
        .expect("graph executes")
        .iter()
        .map(|value| match value {
            Value::Tensor(tensor) => tensor.to_f32_vec(),
            Value::Int(v) => vec![*v as f32],
            Value::Float(v) => vec![*v as f32],
            other => panic!("non-numeric output {other}"),
        })
        .collect()
}

pub fn assert_close(actual: &[Vec<f32>], expected: &[Vec<f32>]) {
    assert_eq!(actual.len(), expected.len(), "output count");
    for (a, e) in actual.iter().zip(expected) {
        assert_eq!(a.len(), e.len(), "element count");
        for (x, y) in a.iter().zip(e) {
            assert!((x - y).abs() <= 1e-5, "{actual:?} != {expected:?}");
        }
    }
}
