mod graph_support;

use std::collections::BTreeMap;

use graph_support::{
    assert_close, call_method, f32_kind, f32_value, frozen_module, node, producer, push, push_kw,
    run_f32,
};
use test_case::test_case;
use traced_rs::graph::{FunctionRef, Graph, NodeId, Operand, Target, Value};
use traced_rs::ops::{functional, method};
use traced_rs::passes::{PassConfig, PassManager, PassRegistry, RunReport};
use traced_rs_eval_ref::RefEvaluator;

#[derive(Debug, Clone, Copy)]
enum Arg {
    X,
    Y,
    Int(i64),
    Float(f64),
}

impl Arg {
    fn operand(self, x: NodeId, y: NodeId) -> Operand {
        match self {
            Arg::X => node(x),
            Arg::Y => node(y),
            Arg::Int(v) => Operand::Value(Value::Int(v)),
            Arg::Float(v) => Operand::Value(Value::Float(v)),
        }
    }
}

fn normalize(graph: &mut Graph) -> anyhow::Result<RunReport> {
    let registry = PassRegistry::with_default_passes();
    let manager = PassManager::new(&registry, PassConfig::default());
    Ok(manager.run_passes(graph, &["NormElemWise"], &RefEvaluator)?)
}

fn feeds() -> [Value; 2] {
    [f32_value(&[2], &[2.0, 4.0]), f32_value(&[2], &[1.0, 8.0])]
}

fn binary_graph(target: Target, args: &[Arg], kwargs: &[(&str, Arg)]) -> anyhow::Result<Graph> {
    let mut graph = Graph::new("norm");
    let x = graph.add_input("x", f32_kind(&[2]));
    let y = graph.add_input("y", f32_kind(&[2]));
    let args = args.iter().map(|arg| arg.operand(x, y)).collect();
    let kwargs: BTreeMap<String, Operand> = kwargs
        .iter()
        .map(|(name, arg)| (name.to_string(), arg.operand(x, y)))
        .collect();
    let out = push_kw(&mut graph, target, args, kwargs, "out", f32_kind(&[2]))?;
    graph.set_outputs(vec![out])?;
    Ok(graph)
}

fn method_call(name: &str) -> Target {
    Target::CallMethod(name.to_string())
}

fn function_call(func: FunctionRef) -> Target {
    Target::CallFunction(func)
}

#[test_case(method_call(method::SUB), &[Arg::X, Arg::Y], &[]; "method sub")]
#[test_case(method_call(method::ISUB), &[Arg::X, Arg::Float(1.5)], &[]; "in place sub by value")]
#[test_case(method_call(method::RSUB), &[Arg::X, Arg::Y], &[]; "reflected sub")]
#[test_case(method_call(method::RSUB), &[Arg::X, Arg::Int(5)], &[]; "reflected sub by value")]
#[test_case(method_call(method::TRUEDIV), &[Arg::X, Arg::Y], &[]; "method div")]
#[test_case(method_call(method::ITRUEDIV), &[Arg::X, Arg::Int(4)], &[]; "in place div by value")]
#[test_case(method_call(method::RTRUEDIV), &[Arg::X, Arg::Y], &[]; "reflected div")]
#[test_case(method_call(method::RTRUEDIV), &[Arg::X, Arg::Float(3.0)], &[]; "reflected div by value")]
#[test_case(method_call(method::IADD), &[Arg::X, Arg::Y], &[]; "in place add")]
#[test_case(method_call(method::RMUL), &[Arg::X, Arg::Int(3)], &[]; "reflected mul by value")]
#[test_case(function_call(functional::sub()), &[Arg::X, Arg::Y], &[]; "function sub")]
#[test_case(function_call(functional::sub()), &[Arg::Int(5), Arg::X], &[]; "function sub from value")]
#[test_case(function_call(functional::div()), &[Arg::Y, Arg::X], &[]; "function div")]
#[test_case(function_call(functional::div()), &[Arg::X, Arg::Float(0.5)], &[]; "function div by value")]
#[test_case(function_call(functional::sub()), &[], &[("x", Arg::Int(5)), ("y", Arg::X)]; "keyword sub")]
#[test_case(function_call(functional::div()), &[], &[("y", Arg::X), ("x", Arg::Y)]; "keyword div")]
fn spellings_normalize_without_changing_results(
    target: Target,
    args: &[Arg],
    kwargs: &[(&str, Arg)],
) {
    check_spelling(target, args, kwargs).unwrap();
}

fn check_spelling(target: Target, args: &[Arg], kwargs: &[(&str, Arg)]) -> anyhow::Result<()> {
    let mut graph = binary_graph(target, args, kwargs)?;
    let expected = run_f32(&graph, &feeds());

    let report = normalize(&mut graph)?;
    assert!(report.stats("NormElemWise").is_some_and(|s| s.substitutions >= 1));

    let text = graph.to_string();
    assert!(!text.contains("sub") && !text.contains("div"), "{text}");
    let output = graph.outputs()[0];
    assert_eq!(graph.node(output)?.name, "out");
    assert_close(&run_f32(&graph, &feeds()), &expected);
    Ok(())
}

fn single_input(target: Target, args: &[Arg]) -> anyhow::Result<(Graph, NodeId)> {
    let mut graph = Graph::new("norm");
    let x = graph.add_input("x", f32_kind(&[2]));
    let args = args.iter().map(|arg| arg.operand(x, x)).collect();
    let out = push(&mut graph, target, args, "out", f32_kind(&[2]))?;
    graph.set_outputs(vec![out])?;
    Ok((graph, x))
}

#[test]
fn value_minus_tensor_becomes_negate_then_add() -> anyhow::Result<()> {
    let (mut graph, x) = single_input(method_call(method::RSUB), &[Arg::X, Arg::Int(5)])?;
    normalize(&mut graph)?;

    let out = graph.expr(producer(&graph, graph.outputs()[0]))?;
    assert_eq!(out.target, method_call(method::ADD));
    assert_eq!(out.args[1], Operand::Value(Value::Int(5)));
    let negated = out.args[0].as_node().expect("node operand");
    let negated = graph.expr(producer(&graph, negated))?;
    assert_eq!(negated.target, function_call(functional::neg()));
    assert_eq!(negated.args, vec![node(x)]);
    Ok(())
}

#[test]
fn value_over_tensor_becomes_inverse_then_mul() -> anyhow::Result<()> {
    let (mut graph, x) = single_input(function_call(functional::div()), &[Arg::Int(5), Arg::X])?;
    normalize(&mut graph)?;

    let out = graph.expr(producer(&graph, graph.outputs()[0]))?;
    assert_eq!(out.target, method_call(method::MUL));
    assert_eq!(out.args[1], Operand::Value(Value::Int(5)));
    let inverse = out.args[0].as_node().expect("node operand");
    let inverse = graph.expr(producer(&graph, inverse))?;
    assert_eq!(inverse.target, function_call(functional::pow()));
    assert_eq!(inverse.args, vec![node(x), Operand::Value(Value::Int(-1))]);
    Ok(())
}

#[test]
fn tensor_over_value_multiplies_by_the_reciprocal() -> anyhow::Result<()> {
    let (mut graph, x) = single_input(method_call(method::TRUEDIV), &[Arg::X, Arg::Int(4)])?;
    normalize(&mut graph)?;

    let out = graph.expr(producer(&graph, graph.outputs()[0]))?;
    assert_eq!(out.target, method_call(method::MUL));
    assert_eq!(out.args, vec![node(x), Operand::Value(Value::Float(0.25))]);
    Ok(())
}

#[test]
fn constant_nodes_move_to_the_right_as_values() -> anyhow::Result<()> {
    let mut graph = Graph::new("norm");
    let x = graph.add_input("x", f32_kind(&[2]));
    let module = graph.add_module_input("self", frozen_module(&[("c", f32_value(&[2], &[10.0, 20.0]))]));
    let c = push(
        &mut graph,
        Target::GetAttr("c".to_string()),
        vec![node(module)],
        "c",
        f32_kind(&[2]),
    )?;
    let out = call_method(&mut graph, method::SUB, vec![node(c), node(x)], "out")?;
    graph.set_outputs(vec![out])?;
    let feeds = [f32_value(&[2], &[1.0, 2.0])];
    let expected = run_f32(&graph, &feeds);

    normalize(&mut graph)?;

    let out = graph.expr(producer(&graph, graph.outputs()[0]))?;
    assert_eq!(out.target, method_call(method::ADD));
    assert_eq!(out.args[1], Operand::Value(f32_value(&[2], &[10.0, 20.0])));
    assert_close(&run_f32(&graph, &feeds), &expected);
    assert_close(&expected, &[vec![9.0, 18.0]]);
    Ok(())
}

#[test]
fn chained_sites_are_all_rewritten() -> anyhow::Result<()> {
    let mut graph = Graph::new("chain");
    let x = graph.add_input("x", f32_kind(&[2]));
    let y = graph.add_input("y", f32_kind(&[2]));
    let t = call_method(&mut graph, method::SUB, vec![node(x), node(y)], "t")?;
    let out = call_method(
        &mut graph,
        method::TRUEDIV,
        vec![node(t), Operand::Value(Value::Float(2.0))],
        "out",
    )?;
    graph.set_outputs(vec![out])?;
    let expected = run_f32(&graph, &feeds());

    let report = normalize(&mut graph)?;
    assert_eq!(report.stats("NormElemWise").map(|s| s.substitutions), Some(2));
    let text = graph.to_string();
    assert!(!text.contains("sub") && !text.contains("div"), "{text}");
    assert_close(&run_f32(&graph, &feeds()), &expected);
    assert_close(&expected, &[vec![0.5, -2.0]]);
    Ok(())
}

#[test]
fn normalizing_twice_changes_nothing() -> anyhow::Result<()> {
    let mut graph = binary_graph(method_call(method::RSUB), &[Arg::X, Arg::Y], &[])?;
    normalize(&mut graph)?;
    let before = graph.to_string();

    let report = normalize(&mut graph)?;
    assert_eq!(report.total().substitutions, 0);
    assert_eq!(graph.to_string(), before);
    Ok(())
}

#[test]
fn canonical_add_is_left_alone() -> anyhow::Result<()> {
    let mut graph = binary_graph(method_call(method::ADD), &[Arg::X, Arg::Y], &[])?;
    let before = graph.to_string();
    let report = normalize(&mut graph)?;
    assert_eq!(report.stats("NormElemWise").map(|s| s.substitutions), Some(0));
    assert_eq!(graph.to_string(), before);
    Ok(())
}
