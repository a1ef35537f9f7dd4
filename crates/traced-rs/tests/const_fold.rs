mod graph_support;

use graph_support::{
    assert_close, attr_add_graph, f32_kind, f32_value, frozen_module, node, producer, push,
    run_f32,
};
use traced_rs::graph::{
    DType, Dimension, FunctionRef, Graph, HostTensor, NodeKind, OpDef, Operand, Shape, Target,
    TensorMeta, Value,
};
use traced_rs::ops::functional;
use traced_rs::passes::{PassConfig, PassError, PassManager, PassRegistry, RunReport};
use traced_rs_eval_ref::RefEvaluator;

fn run(graph: &mut Graph, passes: &[&str]) -> Result<RunReport, PassError> {
    let registry = PassRegistry::with_default_passes();
    PassManager::new(&registry, PassConfig::default()).run_passes(graph, passes, &RefEvaluator)
}

fn i32_kind(len: usize) -> NodeKind {
    NodeKind::Tensor(TensorMeta::new(DType::Si32, Shape::from_static(&[len])))
}

#[test]
fn attribute_arithmetic_folds_to_a_named_constant() -> anyhow::Result<()> {
    let (mut graph, _) = attr_add_graph()?;
    run(&mut graph, &["FoldConstant"])?;

    let output = graph.outputs()[0];
    assert_eq!(graph.node(output)?.name, "c");
    assert_eq!(
        graph.const_value(output),
        Some(&Value::Tensor(HostTensor::scalar_f32(4.0)))
    );
    // Only the module input and the folded constant remain.
    assert_eq!(graph.expr_count(), 2);
    assert!(graph.is_constant_expr(producer(&graph, output)));
    Ok(())
}

#[test]
fn folding_twice_changes_nothing() -> anyhow::Result<()> {
    let (mut graph, _) = attr_add_graph()?;
    run(&mut graph, &["FoldConstant"])?;
    let before = graph.to_string();

    let report = run(&mut graph, &["FoldConstant"])?;
    assert_eq!(report.total().substitutions, 0);
    assert_eq!(graph.to_string(), before);
    Ok(())
}

#[test]
fn folding_stops_at_runtime_inputs() -> anyhow::Result<()> {
    let mut graph = Graph::new("partial");
    let x = graph.add_input("x", f32_kind(&[2]));
    let module = graph.add_module_input("self", frozen_module(&[("w", f32_value(&[2], &[1.0, 2.0]))]));
    let w = push(
        &mut graph,
        Target::GetAttr("w".to_string()),
        vec![node(module)],
        "w",
        f32_kind(&[2]),
    )?;
    let b = push(
        &mut graph,
        Target::CallFunction(functional::mul()),
        vec![node(w), Operand::Value(Value::Float(2.0))],
        "b",
        f32_kind(&[2]),
    )?;
    let d = push(
        &mut graph,
        Target::CallFunction(functional::add()),
        vec![node(x), node(b)],
        "d",
        f32_kind(&[2]),
    )?;
    graph.set_outputs(vec![d])?;
    let feeds = [f32_value(&[2], &[1.0, 1.0])];
    let expected = run_f32(&graph, &feeds);

    run(&mut graph, &["FoldConstant"])?;

    let d_expr = graph.expr(producer(&graph, d))?;
    assert_eq!(d_expr.target, Target::CallFunction(functional::add()));
    let folded = d_expr.inputs()[1];
    assert_eq!(graph.node(folded)?.name, "b");
    assert_eq!(
        graph.const_value(folded),
        Some(&f32_value(&[2], &[2.0, 4.0]))
    );
    assert_close(&run_f32(&graph, &feeds), &expected);
    assert_close(&expected, &[vec![3.0, 5.0]]);
    Ok(())
}

#[test]
fn non_tensor_attributes_are_left_alone() -> anyhow::Result<()> {
    let mut graph = Graph::new("object_attr");
    let module = graph.add_module_input("self", frozen_module(&[("scale", Value::Float(2.0))]));
    let scale = push(
        &mut graph,
        Target::GetAttr("scale".to_string()),
        vec![node(module)],
        "scale",
        NodeKind::Object,
    )?;
    graph.set_outputs(vec![scale])?;

    let report = run(&mut graph, &["AttrToConstant"])?;
    assert_eq!(report.total().substitutions, 0);
    let target = &graph.expr(producer(&graph, scale))?.target;
    assert_eq!(*target, Target::GetAttr("scale".to_string()));
    Ok(())
}

fn shape_graph(input: Shape, axis: Option<i32>, out_len: usize) -> anyhow::Result<Graph> {
    let mut graph = Graph::new("shape");
    let x = graph.add_input("x", NodeKind::Tensor(TensorMeta::new(DType::F32, input)));
    let s = push(
        &mut graph,
        Target::Apply(OpDef::GetVarShape { axis }),
        vec![node(x)],
        "s",
        i32_kind(out_len),
    )?;
    graph.set_outputs(vec![s])?;
    Ok(graph)
}

#[test]
fn static_shape_queries_become_int_constants() -> anyhow::Result<()> {
    let mut graph = shape_graph(Shape::from_static(&[2, 3]), None, 2)?;
    run(&mut graph, &["FixInputShape"])?;
    let output = graph.outputs()[0];
    assert_eq!(graph.node(output)?.name, "s");
    assert_eq!(
        graph.const_value(output),
        Some(&Value::Tensor(HostTensor::from_i32(vec![2], vec![2, 3])))
    );

    let mut graph = shape_graph(Shape::from_static(&[2, 3]), Some(-1), 1)?;
    run(&mut graph, &["FixInputShape"])?;
    assert_eq!(
        graph.const_value(graph.outputs()[0]),
        Some(&Value::Tensor(HostTensor::from_i32(vec![1], vec![3])))
    );
    Ok(())
}

#[test]
fn dynamic_or_out_of_range_shape_queries_are_kept() -> anyhow::Result<()> {
    let dynamic = Shape::new(vec![Dimension::dynamic("B"), Dimension::Static(3)]);
    let mut graph = shape_graph(dynamic, None, 2)?;
    let report = run(&mut graph, &["FixInputShape"])?;
    assert_eq!(report.total().substitutions, 0);
    assert!(graph.const_value(graph.outputs()[0]).is_none());

    let mut graph = shape_graph(Shape::from_static(&[2, 3]), Some(2), 1)?;
    let report = run(&mut graph, &["FixInputShape"])?;
    assert_eq!(report.total().substitutions, 0);
    Ok(())
}

#[test]
fn extents_beyond_int32_are_kept() -> anyhow::Result<()> {
    let huge = i32::MAX as usize + 1;
    let mut graph = shape_graph(Shape::from_static(&[huge, 2]), None, 2)?;
    let report = run(&mut graph, &["FixInputShape"])?;
    assert_eq!(report.total().substitutions, 0);
    assert!(graph.const_value(graph.outputs()[0]).is_none());

    let mut graph = shape_graph(Shape::from_static(&[huge, 2]), Some(-1), 1)?;
    run(&mut graph, &["FixInputShape"])?;
    assert_eq!(
        graph.const_value(graph.outputs()[0]),
        Some(&Value::Tensor(HostTensor::from_i32(vec![1], vec![2])))
    );
    Ok(())
}

#[test]
fn empty_constant_tensors_fold_to_empty_results() -> anyhow::Result<()> {
    let mut graph = Graph::new("empty");
    let module = graph.add_module_input("self", frozen_module(&[("e", f32_value(&[0], &[]))]));
    let e = push(
        &mut graph,
        Target::GetAttr("e".to_string()),
        vec![node(module)],
        "e",
        f32_kind(&[0]),
    )?;
    let out = push(
        &mut graph,
        Target::CallFunction(functional::add()),
        vec![node(e), Operand::Value(Value::Int(1))],
        "out",
        f32_kind(&[0]),
    )?;
    graph.set_outputs(vec![out])?;

    run(&mut graph, &["FoldConstant"])?;
    let output = graph.outputs()[0];
    assert_eq!(graph.node(output)?.name, "out");
    assert_eq!(graph.const_value(output), Some(&f32_value(&[0], &[])));
    Ok(())
}

#[test]
fn unsupported_operations_surface_as_evaluation_failures() -> anyhow::Result<()> {
    let (mut graph, c) = attr_add_graph()?;
    let relu = push(
        &mut graph,
        Target::CallFunction(FunctionRef::new("functional.nn", "relu")),
        vec![node(c)],
        "relu",
        f32_kind(&[]),
    )?;
    graph.set_outputs(vec![relu])?;
    let relu_expr = producer(&graph, relu);

    match run(&mut graph, &["FoldConstant"]).unwrap_err() {
        PassError::EvaluationFailure { pass, expr, .. } => {
            assert_eq!(pass, "FoldConstant");
            assert_eq!(expr, relu_expr);
        }
        other => panic!("unexpected error: {other}"),
    }
    // `c` was folded before the failing site was reached.
    assert!(graph.const_value(c).is_none());
    let folded = graph.expr(relu_expr)?.inputs()[0];
    assert_eq!(
        graph.const_value(folded),
        Some(&Value::Tensor(HostTensor::scalar_f32(4.0)))
    );
    Ok(())
}
