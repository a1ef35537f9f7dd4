mod graph_support;

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use graph_support::attr_add_graph;
use traced_rs::graph::{ExprId, Graph};
use traced_rs::passes::{
    Direction, Pass, PassConfig, PassContext, PassError, PassManager, PassRegistry, PassResult,
    Transform,
};
use traced_rs_eval_ref::RefEvaluator;

/// Does nothing; only declares a name and requirements.
struct Marker {
    name: &'static str,
    requires: &'static [&'static str],
}

impl Pass for Marker {
    fn name(&self) -> &'static str {
        self.name
    }

    fn required_passes(&self) -> &'static [&'static str] {
        self.requires
    }

    fn run_once(&self) -> bool {
        true
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn run_transform(&self, _: &mut Graph, _: ExprId, _: &PassContext<'_>) -> PassResult<Transform> {
        Ok(Transform::Unchanged)
    }
}

fn register_marker(
    registry: &mut PassRegistry,
    name: &'static str,
    requires: &'static [&'static str],
) {
    registry.register_pass(name, move || Box::new(Marker { name, requires }));
}

#[test]
fn requirements_run_first_regardless_of_request_order() -> anyhow::Result<()> {
    let mut registry = PassRegistry::new();
    register_marker(&mut registry, "A", &[]);
    register_marker(&mut registry, "B", &["A"]);
    let manager = PassManager::new(&registry, PassConfig::default());

    assert_eq!(manager.schedule(&["B", "A"])?, ["A", "B"]);
    assert_eq!(manager.schedule(&["A", "B"])?, ["A", "B"]);
    assert_eq!(manager.schedule(&["B"])?, ["A", "B"]);

    let (mut graph, _) = attr_add_graph()?;
    let report = manager.run_passes(&mut graph, &["B", "A"], &RefEvaluator)?;
    assert_eq!(report.order(), ["A", "B"]);
    Ok(())
}

#[test]
fn default_passes_pull_in_their_requirements() -> anyhow::Result<()> {
    let registry = PassRegistry::with_default_passes();
    let manager = PassManager::new(&registry, PassConfig::default());
    assert_eq!(
        manager.schedule(&["NormElemWise"])?,
        ["AttrToConstant", "FoldConstant", "NormElemWise"]
    );
    assert_eq!(
        manager.schedule(&["FixInputShape", "FoldConstant"])?,
        ["FixInputShape", "AttrToConstant", "FoldConstant"]
    );
    Ok(())
}

#[test]
fn declared_directions_and_sweep_modes() {
    let registry = PassRegistry::with_default_passes();
    let expected = [
        ("AttrToConstant", Direction::Backward, true),
        ("FixInputShape", Direction::Backward, true),
        ("FoldConstant", Direction::Forward, false),
        ("NormElemWise", Direction::Backward, false),
    ];
    for (name, direction, run_once) in expected {
        let pass = registry.instantiate(name).expect("registered");
        assert_eq!(pass.direction(), direction, "{name}");
        assert_eq!(pass.run_once(), run_once, "{name}");
    }
}

#[test]
fn missing_requirement_fails_before_any_mutation() -> anyhow::Result<()> {
    let mut registry = PassRegistry::with_default_passes();
    register_marker(&mut registry, "C", &["Missing"]);
    let manager = PassManager::new(&registry, PassConfig::default());

    let (mut graph, _) = attr_add_graph()?;
    let before = graph.to_string();
    let err = manager
        .run_passes(&mut graph, &["FoldConstant", "C"], &RefEvaluator)
        .unwrap_err();
    match err {
        PassError::UnknownPass { name, required_by } => {
            assert_eq!(name, "Missing");
            assert_eq!(required_by.as_deref(), Some("C"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(graph.to_string(), before);

    let err = manager.schedule(&["Nope"]).unwrap_err();
    assert_eq!(err.to_string(), "unknown pass `Nope`");
    Ok(())
}

#[test]
fn dependency_cycles_are_reported() {
    let mut registry = PassRegistry::new();
    register_marker(&mut registry, "X", &["Y"]);
    register_marker(&mut registry, "Y", &["X"]);
    let manager = PassManager::new(&registry, PassConfig::default());

    match manager.schedule(&["X"]).unwrap_err() {
        PassError::CyclicDependency { cycle } => assert_eq!(cycle, ["X", "Y", "X"]),
        other => panic!("unexpected error: {other}"),
    }
}

/// Records the visiting order into a shared log.
struct Recorder {
    direction: Direction,
    log: Arc<Mutex<Vec<ExprId>>>,
}

impl Pass for Recorder {
    fn name(&self) -> &'static str {
        "Recorder"
    }

    fn run_once(&self) -> bool {
        true
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn run_transform(&self, _: &mut Graph, expr: ExprId, _: &PassContext<'_>) -> PassResult<Transform> {
        self.log.lock().expect("log lock").push(expr);
        Ok(Transform::Unchanged)
    }
}

#[test]
fn sweeps_follow_the_declared_direction() -> anyhow::Result<()> {
    for direction in [Direction::Forward, Direction::Backward] {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PassRegistry::new();
        let shared = Arc::clone(&log);
        registry.register_pass("Recorder", move || {
            Box::new(Recorder {
                direction,
                log: Arc::clone(&shared),
            })
        });
        let manager = PassManager::new(&registry, PassConfig::default());
        let (mut graph, _) = attr_add_graph()?;
        manager.run_passes(&mut graph, &["Recorder"], &RefEvaluator)?;

        let mut expected = graph.exprs_in_order();
        if direction == Direction::Backward {
            expected.reverse();
        }
        assert_eq!(*log.lock().expect("log lock"), expected);
    }
    Ok(())
}

/// Reports a substitution on every other visit, so no sweep is ever clean.
struct Toggle {
    flip: Cell<bool>,
}

impl Pass for Toggle {
    fn name(&self) -> &'static str {
        "Toggle"
    }

    fn run_once(&self) -> bool {
        false
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn run_transform(&self, _: &mut Graph, expr: ExprId, _: &PassContext<'_>) -> PassResult<Transform> {
        let flip = !self.flip.get();
        self.flip.set(flip);
        Ok(if flip {
            Transform::Replaced(expr)
        } else {
            Transform::Unchanged
        })
    }
}

/// Never settles on a site.
struct Spin;

impl Pass for Spin {
    fn name(&self) -> &'static str {
        "Spin"
    }

    fn run_once(&self) -> bool {
        true
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn run_transform(&self, _: &mut Graph, expr: ExprId, _: &PassContext<'_>) -> PassResult<Transform> {
        Ok(Transform::Replaced(expr))
    }
}

#[test]
fn fixpoint_cap_is_reported_as_non_convergence() -> anyhow::Result<()> {
    let mut registry = PassRegistry::new();
    registry.register_pass("Toggle", || {
        Box::new(Toggle {
            flip: Cell::new(false),
        })
    });
    let manager = PassManager::new(&registry, PassConfig::default().with_max_iterations(3));
    let (mut graph, _) = attr_add_graph()?;

    match manager.run_passes(&mut graph, &["Toggle"], &RefEvaluator).unwrap_err() {
        PassError::NonConvergence {
            pass,
            max_iterations,
        } => {
            assert_eq!(pass, "Toggle");
            assert_eq!(max_iterations, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn rewrite_chains_are_bounded() -> anyhow::Result<()> {
    let mut registry = PassRegistry::new();
    registry.register_pass("Spin", || Box::new(Spin));
    let manager = PassManager::new(&registry, PassConfig::default().with_max_chain(4));
    let (mut graph, _) = attr_add_graph()?;

    let err = manager
        .run_passes(&mut graph, &["Spin"], &RefEvaluator)
        .unwrap_err();
    assert!(matches!(
        err,
        PassError::NonConvergence { max_iterations: 4, .. }
    ));
    Ok(())
}

#[test]
fn report_collects_per_pass_stats() -> anyhow::Result<()> {
    let registry = PassRegistry::with_default_passes();
    let manager = PassManager::new(&registry, PassConfig::default());
    let (mut graph, _) = attr_add_graph()?;

    let report = manager.run_passes(&mut graph, &["FoldConstant"], &RefEvaluator)?;
    let attr = report.stats("AttrToConstant").expect("ran");
    assert_eq!((attr.iterations, attr.substitutions), (1, 1));
    let fold = report.stats("FoldConstant").expect("ran");
    // One sweep folds `c`, the second confirms the fixpoint.
    assert_eq!((fold.iterations, fold.substitutions), (2, 1));
    assert_eq!(report.total().substitutions, 2);
    Ok(())
}

#[test]
fn config_defaults() {
    let config = PassConfig::default();
    assert_eq!(config.max_iterations, 32);
    assert_eq!(config.max_chain, 8);
    assert!(config.recompile_after_pass);
    assert_eq!(PassConfig::default().with_max_iterations(0).max_iterations, 1);
}
