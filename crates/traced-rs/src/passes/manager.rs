//! Pass scheduling and sweeping.

use std::collections::HashMap;

use crate::eval::Evaluator;
use crate::graph::Graph;

use super::{
    Direction, Pass, PassConfig, PassContext, PassError, PassRegistry, PassResult, PassStats,
    Transform,
};

/// Per-pass statistics of one [`PassManager::run_passes`] call, in execution order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub passes: Vec<(String, PassStats)>,
}

impl RunReport {
    /// Names of the passes that ran, in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.passes.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn stats(&self, pass: &str) -> Option<PassStats> {
        self.passes
            .iter()
            .find(|(name, _)| name == pass)
            .map(|(_, stats)| *stats)
    }

    pub fn total(&self) -> PassStats {
        self.passes
            .iter()
            .fold(PassStats::default(), |acc, (_, stats)| acc.merge(*stats))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

pub struct PassManager<'r> {
    registry: &'r PassRegistry,
    config: PassConfig,
}

impl<'r> PassManager<'r> {
    pub fn new(registry: &'r PassRegistry, config: PassConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &PassConfig {
        &self.config
    }

    /// Orders `names` so that every pass runs after the passes it requires.
    ///
    /// Requirements are pulled in transitively and each pass appears once.
    /// Otherwise the requested order is kept.
    pub fn schedule(&self, names: &[&str]) -> PassResult<Vec<String>> {
        Ok(self
            .plan(names)?
            .iter()
            .map(|pass| pass.name().to_string())
            .collect())
    }

    fn plan(&self, names: &[&str]) -> PassResult<Vec<Box<dyn Pass>>> {
        let mut marks: HashMap<String, Mark> = HashMap::new();
        let mut stack: Vec<String> = Vec::new();
        let mut ordered: Vec<Box<dyn Pass>> = Vec::new();
        for name in names {
            self.visit(name, None, &mut marks, &mut stack, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        name: &str,
        required_by: Option<&str>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
        ordered: &mut Vec<Box<dyn Pass>>,
    ) -> PassResult<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|pass| pass == name).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(name.to_string());
                return Err(PassError::CyclicDependency { cycle });
            }
            None => {}
        }
        let pass = self
            .registry
            .instantiate(name)
            .ok_or_else(|| PassError::UnknownPass {
                name: name.to_string(),
                required_by: required_by.map(str::to_string),
            })?;
        marks.insert(name.to_string(), Mark::Visiting);
        stack.push(name.to_string());
        for required in pass.required_passes() {
            self.visit(required, Some(name), marks, stack, ordered)?;
        }
        stack.pop();
        marks.insert(name.to_string(), Mark::Done);
        ordered.push(pass);
        Ok(())
    }

    /// Schedules `names` and runs the passes over `graph`.
    ///
    /// Scheduling errors are reported before the graph is touched. A failure in a
    /// later pass leaves every completed substitution in place.
    #[tracing::instrument(skip_all, fields(graph = %graph.name(), passes = ?names))]
    pub fn run_passes(
        &self,
        graph: &mut Graph,
        names: &[&str],
        evaluator: &dyn Evaluator,
    ) -> PassResult<RunReport> {
        let passes = self.plan(names)?;
        graph.compile()?;

        let cx = PassContext::new(evaluator);
        let mut report = RunReport::default();
        for pass in passes {
            let stats = self.run_pass(graph, pass.as_ref(), &cx)?;
            report.passes.push((pass.name().to_string(), stats));
        }
        Ok(report)
    }

    fn run_pass(
        &self,
        graph: &mut Graph,
        pass: &dyn Pass,
        cx: &PassContext<'_>,
    ) -> PassResult<PassStats> {
        let mut stats = PassStats::default();
        if pass.run_once() {
            stats.iterations = 1;
            stats.substitutions = self.sweep(graph, pass, cx)?;
        } else {
            loop {
                if stats.iterations >= self.config.max_iterations {
                    tracing::warn!(
                        pass = pass.name(),
                        max_iterations = self.config.max_iterations,
                        substitutions = stats.substitutions,
                        "fixpoint pass did not converge"
                    );
                    return Err(PassError::NonConvergence {
                        pass: pass.name().to_string(),
                        max_iterations: self.config.max_iterations,
                    });
                }
                stats.iterations += 1;
                let substitutions = self.sweep(graph, pass, cx)?;
                stats.substitutions += substitutions;
                if substitutions == 0 {
                    break;
                }
            }
        }
        if self.config.recompile_after_pass {
            stats.erased += graph.compile()?;
        }

        tracing::debug!(
            pass = pass.name(),
            iterations = stats.iterations,
            substitutions = stats.substitutions,
            erased = stats.erased,
            "pass finished"
        );
        if self.config.log_stats {
            tracing::info!(
                "pass {} iterations={} substitutions={} erased={} exprs={}",
                pass.name(),
                stats.iterations,
                stats.substitutions,
                stats.erased,
                graph.expr_count()
            );
        }
        Ok(stats)
    }

    /// Offers every expression of a snapshot of the current order to `pass` once.
    /// Returns the number of substitutions.
    fn sweep(&self, graph: &mut Graph, pass: &dyn Pass, cx: &PassContext<'_>) -> PassResult<usize> {
        let mut snapshot = graph.exprs_in_order();
        if pass.direction() == Direction::Backward {
            snapshot.reverse();
        }

        let mut substitutions = 0;
        for expr in snapshot {
            if !graph.contains_expr(expr) {
                continue;
            }
            let mut current = expr;
            let mut chain = 0;
            while let Transform::Replaced(next) = pass.run_transform(graph, current, cx)? {
                substitutions += 1;
                chain += 1;
                tracing::trace!(pass = pass.name(), from = %current, to = %next, "substituted");
                if !graph.contains_expr(next) {
                    break;
                }
                if chain >= self.config.max_chain {
                    tracing::warn!(
                        pass = pass.name(),
                        expr = %next,
                        max_chain = self.config.max_chain,
                        "rewrite chain did not settle"
                    );
                    return Err(PassError::NonConvergence {
                        pass: pass.name().to_string(),
                        max_iterations: self.config.max_chain,
                    });
                }
                current = next;
            }
        }
        Ok(substitutions)
    }
}
