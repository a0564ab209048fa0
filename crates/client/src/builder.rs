//! Plan building as an explicit state machine.
//!
//! `Unbuilt -> Identified -> Compiled -> Annotated -> Ready`, or `BuildFailed`
//! when the backend rejects the graph or a configured strategy cannot be
//! resolved or installed. The caller's graph and config are never modified.

use std::fmt;
use std::sync::Arc;

use flowplan_common::{FlowError, MetricsRegistry, PlanId, Result, RuntimeConfig};
use flowplan_execution::{
    compose_strategies, ExecutablePlan, SharedBackend, SharedStepStrategy, StrategyRegistry,
};
use flowplan_planner::{assign_plan_id, LogicalGraph, PhysicalPlan};
use tracing::{debug, info, warn};

use crate::annotate::annotate_step;
use crate::provenance::extract_descriptions;

/// Phase a build failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// The backend rejected the logical graph.
    Compile,
    /// Strategies could not be resolved or installed.
    Strategies,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Compile => "compile",
            BuildPhase::Strategies => "strategies",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BuildFailure {
    pub phase: BuildPhase,
    pub cause: Arc<FlowError>,
    /// Identity derived before the failure.
    pub plan_id: Option<PlanId>,
}

impl BuildFailure {
    /// The failure as a run outcome, keeping the cause as its source.
    pub fn to_error(&self) -> FlowError {
        FlowError::BuildFailed(Arc::clone(&self.cause))
    }
}

/// Outcome of [`PlanBuilder::build`].
#[derive(Debug, Clone)]
pub enum BuildResult {
    Ready(Arc<ExecutablePlan>),
    Failed(BuildFailure),
}

impl BuildResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, BuildResult::Ready(_))
    }

    pub fn plan(&self) -> Option<&Arc<ExecutablePlan>> {
        match self {
            BuildResult::Ready(plan) => Some(plan),
            BuildResult::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&BuildFailure> {
        match self {
            BuildResult::Ready(_) => None,
            BuildResult::Failed(failure) => Some(failure),
        }
    }

    pub fn plan_id(&self) -> Option<&PlanId> {
        match self {
            BuildResult::Ready(plan) => Some(&plan.plan_id),
            BuildResult::Failed(failure) => failure.plan_id.as_ref(),
        }
    }

    pub fn into_result(self) -> Result<Arc<ExecutablePlan>> {
        match self {
            BuildResult::Ready(plan) => Ok(plan),
            BuildResult::Failed(failure) => Err(failure.to_error()),
        }
    }
}

enum BuildState {
    Unbuilt,
    Identified {
        plan_id: PlanId,
        config: RuntimeConfig,
    },
    Compiled {
        plan_id: PlanId,
        config: RuntimeConfig,
        physical: PhysicalPlan,
    },
    Annotated {
        plan_id: PlanId,
        config: RuntimeConfig,
        physical: PhysicalPlan,
    },
    Ready(Arc<ExecutablePlan>),
    BuildFailed(BuildFailure),
}

impl BuildState {
    fn name(&self) -> &'static str {
        match self {
            BuildState::Unbuilt => "unbuilt",
            BuildState::Identified { .. } => "identified",
            BuildState::Compiled { .. } => "compiled",
            BuildState::Annotated { .. } => "annotated",
            BuildState::Ready(_) => "ready",
            BuildState::BuildFailed(_) => "build_failed",
        }
    }
}

/// Turns a logical graph plus runtime config into an executable plan on one
/// backend.
pub struct PlanBuilder {
    backend: SharedBackend,
    graph: LogicalGraph,
    config: RuntimeConfig,
    registry: StrategyRegistry,
    strategies: Vec<SharedStepStrategy>,
    metrics: Option<MetricsRegistry>,
}

impl fmt::Debug for PlanBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanBuilder")
            .field("backend", &self.backend.name())
            .field("stages", &self.graph.len())
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

impl PlanBuilder {
    /// Builder resolving strategy names against the built-in registry.
    pub fn new(backend: SharedBackend, graph: LogicalGraph, config: RuntimeConfig) -> Self {
        Self {
            backend,
            graph,
            config,
            registry: StrategyRegistry::with_builtins(),
            strategies: Vec::new(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Append a strategy after those named in `flowplan.step.strategies`.
    #[must_use]
    pub fn with_strategy(mut self, strategy: SharedStepStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(&self) -> BuildResult {
        let mut state = BuildState::Unbuilt;
        loop {
            debug!(backend = self.backend.name(), state = state.name(), "plan build state");
            state = match state {
                BuildState::Ready(plan) => {
                    info!(
                        plan_id = %plan.plan_id.short(),
                        backend = self.backend.name(),
                        steps = plan.physical.len(),
                        strategy = plan.strategy().map(|s| s.name()).unwrap_or("none"),
                        "plan ready"
                    );
                    self.record_build("ready");
                    return BuildResult::Ready(plan);
                }
                BuildState::BuildFailed(failure) => {
                    warn!(
                        backend = self.backend.name(),
                        phase = %failure.phase,
                        error = %failure.cause,
                        "plan build failed"
                    );
                    self.record_build(failure.phase.as_str());
                    return BuildResult::Failed(failure);
                }
                other => self.advance(other),
            };
        }
    }

    fn advance(&self, state: BuildState) -> BuildState {
        match state {
            BuildState::Unbuilt => {
                let (plan_id, config) = assign_plan_id(&self.graph, &self.config);
                BuildState::Identified { plan_id, config }
            }
            BuildState::Identified { plan_id, config } => {
                match self.backend.compile(&self.graph, &config) {
                    Ok(physical) => BuildState::Compiled {
                        plan_id,
                        config,
                        physical,
                    },
                    Err(err) => failed(BuildPhase::Compile, err, plan_id),
                }
            }
            BuildState::Compiled {
                plan_id,
                config,
                mut physical,
            } => {
                self.annotate(&mut physical);
                BuildState::Annotated {
                    plan_id,
                    config,
                    physical,
                }
            }
            BuildState::Annotated {
                plan_id,
                config,
                physical,
            } => {
                let mut plan = ExecutablePlan::new(plan_id.clone(), config, physical);
                match self.install_strategies(&mut plan) {
                    Ok(()) => BuildState::Ready(Arc::new(plan)),
                    Err(err) => failed(BuildPhase::Strategies, err, plan_id),
                }
            }
            terminal @ (BuildState::Ready(_) | BuildState::BuildFailed(_)) => terminal,
        }
    }

    fn annotate(&self, physical: &mut PhysicalPlan) {
        let caps = self.backend.capabilities();
        if !caps.step_introspection {
            debug!(
                backend = self.backend.name(),
                "backend steps are opaque; skipping provenance annotation"
            );
            return;
        }
        for step in physical.steps_mut() {
            let descriptions = extract_descriptions(step);
            let annotation = annotate_step(step, &descriptions, caps.step_mutability);
            if annotation.changed() {
                debug!(step = %step.id, name = %step.name, "annotated step");
                if let Some(metrics) = &self.metrics {
                    metrics.record_annotated_step(self.backend.name());
                }
            }
        }
    }

    fn install_strategies(&self, plan: &mut ExecutablePlan) -> Result<()> {
        let mut strategies = self.registry.resolve(&plan.config)?;
        strategies.extend(self.strategies.iter().cloned());
        if strategies.is_empty() {
            return Ok(());
        }
        if !self.backend.capabilities().strategy_installation {
            warn!(
                backend = self.backend.name(),
                strategies = strategies.len(),
                "backend cannot install step strategies; running without them"
            );
            return Ok(());
        }
        let count = strategies.len();
        self.backend
            .install_strategy(plan, compose_strategies(strategies))?;
        if let Some(metrics) = &self.metrics {
            metrics.record_installed_strategies(self.backend.name(), count);
        }
        Ok(())
    }

    fn record_build(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_build(self.backend.name(), outcome);
        }
    }
}

fn failed(phase: BuildPhase, err: FlowError, plan_id: PlanId) -> BuildState {
    BuildState::BuildFailed(BuildFailure {
        phase,
        cause: Arc::new(err),
        plan_id: Some(plan_id),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use flowplan_common::keys;
    use flowplan_distributed::{ClusterConfig, LocalCluster};
    use flowplan_planner::GraphBuilder;

    use super::*;

    fn cluster() -> SharedBackend {
        Arc::new(
            LocalCluster::new(ClusterConfig {
                worker_threads: 1,
                ..ClusterConfig::default()
            })
            .expect("cluster"),
        )
    }

    fn described_graph() -> LogicalGraph {
        let mut b = GraphBuilder::new();
        let s = b.source("in", "v", ["a"]);
        let m = b.map(s, "up", "upper", BTreeMap::new());
        b.sink(m, "out");
        b.describe(s, "stage1").expect("describe");
        b.describe(m, "stage2").expect("describe");
        b.build()
    }

    #[test]
    fn ready_plan_carries_identity_and_annotations() {
        let config = RuntimeConfig::new().with(keys::PLAN_NAME, "job");
        let result = PlanBuilder::new(cluster(), described_graph(), config.clone()).build();
        let plan = result.plan().expect("ready");

        assert_eq!(plan.config.get(keys::PLAN_ID), Some(plan.plan_id.as_str()));
        assert!(!config.contains(keys::PLAN_ID));
        let step = &plan.physical.steps()[0];
        assert_eq!(step.name, "(1/1) stage1, stage2");
        assert_eq!(step.descriptions(), Some("stage1, stage2"));
        assert!(plan.strategy().is_none());
    }

    #[test]
    fn unknown_strategy_fails_in_strategy_phase() {
        let config = RuntimeConfig::new().with(keys::STEP_STRATEGIES, "no-such-strategy");
        let result = PlanBuilder::new(cluster(), described_graph(), config).build();
        let failure = result.failure().expect("failed");
        assert_eq!(failure.phase, BuildPhase::Strategies);
        assert!(matches!(*failure.cause, FlowError::InvalidConfig(_)));
        assert!(failure.plan_id.is_some());
    }

    #[test]
    fn named_and_programmatic_strategies_are_composed_in_order() {
        let config = RuntimeConfig::new().with(keys::STEP_STRATEGIES, "step-tags");
        let extra = flowplan_execution::strategy_fn("extra", |_, _, _| Ok(()));
        let result = PlanBuilder::new(cluster(), described_graph(), config)
            .with_strategy(extra)
            .build();
        let plan = result.plan().expect("ready");
        assert_eq!(
            plan.strategy().map(|s| s.name().to_string()),
            Some("composed(step-tags, extra)".to_string())
        );
    }
}
