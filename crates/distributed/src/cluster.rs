use std::sync::Arc;

use flowplan_common::{FlowError, MetricsRegistry, Result, RuntimeConfig};
use flowplan_execution::{
    Backend, BackendCapabilities, ExecutablePlan, OperatorRegistry, RunHandle,
};
use flowplan_planner::{
    create_physical_plan, LogicalGraph, PhysicalPlan, PhysicalPlannerConfig, StageKind,
};
use tracing::{debug, info};

use crate::worker::{run_plan, RunContext};

#[derive(Debug, Clone)]
/// In-process cluster sizing.
pub struct ClusterConfig {
    /// Backend name reported by [`Backend::name`].
    pub name: String,
    /// Tokio worker threads driving submitted runs.
    pub worker_threads: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "local-cluster".to_string(),
            worker_threads: 4,
        }
    }
}

/// In-process batch cluster owning its own multi-thread tokio runtime.
///
/// Exposes every capability: compiled steps can be walked, renamed and
/// configured, and a step strategy is applied to each step right before it
/// runs. Submitted runs are tokio tasks, so their handles can be cancelled.
#[derive(Debug)]
pub struct LocalCluster {
    config: ClusterConfig,
    runtime: Option<tokio::runtime::Runtime>,
    registry: Arc<OperatorRegistry>,
    metrics: MetricsRegistry,
}

impl LocalCluster {
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("flowplan-worker")
            .enable_all()
            .build()?;
        info!(
            name = %config.name,
            worker_threads = config.worker_threads,
            "local cluster started"
        );
        Ok(Self {
            config,
            runtime: Some(runtime),
            registry: Arc::new(OperatorRegistry::with_builtins()),
            metrics: MetricsRegistry::new(),
        })
    }

    /// Replace the operator registry used for compile checks and runs.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<OperatorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    fn run_context(&self) -> RunContext {
        RunContext {
            backend: self.config.name.clone(),
            registry: Arc::clone(&self.registry),
            metrics: self.metrics.clone(),
        }
    }
}

impl Backend for LocalCluster {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::full()
    }

    fn compile(&self, graph: &LogicalGraph, config: &RuntimeConfig) -> Result<PhysicalPlan> {
        let plan = create_physical_plan(graph, &PhysicalPlannerConfig::from_runtime(config))?;
        check_operators(&plan, &self.registry)?;
        debug!(
            plan_id = %plan.plan_id.short(),
            steps = plan.len(),
            "local cluster compiled plan"
        );
        Ok(plan)
    }

    fn submit(&self, plan: Arc<ExecutablePlan>) -> Result<RunHandle> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| FlowError::Execution("local cluster is shut down".to_string()))?;
        let plan_id = plan.plan_id.clone();
        info!(plan_id = %plan_id.short(), backend = %self.config.name, "plan submitted");
        let handle = runtime.spawn(run_plan(plan, self.run_context()));
        Ok(RunHandle::spawned(handle).with_plan_id(plan_id))
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        // A plain runtime drop blocks and panics inside an async context.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Every `Map` stage must name an operator this cluster can run.
pub fn check_operators(plan: &PhysicalPlan, registry: &OperatorRegistry) -> Result<()> {
    for step in plan.steps() {
        for vertex in step.stage_vertices() {
            if let StageKind::Map { operator, .. } = &vertex.kind {
                if !registry.contains(operator) {
                    return Err(FlowError::Planning(format!(
                        "stage '{}' uses unknown operator '{operator}' (registered: {})",
                        vertex.name,
                        registry.names().join(", ")
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use flowplan_common::{keys, PlanId};
    use flowplan_planner::GraphBuilder;

    use super::*;

    fn cluster() -> LocalCluster {
        LocalCluster::new(ClusterConfig {
            worker_threads: 2,
            ..ClusterConfig::default()
        })
        .expect("cluster")
    }

    #[test]
    fn compile_rejects_unknown_operator() {
        let mut b = GraphBuilder::new();
        let s = b.source("in", "v", ["a"]);
        let m = b.map(s, "shout", "shout", BTreeMap::new());
        b.sink(m, "out");

        let err = cluster()
            .compile(&b.build(), &RuntimeConfig::new())
            .expect_err("unknown operator");
        assert!(matches!(err, FlowError::Planning(_)));
        assert!(err.to_string().contains("shout"), "{err}");
    }

    #[test]
    fn submit_runs_on_cluster_runtime() {
        let cluster = cluster();
        let mut b = GraphBuilder::new();
        let s = b.source("in", "v", ["b", "a", "b"]);
        let d = b.distinct(s, "dedup");
        b.sink(d, "out");

        let config = RuntimeConfig::new()
            .with(keys::PLAN_ID, "abc")
            .with(keys::PLAN_NAME, "job");
        let physical = cluster.compile(&b.build(), &config).expect("compile");
        assert_eq!(physical.steps()[0].name, "(1/2) job");

        let plan = Arc::new(ExecutablePlan::new(PlanId("abc".to_string()), config, physical));
        let handle = cluster.submit(plan).expect("submit");
        assert!(handle.supports_cancel());
        let stats = futures::executor::block_on(handle).expect("run");

        let mut values = stats.sink_values("out");
        values.sort();
        assert_eq!(values, vec!["a", "b"]);
        assert_eq!(stats.backend, "local-cluster");
    }

    #[tokio::test]
    async fn dropping_inside_a_runtime_does_not_panic() {
        drop(cluster());
    }
}
