use flowplan_common::RuntimeConfig;
use flowplan_execution::SharedBackend;
use flowplan_planner::{GraphBuilder, LogicalGraph};

/// Everything needed to author one plan: the graph being built, its runtime
/// config and the backend it targets.
///
/// Passed explicitly; nothing here is global.
#[derive(Debug)]
pub struct PlanContext {
    graph: GraphBuilder,
    config: RuntimeConfig,
    backend: SharedBackend,
}

impl PlanContext {
    pub fn new(backend: SharedBackend, config: RuntimeConfig) -> Self {
        Self {
            graph: GraphBuilder::new(),
            config,
            backend,
        }
    }

    /// Graph under construction.
    pub fn graph(&mut self) -> &mut GraphBuilder {
        &mut self.graph
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Set a runtime entry. Configs handed out earlier are not affected.
    pub fn configure(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.config = self.config.with(key, value);
        self
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Snapshot of the graph authored so far.
    pub fn logical_graph(&self) -> LogicalGraph {
        self.graph.build()
    }
}
