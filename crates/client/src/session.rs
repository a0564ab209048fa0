use std::sync::Arc;

use flowplan_common::{EngineConfig, MetricsRegistry, Result};
use flowplan_distributed::{ClusterConfig, LocalCluster};
use flowplan_execution::{OperatorRegistry, SharedBackend, StrategyRegistry};

use crate::builder::PlanBuilder;
use crate::context::PlanContext;
use crate::driver::ExecutionDriver;
use crate::runtime::EmbeddedBackend;

pub type SharedSession = Arc<Session>;

/// Engine-wide services. Immutable once constructed.
#[derive(Debug)]
pub struct Session {
    pub config: EngineConfig,
    pub metrics: MetricsRegistry,
    pub operators: Arc<OperatorRegistry>,
    pub strategies: StrategyRegistry,
    pub backend: SharedBackend,
    pub driver: ExecutionDriver,
}

impl Session {
    /// Session over an in-process [`LocalCluster`].
    pub fn new(config: EngineConfig) -> Result<Self> {
        let metrics = MetricsRegistry::new();
        let operators = Arc::new(OperatorRegistry::with_builtins());
        let cluster = LocalCluster::new(ClusterConfig {
            worker_threads: config.worker_threads,
            ..ClusterConfig::default()
        })?
        .with_registry(Arc::clone(&operators))
        .with_metrics(metrics.clone());
        Ok(Self::assemble(
            config,
            metrics,
            operators,
            StrategyRegistry::with_builtins(),
            Arc::new(cluster),
        ))
    }

    /// Session over the inline [`EmbeddedBackend`].
    pub fn embedded(config: EngineConfig) -> Self {
        let metrics = MetricsRegistry::new();
        let operators = Arc::new(OperatorRegistry::with_builtins());
        let backend = EmbeddedBackend::new()
            .with_registry(Arc::clone(&operators))
            .with_metrics(metrics.clone());
        Self::assemble(
            config,
            metrics,
            operators,
            StrategyRegistry::with_builtins(),
            Arc::new(backend),
        )
    }

    /// Session over a caller-supplied backend. Operators registered on the
    /// session are only visible to backends built by the session itself.
    pub fn with_backend(
        config: EngineConfig,
        backend: SharedBackend,
        strategies: StrategyRegistry,
    ) -> Self {
        Self::assemble(
            config,
            MetricsRegistry::new(),
            Arc::new(OperatorRegistry::with_builtins()),
            strategies,
            backend,
        )
    }

    fn assemble(
        config: EngineConfig,
        metrics: MetricsRegistry,
        operators: Arc<OperatorRegistry>,
        strategies: StrategyRegistry,
        backend: SharedBackend,
    ) -> Self {
        let driver = ExecutionDriver::new(Arc::clone(&backend)).with_metrics(metrics.clone());
        Self {
            config,
            metrics,
            operators,
            strategies,
            backend,
            driver,
        }
    }

    pub fn context(&self) -> PlanContext {
        PlanContext::new(Arc::clone(&self.backend), self.config.runtime_config())
    }

    pub fn plan_builder(&self, ctx: &PlanContext) -> PlanBuilder {
        PlanBuilder::new(
            Arc::clone(ctx.backend()),
            ctx.logical_graph(),
            ctx.config().clone(),
        )
        .with_registry(self.strategies.clone())
        .with_metrics(self.metrics.clone())
    }

    pub fn prometheus_metrics(&self) -> String {
        self.metrics.render_prometheus()
    }
}
