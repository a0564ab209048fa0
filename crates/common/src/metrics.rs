use std::sync::Arc;

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Prometheus-backed counters for plan builds, annotation, strategies and step runs.
///
/// Cheap to clone; clones share the same underlying registry.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    builds: CounterVec,
    annotated_steps: CounterVec,
    installed_strategies: CounterVec,
    runs_submitted: CounterVec,
    step_runs: CounterVec,
    step_rows_in: CounterVec,
    step_rows_out: CounterVec,
    step_time_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// `outcome` is `ready` or the failing build phase.
    pub fn record_build(&self, backend: &str, outcome: &str) {
        self.inner
            .builds
            .with_label_values(&[backend, outcome])
            .inc();
    }

    pub fn record_annotated_step(&self, backend: &str) {
        self.inner
            .annotated_steps
            .with_label_values(&[backend])
            .inc();
    }

    pub fn record_installed_strategies(&self, backend: &str, count: usize) {
        self.inner
            .installed_strategies
            .with_label_values(&[backend])
            .inc_by(count as f64);
    }

    /// `outcome` is `submitted`, `rejected` or `build_failed`.
    pub fn record_run_submission(&self, backend: &str, outcome: &str) {
        self.inner
            .runs_submitted
            .with_label_values(&[backend, outcome])
            .inc();
    }

    pub fn record_step_run(
        &self,
        backend: &str,
        plan_id: &str,
        step: u32,
        rows_in: u64,
        rows_out: u64,
        secs: f64,
    ) {
        let step = step.to_string();
        let labels = [backend, plan_id, step.as_str()];
        self.inner.step_runs.with_label_values(&labels).inc();
        self.inner
            .step_rows_in
            .with_label_values(&labels)
            .inc_by(rows_in as f64);
        self.inner
            .step_rows_out
            .with_label_values(&labels)
            .inc_by(rows_out as f64);
        self.inner
            .step_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();
        let builds = counter_vec(
            &registry,
            "flowplan_builds_total",
            "Plan builds by outcome",
            &["backend", "outcome"],
        );
        let annotated_steps = counter_vec(
            &registry,
            "flowplan_annotated_steps_total",
            "Physical steps that received provenance annotations",
            &["backend"],
        );
        let installed_strategies = counter_vec(
            &registry,
            "flowplan_installed_strategies_total",
            "Step strategies folded into installed composites",
            &["backend"],
        );
        let runs_submitted = counter_vec(
            &registry,
            "flowplan_runs_total",
            "Run requests by submission outcome",
            &["backend", "outcome"],
        );
        let step_runs = counter_vec(
            &registry,
            "flowplan_step_runs_total",
            "Physical step executions",
            &["backend", "plan_id", "step"],
        );
        let step_rows_in = counter_vec(
            &registry,
            "flowplan_step_rows_in_total",
            "Rows read by a step from sources and shuffles",
            &["backend", "plan_id", "step"],
        );
        let step_rows_out = counter_vec(
            &registry,
            "flowplan_step_rows_out_total",
            "Rows written by a step to sinks and shuffles",
            &["backend", "plan_id", "step"],
        );
        let step_time_seconds = histogram_vec(
            &registry,
            "flowplan_step_time_seconds",
            "Wall time per step execution",
            &["backend", "plan_id", "step"],
        );
        Self {
            registry,
            builds,
            annotated_steps,
            installed_strategies,
            runs_submitted,
            step_runs,
            step_rows_in,
            step_rows_out,
            step_time_seconds,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_prometheus_text() {
        let m = MetricsRegistry::new();
        m.record_build("local-cluster", "ready");
        m.record_step_run("local-cluster", "abc123", 0, 3, 3, 0.01);
        let text = m.render_prometheus();
        assert!(text.contains("flowplan_builds_total"));
        assert!(text.contains("flowplan_step_rows_out_total"));
        assert!(text.contains("local-cluster"));
    }

    #[test]
    fn renders_all_metric_families() {
        let m = MetricsRegistry::new();
        m.record_build("local-cluster", "compile");
        m.record_annotated_step("local-cluster");
        m.record_installed_strategies("local-cluster", 2);
        m.record_run_submission("local-cluster", "submitted");
        m.record_step_run("local-cluster", "abc123", 1, 10, 4, 0.02);
        let text = m.render_prometheus();

        assert!(text.contains("flowplan_builds_total"));
        assert!(text.contains("flowplan_annotated_steps_total"));
        assert!(text.contains("flowplan_installed_strategies_total"));
        assert!(text.contains("flowplan_runs_total"));
        assert!(text.contains("flowplan_step_runs_total"));
        assert!(text.contains("flowplan_step_rows_in_total"));
        assert!(text.contains("flowplan_step_time_seconds"));
    }
}
