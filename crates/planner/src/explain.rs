use crate::logical_graph::{LogicalGraph, StageKind};
use crate::physical_plan::{PhysicalPlan, StepVertex};

/// Render a logical graph as human-readable multiline text.
pub fn explain_logical(graph: &LogicalGraph) -> String {
    let mut out = String::new();
    for stage in graph.stages() {
        out.push_str(&format!(
            "#{} {} {}",
            stage.id,
            stage.name,
            fmt_kind(&stage.kind)
        ));
        if !stage.inputs.is_empty() {
            let inputs = stage
                .inputs
                .iter()
                .map(|i| format!("#{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(" <- {inputs}"));
        }
        out.push('\n');
        for d in &stage.descriptions {
            out.push_str(&format!("  description: {d}\n"));
        }
    }
    out
}

/// Render a physical plan: steps in execution order with their config and vertices.
pub fn explain_physical(plan: &PhysicalPlan) -> String {
    let mut out = format!("Plan {} id={}\n", plan.name, plan.plan_id.short());
    for step in plan.steps() {
        out.push_str(&format!("Step {} \"{}\"\n", step.id, step.name));
        if !step.predecessors.is_empty() {
            let preds = step
                .predecessors
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("  after: {preds}\n"));
        }
        for (k, v) in &step.config {
            out.push_str(&format!("  config {k}={v}\n"));
        }
        for vertex in &step.vertices {
            match vertex {
                StepVertex::Stage(v) => {
                    out.push_str(&format!("  {} {}\n", v.name, fmt_kind(&v.kind)));
                }
                StepVertex::Plumbing(p) => {
                    out.push_str(&format!("  [{} #{}]\n", p.kind.label(), p.stage));
                }
            }
        }
    }
    out
}

fn fmt_kind(kind: &StageKind) -> String {
    match kind {
        StageKind::Source { column, rows } => format!("Source column={column} rows={}", rows.len()),
        StageKind::Map { operator, options } if options.is_empty() => format!("Map op={operator}"),
        StageKind::Map { operator, options } => format!("Map op={operator} options={options:?}"),
        StageKind::Filter { op, value } => format!("Filter {op:?} {value:?}"),
        StageKind::Distinct => "Distinct".to_string(),
        StageKind::Merge => "Merge".to_string(),
        StageKind::Sink { table } => format!("Sink table={table}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::logical_graph::GraphBuilder;
    use crate::physical_planner::{create_physical_plan, PhysicalPlannerConfig};

    #[test]
    fn explains_both_levels() {
        let mut b = GraphBuilder::new();
        let s = b.source("in", "v", ["a"]);
        let m = b.map(s, "up", "upper", BTreeMap::new());
        let d = b.distinct(m, "dedup");
        b.sink(d, "out");
        b.describe(m, "uppercase words").expect("describe");
        let graph = b.build();

        let logical = explain_logical(&graph);
        assert!(logical.contains("#1 up Map op=upper <- #0"), "{logical}");
        assert!(logical.contains("description: uppercase words"), "{logical}");

        let plan = create_physical_plan(&graph, &PhysicalPlannerConfig::default()).expect("plan");
        let physical = explain_physical(&plan);
        assert!(physical.contains("Step 0 \"(1/2) flowplan\""), "{physical}");
        assert!(physical.contains("[ShuffleWrite #1]"), "{physical}");
        assert!(physical.contains("[ShuffleRead #1]"), "{physical}");
        assert!(physical.contains("after: 0"), "{physical}");
    }
}
