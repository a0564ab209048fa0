use std::collections::HashSet;

use flowplan_planner::PhysicalStep;

/// Descriptions of the logical stages compiled into `step`.
///
/// Walks the step's vertices in order. Stage vertices contribute their
/// descriptions in authoring order, plumbing vertices contribute nothing, and
/// repeated strings keep only their first occurrence. A step with no
/// described stage yields an empty list.
pub fn extract_descriptions(step: &PhysicalStep) -> Vec<String> {
    let mut seen = HashSet::new();
    step.stage_vertices()
        .flat_map(|v| v.descriptions.iter())
        .filter(|d| seen.insert(d.as_str()))
        .cloned()
        .collect()
}
