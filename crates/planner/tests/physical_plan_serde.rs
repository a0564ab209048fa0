use std::collections::BTreeMap;

use flowplan_planner::{
    create_physical_plan, GraphBuilder, PhysicalPlan, PhysicalPlannerConfig,
};

#[test]
fn physical_plan_is_serializable() {
    // source -> upper -> distinct -> sink, two steps
    let mut b = GraphBuilder::new();
    let s = b.source("in", "v", ["a", "b"]);
    let m = b.map(s, "up", "upper", BTreeMap::new());
    let d = b.distinct(m, "dedup");
    b.sink(d, "out");
    b.describe(d, "remove repeats").unwrap();

    let phys = create_physical_plan(&b.build(), &PhysicalPlannerConfig::default()).unwrap();

    let s = serde_json::to_string(&phys).unwrap();
    let back: PhysicalPlan = serde_json::from_str(&s).unwrap();
    assert_eq!(back, phys);
    assert_eq!(back.steps[1].stage_vertices().next().unwrap().descriptions, vec!["remove repeats"]);
}
