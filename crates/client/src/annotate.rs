use flowplan_common::keys;
use flowplan_execution::StepMutability;
use flowplan_planner::PhysicalStep;
use tracing::debug;

/// What [`annotate_step`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    /// Joined descriptions, `None` when there was nothing to attach.
    pub identifier: Option<String>,
    pub renamed: bool,
    pub configured: bool,
}

impl Annotation {
    pub fn changed(&self) -> bool {
        self.renamed || self.configured
    }
}

/// Attach `descriptions` to `step` as human-readable provenance.
///
/// The identifier is the descriptions joined with `", "`. When allowed by
/// `mutability`, the display name becomes `"(i/N) <identifier>"` if it starts
/// with a position marker and `"<name> <identifier>"` otherwise, and the
/// identifier is stored under `flowplan.step.descriptions`. Disallowed halves
/// are skipped. Empty `descriptions` leave the step untouched.
pub fn annotate_step(
    step: &mut PhysicalStep,
    descriptions: &[String],
    mutability: StepMutability,
) -> Annotation {
    if descriptions.is_empty() {
        return Annotation::default();
    }
    let identifier = descriptions.join(", ");
    let mut annotation = Annotation {
        identifier: Some(identifier.clone()),
        ..Annotation::default()
    };

    if mutability.rename {
        step.name = match position_marker(&step.name) {
            Some(marker) => format!("{marker} {identifier}"),
            None => format!("{} {identifier}", step.name),
        };
        annotation.renamed = true;
    } else {
        debug!(step = %step.id, "backend does not allow step renames; name left as is");
    }

    if mutability.configure {
        step.config
            .insert(keys::STEP_DESCRIPTIONS.to_string(), identifier);
        annotation.configured = true;
    } else {
        debug!(step = %step.id, "backend does not allow step config changes; descriptions not stored");
    }
    annotation
}

/// Leading `(i/N)` marker of a step display name.
fn position_marker(name: &str) -> Option<&str> {
    let end = name.find(')')?;
    let inner = name.strip_prefix('(')?.get(..end - 1)?;
    let (i, n) = inner.split_once('/')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    (digits(i) && digits(n)).then(|| &name[..=end])
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use flowplan_common::StepId;

    use super::*;

    fn step(name: &str) -> PhysicalStep {
        PhysicalStep {
            id: StepId(0),
            ordinal: 1,
            name: name.to_string(),
            config: BTreeMap::new(),
            predecessors: vec![],
            vertices: vec![],
        }
    }

    fn descriptions(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn marker_name_is_replaced_after_the_marker() {
        let mut s = step("(2/5) nightly job");
        let annotation = annotate_step(
            &mut s,
            &descriptions(&["stage1", "stage2"]),
            StepMutability::full(),
        );
        assert_eq!(s.name, "(2/5) stage1, stage2");
        assert_eq!(s.descriptions(), Some("stage1, stage2"));
        assert!(annotation.renamed && annotation.configured);
    }

    #[test]
    fn unmarked_name_gets_identifier_appended() {
        let mut s = step("merge-step");
        annotate_step(&mut s, &descriptions(&["dedupe"]), StepMutability::full());
        assert_eq!(s.name, "merge-step dedupe");
    }

    #[test]
    fn empty_descriptions_are_a_no_op() {
        let mut s = step("(1/1) job");
        let before = s.clone();
        let annotation = annotate_step(&mut s, &[], StepMutability::full());
        assert_eq!(s, before);
        assert!(!annotation.changed());
    }

    #[test]
    fn each_half_follows_mutability() {
        let rename_only = StepMutability {
            rename: true,
            configure: false,
        };
        let mut s = step("(1/1) job");
        annotate_step(&mut s, &descriptions(&["a"]), rename_only);
        assert_eq!(s.name, "(1/1) a");
        assert!(s.config.is_empty());

        let mut s = step("(1/1) job");
        let annotation = annotate_step(&mut s, &descriptions(&["a"]), StepMutability::default());
        assert_eq!(s.name, "(1/1) job");
        assert!(s.config.is_empty());
        assert_eq!(annotation.identifier.as_deref(), Some("a"));
    }

    #[test]
    fn marker_detection() {
        assert_eq!(position_marker("(1/3) job"), Some("(1/3)"));
        assert_eq!(position_marker("(12/30)"), Some("(12/30)"));
        assert_eq!(position_marker("(a/3) job"), None);
        assert_eq!(position_marker("(/3) job"), None);
        assert_eq!(position_marker("job (1/3)"), None);
        assert_eq!(position_marker(")("), None);
    }
}
