//! Table-driven execution plan.

use std::collections::{BTreeMap, HashSet};

use genoflow_shared::constants::stages;
use genoflow_shared::errors::{GenoflowError, GenoflowResult};

use super::stage::Stage;
use crate::workflow::WorkflowStatus;

/// Ordered stage groups plus each stage's declared upstream stages.
///
/// ```text
/// [genomics] → [proteomics] → {literature, drug} → [decision]
/// ```
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    groups: Vec<Stage<String>>,
    dependencies: BTreeMap<String, Vec<String>>,
}

impl PipelinePlan {
    /// Build and validate a plan.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a group is empty, a stage is unknown or repeated,
    /// or a stage depends on something that does not run in an earlier group.
    pub fn new(
        groups: Vec<Stage<String>>,
        dependencies: BTreeMap<String, Vec<String>>,
    ) -> GenoflowResult<Self> {
        let plan = Self {
            groups,
            dependencies,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// The analysis pipeline. With `parallel` off the literature/drug group
    /// runs sequentially.
    pub fn standard(parallel: bool) -> Self {
        let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let concurrent = owned(&[stages::LITERATURE, stages::DRUG]);
        let groups = vec![
            Stage::single(stages::GENOMICS.to_string()),
            Stage::single(stages::PROTEOMICS.to_string()),
            if parallel {
                Stage::parallel(concurrent)
            } else {
                Stage::sequential(concurrent)
            },
            Stage::single(stages::DECISION.to_string()),
        ];

        let mut dependencies = BTreeMap::new();
        dependencies.insert(stages::GENOMICS.to_string(), Vec::new());
        dependencies.insert(stages::PROTEOMICS.to_string(), owned(&[stages::GENOMICS]));
        dependencies.insert(
            stages::LITERATURE.to_string(),
            owned(&[stages::GENOMICS, stages::PROTEOMICS]),
        );
        dependencies.insert(
            stages::DRUG.to_string(),
            owned(&[stages::GENOMICS, stages::PROTEOMICS]),
        );
        dependencies.insert(
            stages::DECISION.to_string(),
            owned(&[
                stages::GENOMICS,
                stages::PROTEOMICS,
                stages::LITERATURE,
                stages::DRUG,
            ]),
        );

        Self {
            groups,
            dependencies,
        }
    }

    pub fn validate(&self) -> GenoflowResult<()> {
        let mut seen: HashSet<&str> = HashSet::new();

        for (index, group) in self.groups.iter().enumerate() {
            if group.is_empty() {
                return Err(GenoflowError::Config(format!("plan group {} is empty", index)));
            }
            for stage in &group.tasks {
                if WorkflowStatus::for_stage(stage).is_none() {
                    return Err(GenoflowError::Config(format!("unknown stage '{}'", stage)));
                }
                for dep in self.dependencies(stage) {
                    if !seen.contains(dep.as_str()) {
                        return Err(GenoflowError::Config(format!(
                            "stage '{}' depends on '{}' which does not run in an earlier group",
                            stage, dep
                        )));
                    }
                }
            }
            for stage in &group.tasks {
                if !seen.insert(stage.as_str()) {
                    return Err(GenoflowError::Config(format!(
                        "stage '{}' appears more than once",
                        stage
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn groups(&self) -> &[Stage<String>] {
        &self.groups
    }

    /// Declared upstream stages of `stage`.
    pub fn dependencies(&self, stage: &str) -> &[String] {
        self.dependencies
            .get(stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every stage, in plan order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| g.tasks.iter().map(String::as_str))
    }

    pub fn stage_count(&self) -> usize {
        self.groups.iter().map(Stage::len).sum()
    }

    /// Last stage in plan order; its outcome decides completion.
    pub fn final_stage(&self) -> Option<&str> {
        self.stage_names().last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ExecutionMode;

    #[test]
    fn test_standard_plan_shape() {
        let plan = PipelinePlan::standard(true);
        plan.validate().unwrap();

        let names: Vec<&str> = plan.stage_names().collect();
        assert_eq!(names, stages::ORDER.to_vec());
        assert_eq!(plan.stage_count(), 5);
        assert_eq!(plan.final_stage(), Some(stages::DECISION));
        assert_eq!(plan.groups()[2].execution, ExecutionMode::Parallel);
        assert!(plan.groups()[2].is_group());
        assert_eq!(plan.dependencies(stages::DECISION).len(), 4);
        assert!(plan.dependencies(stages::GENOMICS).is_empty());
    }

    #[test]
    fn test_parallel_disabled_plan() {
        let plan = PipelinePlan::standard(false);
        plan.validate().unwrap();
        assert_eq!(plan.groups()[2].execution, ExecutionMode::Sequential);
        assert_eq!(plan.groups()[2].len(), 2);
    }

    #[test]
    fn test_rejects_dependency_inside_group() {
        let mut deps = BTreeMap::new();
        deps.insert("drug".to_string(), vec!["literature".to_string()]);
        let err = PipelinePlan::new(
            vec![Stage::parallel(vec!["literature".to_string(), "drug".to_string()])],
            deps,
        )
        .unwrap_err();
        assert!(matches!(err, GenoflowError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_duplicate_and_empty() {
        assert!(
            PipelinePlan::new(vec![Stage::single("astrology".to_string())], BTreeMap::new())
                .is_err()
        );
        assert!(
            PipelinePlan::new(
                vec![
                    Stage::single("genomics".to_string()),
                    Stage::single("genomics".to_string())
                ],
                BTreeMap::new()
            )
            .is_err()
        );
        assert!(PipelinePlan::new(vec![Stage::parallel(vec![])], BTreeMap::new()).is_err());
    }
}
