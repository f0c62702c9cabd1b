//! Workflows catalog (§6, §9): the plan-then-execute graph is
//! configuration, not hard-coded transitions. A named workflow is a
//! template of `PlanStep`s; `Planning` picks one and instantiates it.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::session::PlanStep;

/// One step in a workflow template, bound to an agent by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    pub title: String,
    pub agent_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    pub steps: Vec<StepTemplate>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, steps: Vec<StepTemplate>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    pub fn instantiate(&self) -> Vec<PlanStep> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| PlanStep::new(index as u32, step.title.clone(), step.agent_name.clone()))
            .collect()
    }
}

/// Immutable for the process lifetime (§6) — reload requires a restart.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: FxHashMap<String, WorkflowTemplate>,
}

impl WorkflowCatalog {
    pub fn new(workflows: impl IntoIterator<Item = WorkflowTemplate>) -> Self {
        Self {
            workflows: workflows.into_iter().map(|w| (w.name.clone(), w)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowTemplate> {
        self.workflows.get(name)
    }

    pub fn instantiate(&self, name: &str) -> Option<Vec<PlanStep>> {
        self.get(name).map(WorkflowTemplate::instantiate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiate_produces_sequential_plan_steps() {
        let catalog = WorkflowCatalog::new([WorkflowTemplate::new(
            "qa",
            vec![
                StepTemplate {
                    title: "Plan query".into(),
                    agent_name: "planner".into(),
                },
                StepTemplate {
                    title: "Search".into(),
                    agent_name: "searcher".into(),
                },
            ],
        )]);
        let steps = catalog.instantiate("qa").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].index, 1);
        assert_eq!(steps[1].agent_name, "searcher");
    }

    #[test]
    fn unknown_workflow_returns_none() {
        let catalog = WorkflowCatalog::default();
        assert!(catalog.instantiate("missing").is_none());
    }
}
