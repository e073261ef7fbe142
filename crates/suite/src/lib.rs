//! # Medata Suite
//!
//! Contract cases for the medical-data API and the runner that executes them.
//!
//! - `case`: named cases grouped into health, patient, lab results, performance and data
//!   validation
//! - `runner`: parallel execution with per-case timeouts, retries for flaky cases and fixture
//!   setup/teardown around every attempt
//! - `report`: per-case outcomes, per-group counts and latency statistics

pub mod case;
pub mod context;
pub mod outcome;
pub mod report;
pub mod runner;
pub mod stats;
pub mod suites;

pub use case::{Case, Group};
pub use context::{CaseContext, SuiteEnv};
pub use outcome::{CaseFailure, CaseResult, Outcome};
pub use report::{CaseReport, OutcomeCounts, SuiteReport};
pub use runner::Runner;

use std::sync::Arc;

/// Every case, in group order.
pub fn all_cases() -> Vec<Case> {
    cases_for(&Group::ALL)
}

/// Cases of the given groups, in group order. An empty selection means every group.
pub fn cases_for(groups: &[Group]) -> Vec<Case> {
    let selected = |g: Group| groups.is_empty() || groups.contains(&g);
    Group::ALL
        .into_iter()
        .filter(|g| selected(*g))
        .flat_map(|g| match g {
            Group::Health => suites::health::cases(),
            Group::Patient => suites::patient::cases(),
            Group::LabResults => suites::lab_results::cases(),
            Group::Performance => suites::performance::cases(),
            Group::DataValidation => suites::data_validation::cases(),
        })
        .collect()
}

/// Runs the selected groups against the environment.
pub async fn run_suite(env: Arc<SuiteEnv>, groups: &[Group]) -> SuiteReport {
    Runner::new(env).run(cases_for(groups)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_case_names_are_unique_within_groups() {
        let cases = all_cases();
        let ids: HashSet<String> = cases.iter().map(Case::id).collect();
        assert_eq!(ids.len(), cases.len());
    }

    #[test]
    fn test_group_selection() {
        let cases = cases_for(&[Group::Health]);
        assert!(!cases.is_empty());
        assert!(cases.iter().all(|c| c.group == Group::Health));
        assert_eq!(cases_for(&[]).len(), all_cases().len());
    }

    #[test]
    fn test_only_performance_cases_are_flaky() {
        for case in all_cases() {
            assert_eq!(case.flaky, case.group == Group::Performance, "{}", case.id());
        }
    }
}
