//! Run report: per-case results, per-group counts and latency statistics.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::case::Group;
use crate::outcome::Outcome;
use crate::stats::LatencyStats;

#[derive(Clone, Debug, Serialize)]
pub struct CaseReport {
    pub group: Group,
    pub name: String,
    pub outcome: Outcome,
    /// Failure diagnostic or skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub attempts: u32,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyStats>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

impl OutcomeCounts {
    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Errored => self.errored += 1,
            Outcome::TimedOut => self.timed_out += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored + self.timed_out + self.skipped
    }

    pub fn problems(&self) -> usize {
        self.failed + self.errored + self.timed_out
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} errored, {} timed out, {} skipped",
            self.passed, self.failed, self.errored, self.timed_out, self.skipped
        )
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GroupSummary {
    pub group: Group,
    pub counts: OutcomeCounts,
}

#[derive(Clone, Debug, Serialize)]
pub struct SuiteReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub totals: OutcomeCounts,
    pub groups: Vec<GroupSummary>,
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn new(started_at: DateTime<Utc>, duration: std::time::Duration, cases: Vec<CaseReport>) -> Self {
        let mut totals = OutcomeCounts::default();
        let mut groups: Vec<GroupSummary> = Vec::new();
        for case in &cases {
            totals.add(case.outcome);
            match groups.iter_mut().find(|g| g.group == case.group) {
                Some(summary) => summary.counts.add(case.outcome),
                None => {
                    let mut counts = OutcomeCounts::default();
                    counts.add(case.outcome);
                    groups.push(GroupSummary {
                        group: case.group,
                        counts,
                    });
                }
            }
        }
        groups.sort_by_key(|g| g.group);

        Self {
            started_at,
            duration_ms: duration.as_secs_f64() * 1000.0,
            totals,
            groups,
            cases,
        }
    }

    /// No case failed, errored or timed out.
    pub fn is_success(&self) -> bool {
        self.totals.problems() == 0
    }

    pub fn group(&self, group: Group) -> Option<&OutcomeCounts> {
        self.groups
            .iter()
            .find(|g| g.group == group)
            .map(|g| &g.counts)
    }

    pub fn case(&self, group: Group, name: &str) -> Option<&CaseReport> {
        self.cases
            .iter()
            .find(|c| c.group == group && c.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "PASS",
        Outcome::Failed => "FAIL",
        Outcome::Errored => "ERROR",
        Outcome::TimedOut => "TIMEOUT",
        Outcome::Skipped => "SKIP",
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "medata run started {} ({} cases, {:.1} ms)",
            self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.totals.total(),
            self.duration_ms
        )?;

        for summary in &self.groups {
            writeln!(f)?;
            writeln!(f, "[{}] {}", summary.group, summary.counts)?;
            for case in self.cases.iter().filter(|c| c.group == summary.group) {
                write!(
                    f,
                    "  {:<7} {} ({:.1} ms",
                    label(case.outcome),
                    case.name,
                    case.duration_ms
                )?;
                if case.attempts > 1 {
                    write!(f, ", {} attempts", case.attempts)?;
                }
                write!(f, ")")?;
                if let Some(detail) = &case.detail {
                    write!(f, ": {detail}")?;
                }
                writeln!(f)?;
                if let Some(l) = &case.latency {
                    writeln!(
                        f,
                        "          latency n={} min={:.2} mean={:.2} p95={:.2} max={:.2} ms",
                        l.count, l.min_ms, l.mean_ms, l.p95_ms, l.max_ms
                    )?;
                }
            }
        }

        writeln!(f)?;
        write!(f, "Summary: {}", self.totals)
    }
}
