//! Case definitions.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;

use crate::context::CaseContext;
use crate::outcome::CaseResult;

/// Case groups, in report order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    Health,
    Patient,
    LabResults,
    Performance,
    DataValidation,
}

impl Group {
    pub const ALL: [Group; 5] = [
        Group::Health,
        Group::Patient,
        Group::LabResults,
        Group::Performance,
        Group::DataValidation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Group::Health => "health",
            Group::Patient => "patient",
            Group::LabResults => "lab_results",
            Group::Performance => "performance",
            Group::DataValidation => "data_validation",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown case group '{0}' (expected one of health, patient, lab_results, performance, data_validation)")]
pub struct UnknownGroup(pub String);

impl FromStr for Group {
    type Err = UnknownGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Group::ALL
            .into_iter()
            .find(|g| g.as_str() == normalized)
            .ok_or_else(|| UnknownGroup(s.to_owned()))
    }
}

type CaseBody = Arc<dyn Fn(CaseContext) -> BoxFuture<'static, CaseResult> + Send + Sync>;

/// One named check. The body receives a fresh [`CaseContext`] for every attempt.
#[derive(Clone)]
pub struct Case {
    pub group: Group,
    pub name: &'static str,
    /// Eligible for retry on failure.
    pub flaky: bool,
    /// Install a namespaced standard fixture set around the body.
    pub fixtures: bool,
    body: CaseBody,
}

impl Case {
    pub fn new<F, Fut>(group: Group, name: &'static str, body: F) -> Self
    where
        F: Fn(CaseContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CaseResult> + Send + 'static,
    {
        Self {
            group,
            name,
            flaky: false,
            fixtures: false,
            body: Arc::new(move |ctx| body(ctx).boxed()),
        }
    }

    pub fn flaky(mut self) -> Self {
        self.flaky = true;
        self
    }

    pub fn with_fixtures(mut self) -> Self {
        self.fixtures = true;
        self
    }

    /// `group::name`
    pub fn id(&self) -> String {
        format!("{}::{}", self.group, self.name)
    }

    pub(crate) fn start(&self, ctx: CaseContext) -> BoxFuture<'static, CaseResult> {
        (self.body)(ctx)
    }
}

impl fmt::Debug for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Case")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("flaky", &self.flaky)
            .field("fixtures", &self.fixtures)
            .finish_non_exhaustive()
    }
}
