//! Fixture store for the `medate_exam` tables.
//!
//! The harness installs and removes fixture rows through [`MedicalStore`] and reads them back
//! for the data-validation cases. The reference stub serves the API from the same trait.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use api_shared::{LabResultRecord, Patient};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::config::StoreBackend;
use crate::fixtures::{FixtureSet, Namespace};
use crate::tables::{Row, Table};
use crate::HarnessResult;

/// Inclusive date window; an absent bound is open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self::new(Some(from), Some(to))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }

    /// Query-string form of the bounds.
    pub fn as_query(&self) -> (Option<String>, Option<String>) {
        (
            self.from.map(|d| d.to_string()),
            self.to.map(|d| d.to_string()),
        )
    }
}

/// Column description as reported by `information_schema.columns`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

#[async_trait]
pub trait MedicalStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    /// Cheap reachability probe.
    async fn ping(&self) -> HarnessResult<()>;

    /// Inserts every row of the set in dependency order and returns the generated
    /// `result_id`s in the order of `set.lab_results`.
    async fn insert_fixtures(&self, set: &FixtureSet) -> HarnessResult<Vec<i64>>;

    /// Deletes every row keyed under the namespace, children first. Returns the number of
    /// deleted rows.
    async fn remove_namespace(&self, namespace: &Namespace) -> HarnessResult<u64>;

    async fn find_patient(&self, patient_id: &str) -> HarnessResult<Option<Patient>>;

    /// Results of the patient's tests inside the window, joined with the test name and ordered
    /// by performed date and time. `None` when the patient does not exist.
    async fn lab_results(
        &self,
        patient_id: &str,
        window: DateWindow,
    ) -> HarnessResult<Option<Vec<LabResultRecord>>>;

    /// Rows of a table whose namespace column starts with `prefix` (all rows for `""`),
    /// ordered by primary key.
    async fn rows(&self, table: Table, prefix: &str) -> HarnessResult<Vec<Row>>;

    /// Returns false when no such result exists.
    async fn update_reviewer(&self, result_id: i64, reviewer: &str) -> HarnessResult<bool>;

    /// Returns false when no such result exists.
    async fn delete_lab_result(&self, result_id: i64) -> HarnessResult<bool>;

    /// Live column layout of a table; `None` for stores without a catalogue.
    async fn column_types(&self, table: Table) -> HarnessResult<Option<Vec<ColumnInfo>>>;
}
