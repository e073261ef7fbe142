//! In-memory [`MedicalStore`] for local runs and tests.
//!
//! Enforces the same primary-key and foreign-key rules as the Postgres schema so that fixture
//! mistakes surface without a database.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use api_shared::{Admission, LabResult, LabResultRecord, LabTest, Patient};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ColumnInfo, DateWindow, MedicalStore};
use crate::config::StoreBackend;
use crate::fixtures::{FixtureSet, Namespace};
use crate::tables::{Row, Table, ToRow};
use crate::{HarnessError, HarnessResult};

#[derive(Debug, Default)]
struct Tables {
    patients: BTreeMap<String, Patient>,
    lab_tests: BTreeMap<String, LabTest>,
    lab_results: BTreeMap<i64, LabResult>,
    admissions: BTreeMap<String, Admission>,
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_result_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_result_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn violation(message: String) -> HarnessError {
    HarnessError::Fixture(message)
}

/// Checks the set against existing rows before anything is written.
fn check_constraints(tables: &Tables, set: &FixtureSet) -> HarnessResult<()> {
    let mut patient_ids = HashSet::new();
    for patient in &set.patients {
        let id = patient.patient_id.as_str();
        if tables.patients.contains_key(id) || !patient_ids.insert(id) {
            return Err(violation(format!(
                "duplicate key patient_id={id} in patient_information"
            )));
        }
    }
    let patient_exists =
        |id: &str| patient_ids.contains(id) || tables.patients.contains_key(id);

    let mut test_ids = HashSet::new();
    for test in &set.lab_tests {
        let id = test.test_id.as_str();
        if tables.lab_tests.contains_key(id) || !test_ids.insert(id) {
            return Err(violation(format!("duplicate key test_id={id} in lab_tests")));
        }
        if !patient_exists(test.patient_id.as_str()) {
            return Err(violation(format!(
                "lab_tests.patient_id={} references no patient",
                test.patient_id
            )));
        }
    }

    for result in &set.lab_results {
        let test_id = result.test_id.as_str();
        if !test_ids.contains(test_id) && !tables.lab_tests.contains_key(test_id) {
            return Err(violation(format!(
                "lab_results.test_id={test_id} references no lab test"
            )));
        }
    }

    let mut case_numbers = HashSet::new();
    for admission in &set.admissions {
        let id = admission.hospitalization_case_number.as_str();
        if tables.admissions.contains_key(id) || !case_numbers.insert(id) {
            return Err(violation(format!(
                "duplicate key hospitalization_case_number={id} in admissions"
            )));
        }
        if !patient_exists(admission.patient_id.as_str()) {
            return Err(violation(format!(
                "admissions.patient_id={} references no patient",
                admission.patient_id
            )));
        }
        if admission
            .released_at()
            .is_some_and(|released| released < admission.admitted_at())
        {
            return Err(violation(format!(
                "admission {id} is released before it was admitted"
            )));
        }
    }
    Ok(())
}

fn collect_rows<'a, T, I>(items: I, table: Table, prefix: &str) -> Vec<Row>
where
    T: ToRow + 'a,
    I: Iterator<Item = &'a T>,
{
    let column = table.namespace_column();
    items
        .map(|item| item.to_row())
        .filter(|row| {
            row.get(column)
                .and_then(|v| v.as_text())
                .is_some_and(|v| v.starts_with(prefix))
        })
        .collect()
}

#[async_trait]
impl MedicalStore for MemoryStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn ping(&self) -> HarnessResult<()> {
        Ok(())
    }

    async fn insert_fixtures(&self, set: &FixtureSet) -> HarnessResult<Vec<i64>> {
        let mut tables = self.tables.write().await;
        check_constraints(&tables, set)?;

        for patient in &set.patients {
            tables
                .patients
                .insert(patient.patient_id.to_string(), patient.clone());
        }
        for test in &set.lab_tests {
            tables.lab_tests.insert(test.test_id.to_string(), test.clone());
        }
        let mut ids = Vec::with_capacity(set.lab_results.len());
        for result in &set.lab_results {
            let id = self.next_result_id.fetch_add(1, Ordering::Relaxed);
            let mut stored = result.clone();
            stored.result_id = id;
            tables.lab_results.insert(id, stored);
            ids.push(id);
        }
        for admission in &set.admissions {
            tables.admissions.insert(
                admission.hospitalization_case_number.to_string(),
                admission.clone(),
            );
        }
        Ok(ids)
    }

    async fn remove_namespace(&self, namespace: &Namespace) -> HarnessResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.lab_results.len()
            + tables.lab_tests.len()
            + tables.admissions.len()
            + tables.patients.len();

        tables
            .lab_results
            .retain(|_, r| !namespace.owns(r.test_id.as_str()));
        tables.lab_tests.retain(|id, _| !namespace.owns(id));
        tables.admissions.retain(|id, _| !namespace.owns(id));
        tables.patients.retain(|id, _| !namespace.owns(id));

        let after = tables.lab_results.len()
            + tables.lab_tests.len()
            + tables.admissions.len()
            + tables.patients.len();
        Ok((before - after) as u64)
    }

    async fn find_patient(&self, patient_id: &str) -> HarnessResult<Option<Patient>> {
        Ok(self.tables.read().await.patients.get(patient_id).cloned())
    }

    async fn lab_results(
        &self,
        patient_id: &str,
        window: DateWindow,
    ) -> HarnessResult<Option<Vec<LabResultRecord>>> {
        let tables = self.tables.read().await;
        if !tables.patients.contains_key(patient_id) {
            return Ok(None);
        }

        let tests: BTreeMap<&str, &str> = tables
            .lab_tests
            .values()
            .filter(|t| t.patient_id.as_str() == patient_id)
            .map(|t| (t.test_id.as_str(), t.test_name.as_str()))
            .collect();

        let mut records: Vec<LabResultRecord> = tables
            .lab_results
            .values()
            .filter(|r| window.contains(r.performed_date))
            .filter_map(|r| {
                tests
                    .get(r.test_id.as_str())
                    .map(|name| r.clone().with_test_name(*name))
            })
            .collect();
        records.sort_by_key(|r| (r.performed_date, r.performed_time, r.result_id));
        Ok(Some(records))
    }

    async fn rows(&self, table: Table, prefix: &str) -> HarnessResult<Vec<Row>> {
        let tables = self.tables.read().await;
        let rows = match table {
            Table::PatientInformation => collect_rows(tables.patients.values(), table, prefix),
            Table::LabTests => collect_rows(tables.lab_tests.values(), table, prefix),
            Table::LabResults => collect_rows(tables.lab_results.values(), table, prefix),
            Table::Admissions => collect_rows(tables.admissions.values(), table, prefix),
        };
        Ok(rows)
    }

    async fn update_reviewer(&self, result_id: i64, reviewer: &str) -> HarnessResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.lab_results.get_mut(&result_id) {
            Some(result) => {
                result.reviewing_physician = Some(reviewer.to_owned());
                true
            }
            None => false,
        })
    }

    async fn delete_lab_result(&self, result_id: i64) -> HarnessResult<bool> {
        Ok(self
            .tables
            .write()
            .await
            .lab_results
            .remove(&result_id)
            .is_some())
    }

    async fn column_types(&self, _table: Table) -> HarnessResult<Option<Vec<ColumnInfo>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{empty_window, february_window, january_window};
    use crate::tables::CellValue;
    use medata_types::RecordId;

    async fn seeded() -> (MemoryStore, FixtureSet) {
        let store = MemoryStore::new();
        let mut set = FixtureSet::standard(&Namespace::generate()).expect("set");
        let ids = store.insert_fixtures(&set).await.expect("insert");
        set.assign_result_ids(&ids).expect("ids");
        (store, set)
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_result_ids() {
        let (store, set) = seeded().await;
        let ids: Vec<i64> = set.lab_results.iter().map(|r| r.result_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        let other = FixtureSet::standard(&Namespace::generate()).expect("set");
        let more = store.insert_fixtures(&other).await.expect("insert");
        assert_eq!(more.first(), Some(&6));
    }

    #[tokio::test]
    async fn test_duplicate_and_dangling_keys_are_rejected() {
        let (store, set) = seeded().await;
        let err = store.insert_fixtures(&set).await.expect_err("duplicate");
        assert!(matches!(err, HarnessError::Fixture(msg) if msg.contains("duplicate key")));

        let mut dangling = FixtureSet::standard(&Namespace::generate()).expect("set");
        dangling.lab_tests[0].patient_id = RecordId::new("NOBODY").expect("id");
        let err = store.insert_fixtures(&dangling).await.expect_err("fk");
        assert!(matches!(err, HarnessError::Fixture(msg) if msg.contains("references no patient")));

        let mut reversed = FixtureSet::standard(&Namespace::generate()).expect("set");
        let admitted = reversed.admissions[0].admission_date;
        reversed.admissions[0].release_date = admitted.pred_opt();
        let err = store.insert_fixtures(&reversed).await.expect_err("release");
        assert!(matches!(err, HarnessError::Fixture(msg) if msg.contains("released before")));
    }

    #[tokio::test]
    async fn test_same_day_release_before_admission_time_is_rejected() {
        let store = MemoryStore::new();
        let mut set = FixtureSet::standard(&Namespace::generate()).expect("set");
        let admission = &mut set.admissions[0];
        admission.release_date = Some(admission.admission_date);
        // Admitted at 07:00.
        admission.release_time = chrono::NaiveTime::from_hms_opt(6, 0, 0);
        let err = store.insert_fixtures(&set).await.expect_err("release");
        assert!(matches!(err, HarnessError::Fixture(msg) if msg.contains("released before")));

        set.admissions[0].release_time = Some(set.admissions[0].admission_time);
        store.insert_fixtures(&set).await.expect("same instant");
    }

    #[tokio::test]
    async fn test_lab_results_follow_the_window() {
        let (store, set) = seeded().await;
        let patient = set.known_patient_id();

        let january = store
            .lab_results(&patient, january_window())
            .await
            .expect("query")
            .expect("known patient");
        assert_eq!(january, set.expected_lab_results(&patient, january_window()));
        assert_eq!(january.len(), 3);

        let february = store
            .lab_results(&patient, february_window())
            .await
            .expect("query")
            .expect("known patient");
        assert_eq!(february.len(), 2);
        assert!(february.iter().all(|r| r.test_name == "Lipid Panel"));

        let march = store
            .lab_results(&patient, empty_window())
            .await
            .expect("query")
            .expect("known patient");
        assert!(march.is_empty());

        let none = store
            .lab_results(&set.patient_without_results_id(), DateWindow::default())
            .await
            .expect("query");
        assert_eq!(none, Some(Vec::new()));

        let unknown = store
            .lab_results(&set.unknown_patient_id(), DateWindow::default())
            .await
            .expect("query");
        assert_eq!(unknown, None);
    }

    #[tokio::test]
    async fn test_rows_are_scoped_by_prefix() {
        let (store, set) = seeded().await;
        let ns = set.namespace.clone().expect("namespace");
        let other = FixtureSet::standard(&Namespace::generate()).expect("set");
        store.insert_fixtures(&other).await.expect("insert");

        let rows = store.rows(Table::LabResults, ns.as_str()).await.expect("rows");
        assert_eq!(rows.len(), 5);
        assert_eq!(store.rows(Table::LabResults, "").await.expect("rows").len(), 10);
        let patients = store
            .rows(Table::PatientInformation, ns.as_str())
            .await
            .expect("rows");
        assert_eq!(
            patients[0]["patient_id"],
            CellValue::Text(set.known_patient_id())
        );
    }

    #[tokio::test]
    async fn test_update_and_delete_lab_result() {
        let (store, set) = seeded().await;
        let id = set.lab_results[0].result_id;

        assert!(store.update_reviewer(id, "Dr. Foreman").await.expect("update"));
        assert!(!store.update_reviewer(9_999, "Dr. Foreman").await.expect("update"));
        let rows = store.rows(Table::LabResults, "").await.expect("rows");
        let updated = rows
            .iter()
            .find(|r| r["result_id"].as_int() == Some(id))
            .expect("row");
        assert_eq!(updated["reviewing_physician"], CellValue::Text("Dr. Foreman".into()));

        assert!(store.delete_lab_result(id).await.expect("delete"));
        assert!(!store.delete_lab_result(id).await.expect("delete"));
        assert_eq!(store.rows(Table::LabResults, "").await.expect("rows").len(), 4);
    }

    #[tokio::test]
    async fn test_remove_namespace_leaves_other_rows() {
        let (store, set) = seeded().await;
        let other = FixtureSet::standard(&Namespace::generate()).expect("set");
        store.insert_fixtures(&other).await.expect("insert");

        let removed = store
            .remove_namespace(set.namespace.as_ref().expect("namespace"))
            .await
            .expect("remove");
        assert_eq!(removed, 11);
        assert!(store.find_patient(&set.known_patient_id()).await.expect("find").is_none());
        assert!(store.find_patient(&other.known_patient_id()).await.expect("find").is_some());
        assert!(store.column_types(Table::LabResults).await.expect("types").is_none());
    }
}
