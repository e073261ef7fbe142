//! Deterministic fixture data and its lifecycle.
//!
//! Every fixture key is prefixed with a per-fixture [`Namespace`] so that concurrent cases
//! never see each other's rows. [`FixtureGuard`] owns an installed set and removes it again,
//! either explicitly through [`FixtureGuard::teardown`] or, as a fallback, when dropped.

use std::sync::Arc;

use api_shared::{Admission, LabResult, LabResultRecord, LabTest, Patient};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use medata_types::{RecordId, ResultStatus};

use crate::constants::FIXTURE_PREFIX;
use crate::store::{DateWindow, MedicalStore};
use crate::{HarnessError, HarnessResult};

/// Key prefix of one fixture installation, e.g. `TEST_1a2b3c4d_`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{FIXTURE_PREFIX}_{}_", &hex[..8]))
    }

    /// Accepts an existing namespace, e.g. one printed by `medata seed`.
    pub fn parse(input: &str) -> HarnessResult<Self> {
        let input = input.trim();
        let expected_head = format!("{FIXTURE_PREFIX}_");
        let body_ok = input
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !input.starts_with(&expected_head)
            || !input.ends_with('_')
            || input.len() <= expected_head.len() + 1
            || !body_ok
        {
            return Err(HarnessError::InvalidInput(format!(
                "namespace '{input}' must look like {FIXTURE_PREFIX}_<id>_"
            )));
        }
        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespaced key for a local fixture name (`P0001` becomes `TEST_xxxxxxxx_P0001`).
    pub fn key(&self, local: &str) -> HarnessResult<RecordId> {
        Ok(RecordId::new(format!("{}{local}", self.0))?)
    }

    pub fn owns(&self, id: &str) -> bool {
        id.starts_with(&self.0)
    }

    /// `LIKE` pattern matching every key in the namespace, for use with `ESCAPE '\'`.
    pub fn like_pattern(&self) -> String {
        like_prefix_pattern(&self.0)
    }
}

/// `LIKE` pattern matching strings that start with `prefix` literally.
pub fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() * 2 + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive date range of the January results of the standard dataset (test `T1`).
pub fn january_window() -> DateWindow {
    DateWindow::between(ymd(2024, 1, 1), ymd(2024, 1, 31))
}

/// Inclusive date range of the February results of the standard dataset (test `T2`).
pub fn february_window() -> DateWindow {
    DateWindow::between(ymd(2024, 2, 1), ymd(2024, 2, 28))
}

/// A window the standard dataset has no results in.
pub fn empty_window() -> DateWindow {
    DateWindow::between(ymd(2024, 3, 1), ymd(2024, 3, 31))
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default()
}

fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// The rows of one fixture installation.
#[derive(Clone, Debug, PartialEq)]
pub struct FixtureSet {
    /// `None` for the unscoped demo dataset served by the local stub.
    pub namespace: Option<Namespace>,
    pub patients: Vec<Patient>,
    pub lab_tests: Vec<LabTest>,
    pub lab_results: Vec<LabResult>,
    pub admissions: Vec<Admission>,
}

impl FixtureSet {
    /// The standard dataset under a namespace.
    ///
    /// - `P0001` owns `T1` (three results in January 2024) and `T2` (two results in February
    ///   2024), one closed and one open admission
    /// - `P0002` has no lab tests
    pub fn standard(namespace: &Namespace) -> HarnessResult<Self> {
        let mut set = Self::build(namespace.as_str())?;
        set.namespace = Some(namespace.clone());
        Ok(set)
    }

    /// The standard dataset with bare keys (`P0001`, `T1`, ...).
    pub fn unscoped() -> HarnessResult<Self> {
        Self::build("")
    }

    fn build(prefix: &str) -> HarnessResult<Self> {
        let key = |local: &str| RecordId::new(format!("{prefix}{local}"));
        let john = key("P0001")?;
        let jane = key("P0002")?;
        let t1 = key("T1")?;
        let t2 = key("T2")?;

        let patients = vec![
            Patient {
                patient_id: john.clone(),
                first_name: "John".into(),
                last_name: "Doe".into(),
                date_of_birth: ymd(1990, 1, 1),
                primary_physician: Some("Dr. House".into()),
                insurance_provider: Some("Medicare".into()),
                blood_type: Some("A+".into()),
                allergies: Some("Penicillin".into()),
                created_at: utc(2024, 1, 1),
                updated_at: None,
            },
            Patient {
                patient_id: jane,
                first_name: "Jane".into(),
                last_name: "Smith".into(),
                date_of_birth: ymd(1992, 2, 2),
                primary_physician: Some("Dr. Wilson".into()),
                insurance_provider: Some("BlueCross".into()),
                blood_type: Some("O-".into()),
                allergies: None,
                created_at: utc(2024, 1, 1),
                updated_at: None,
            },
        ];

        let lab_tests = vec![
            LabTest {
                test_id: t1.clone(),
                patient_id: john.clone(),
                test_name: "Blood Test".into(),
                order_date: ymd(2024, 1, 1),
                order_time: hm(8, 0),
                ordering_physician: Some("Dr. House".into()),
            },
            LabTest {
                test_id: t2.clone(),
                patient_id: john.clone(),
                test_name: "Lipid Panel".into(),
                order_date: ymd(2024, 2, 1),
                order_time: hm(8, 0),
                ordering_physician: Some("Dr. House".into()),
            },
        ];

        let result = |test: &RecordId,
                      date: NaiveDate,
                      time: NaiveTime,
                      value: f64,
                      range: &str,
                      status: ResultStatus| LabResult {
            result_id: 0,
            test_id: test.clone(),
            result_value: Some(value),
            result_unit: Some("mg/dL".into()),
            reference_range: Some(range.into()),
            result_status: status,
            performed_date: date,
            performed_time: time,
            reviewing_physician: Some("Dr. Chase".into()),
        };

        let lab_results = vec![
            result(&t1, ymd(2024, 1, 2), hm(9, 0), 85.5, "70-100", ResultStatus::Final),
            result(&t1, ymd(2024, 1, 15), hm(10, 30), 90.2, "70-100", ResultStatus::Final),
            result(&t1, ymd(2024, 1, 31), hm(16, 0), 88.0, "70-100", ResultStatus::Corrected),
            result(&t2, ymd(2024, 2, 1), hm(12, 0), 180.0, "<200", ResultStatus::Preliminary),
            result(&t2, ymd(2024, 2, 28), hm(11, 0), 175.0, "<200", ResultStatus::Final),
        ];

        let admissions = vec![
            Admission {
                hospitalization_case_number: key("A1")?,
                patient_id: john.clone(),
                admission_date: ymd(2024, 1, 1),
                admission_time: hm(7, 0),
                release_date: Some(ymd(2024, 1, 3)),
                release_time: Some(hm(10, 0)),
                admission_type: Some("Emergency".into()),
                admitting_physician: Some("Dr. House".into()),
                department: Some("Emergency".into()),
                room_number: Some("E101".into()),
                diagnosis: Some("Chest pain".into()),
            },
            Admission {
                hospitalization_case_number: key("A2")?,
                patient_id: john,
                admission_date: ymd(2024, 2, 1),
                admission_time: hm(7, 30),
                release_date: None,
                release_time: None,
                admission_type: Some("Outpatient".into()),
                admitting_physician: Some("Dr. Wilson".into()),
                department: Some("Cardiology".into()),
                room_number: Some("O202".into()),
                diagnosis: Some("Lipid screening".into()),
            },
        ];

        Ok(Self {
            namespace: None,
            patients,
            lab_tests,
            lab_results,
            admissions,
        })
    }

    fn prefix(&self) -> &str {
        self.namespace.as_ref().map_or("", Namespace::as_str)
    }

    /// Patient with lab tests in both windows.
    pub fn known_patient_id(&self) -> String {
        format!("{}P0001", self.prefix())
    }

    /// Patient that exists but has no lab tests.
    pub fn patient_without_results_id(&self) -> String {
        format!("{}P0002", self.prefix())
    }

    /// Well-formed id that is never installed.
    pub fn unknown_patient_id(&self) -> String {
        format!("{}NONEXISTENT", self.prefix())
    }

    pub fn test_id(&self, local: &str) -> String {
        format!("{}{local}", self.prefix())
    }

    pub fn patient(&self, patient_id: &str) -> Option<&Patient> {
        self.patients
            .iter()
            .find(|p| p.patient_id.as_str() == patient_id)
    }

    /// Records the lab-results endpoint should return for a patient and window, ordered by
    /// performed date and time.
    pub fn expected_lab_results(&self, patient_id: &str, window: DateWindow) -> Vec<LabResultRecord> {
        let mut records: Vec<LabResultRecord> = self
            .lab_tests
            .iter()
            .filter(|t| t.patient_id.as_str() == patient_id)
            .flat_map(|test| {
                self.lab_results
                    .iter()
                    .filter(move |r| r.test_id == test.test_id && window.contains(r.performed_date))
                    .map(move |r| r.clone().with_test_name(test.test_name.clone()))
            })
            .collect();
        records.sort_by_key(|r| (r.performed_date, r.performed_time, r.result_id));
        records
    }

    /// Writes store-assigned result ids back, in insertion order.
    pub fn assign_result_ids(&mut self, ids: &[i64]) -> HarnessResult<()> {
        if ids.len() != self.lab_results.len() {
            return Err(HarnessError::Fixture(format!(
                "store assigned {} result ids for {} lab results",
                ids.len(),
                self.lab_results.len()
            )));
        }
        for (result, id) in self.lab_results.iter_mut().zip(ids) {
            result.result_id = *id;
        }
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.patients.len() + self.lab_tests.len() + self.lab_results.len() + self.admissions.len()
    }
}

/// An installed [`FixtureSet`] that is removed again when the case is done.
pub struct FixtureGuard {
    store: Arc<dyn MedicalStore>,
    set: FixtureSet,
    namespace: Namespace,
    torn_down: bool,
}

impl FixtureGuard {
    /// Installs a namespaced set. A failed install removes whatever was written before the
    /// error is returned.
    pub async fn install(store: Arc<dyn MedicalStore>, mut set: FixtureSet) -> HarnessResult<Self> {
        let namespace = set.namespace.clone().ok_or_else(|| {
            HarnessError::Fixture("only namespaced fixture sets can be guarded".into())
        })?;

        let ids = match store.insert_fixtures(&set).await {
            Ok(ids) => ids,
            // An unreachable database took nothing, and a cleanup would only wait out the
            // pool timeout a second time.
            Err(e @ HarnessError::DatabaseUnavailable(_)) => return Err(e),
            Err(e) => {
                remove_after_failed_install(store.as_ref(), &namespace).await;
                return Err(e);
            }
        };
        if let Err(e) = set.assign_result_ids(&ids) {
            remove_after_failed_install(store.as_ref(), &namespace).await;
            return Err(e);
        }

        tracing::debug!(namespace = %namespace, rows = set.row_count(), "fixtures installed");
        Ok(Self {
            store,
            set,
            namespace,
            torn_down: false,
        })
    }

    pub fn set(&self) -> &FixtureSet {
        &self.set
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn MedicalStore> {
        &self.store
    }

    /// Removes the namespace and returns the number of deleted rows.
    pub async fn teardown(mut self) -> HarnessResult<u64> {
        self.torn_down = true;
        let removed = self.store.remove_namespace(&self.namespace).await?;
        tracing::debug!(namespace = %self.namespace, removed, "fixtures removed");
        Ok(removed)
    }
}

async fn remove_after_failed_install(store: &dyn MedicalStore, namespace: &Namespace) {
    if let Err(e) = store.remove_namespace(namespace).await {
        tracing::warn!(namespace = %namespace, error = %e, "cleanup after failed install failed");
    }
}

impl Drop for FixtureGuard {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.remove_namespace(&namespace).await {
                        tracing::warn!(namespace = %namespace, error = %e, "deferred fixture cleanup failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(namespace = %namespace, "no runtime to remove fixtures, rows left behind");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::tables::Table;

    #[test]
    fn test_generated_namespaces_are_unique_and_well_formed() {
        let a = Namespace::generate();
        let b = Namespace::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), "TEST_".len() + 8 + 1);
        assert!(a.as_str().starts_with("TEST_"));
        assert!(a.as_str().ends_with('_'));
        assert_eq!(Namespace::parse(a.as_str()).expect("parse"), a);
    }

    #[test]
    fn test_namespace_parse_rejects_unscoped_prefixes() {
        for bad in ["", "TEST_", "P0001", "TEST_abc", "TEST_a b_", "%_"] {
            let err = Namespace::parse(bad).expect_err(bad);
            assert!(matches!(err, HarnessError::InvalidInput(_)));
        }
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        let ns = Namespace::parse("TEST_1a2b3c4d_").expect("ns");
        assert_eq!(ns.like_pattern(), "TEST\\_1a2b3c4d\\_%");
        assert_eq!(like_prefix_pattern(""), "%");
        assert_eq!(like_prefix_pattern("50%"), "50\\%%");
        assert!(ns.owns("TEST_1a2b3c4d_P0001"));
        assert!(!ns.owns("TEST_ffffffff_P0001"));
        assert_eq!(ns.key("T1").expect("key").as_str(), "TEST_1a2b3c4d_T1");
    }

    #[test]
    fn test_standard_set_is_namespaced_and_consistent() {
        let ns = Namespace::generate();
        let set = FixtureSet::standard(&ns).expect("set");
        assert!(set.patients.iter().all(|p| ns.owns(p.patient_id.as_str())));
        assert!(set.lab_tests.iter().all(|t| ns.owns(t.test_id.as_str())));
        assert!(set.admissions.iter().all(|a| ns.owns(a.patient_id.as_str())));
        assert_eq!(set.row_count(), 11);

        for result in &set.lab_results {
            let test = set
                .lab_tests
                .iter()
                .find(|t| t.test_id == result.test_id)
                .expect("owning test");
            assert!(result.performed_at() >= test.ordered_at());
        }
        for admission in &set.admissions {
            if let Some(released) = admission.released_at() {
                assert!(released >= admission.admitted_at());
            }
        }
    }

    #[test]
    fn test_expected_results_follow_the_windows() {
        let set = FixtureSet::unscoped().expect("set");
        let january = set.expected_lab_results("P0001", january_window());
        assert_eq!(january.len(), 3);
        assert!(january.iter().all(|r| r.test_id.as_str() == "T1"));
        assert!(january.iter().all(|r| r.test_name == "Blood Test"));

        let february = set.expected_lab_results("P0001", february_window());
        assert_eq!(february.len(), 2);
        assert!(february.iter().all(|r| r.test_id.as_str() == "T2"));

        assert!(set.expected_lab_results("P0001", empty_window()).is_empty());
        assert!(set.expected_lab_results("P0002", DateWindow::default()).is_empty());
        assert_eq!(set.expected_lab_results("P0001", DateWindow::default()).len(), 5);
    }

    #[test]
    fn test_assign_result_ids_checks_length() {
        let mut set = FixtureSet::unscoped().expect("set");
        set.assign_result_ids(&[10, 11, 12, 13, 14]).expect("assign");
        assert_eq!(set.lab_results[4].result_id, 14);
        let err = set.assign_result_ids(&[1]).expect_err("short");
        assert!(matches!(err, HarnessError::Fixture(_)));
    }

    #[tokio::test]
    async fn test_guard_installs_and_tears_down() {
        let store: Arc<dyn MedicalStore> = Arc::new(MemoryStore::new());
        let ns = Namespace::generate();
        let guard = FixtureGuard::install(store.clone(), FixtureSet::standard(&ns).expect("set"))
            .await
            .expect("install");

        let ids: Vec<i64> = guard.set().lab_results.iter().map(|r| r.result_id).collect();
        assert!(ids.iter().all(|id| *id > 0));
        assert!(store
            .find_patient(&guard.set().known_patient_id())
            .await
            .expect("query")
            .is_some());

        let removed = guard.teardown().await.expect("teardown");
        assert_eq!(removed, 11);
        assert!(store
            .rows(Table::PatientInformation, ns.as_str())
            .await
            .expect("rows")
            .is_empty());
    }

    #[tokio::test]
    async fn test_dropped_guard_schedules_cleanup() {
        let store: Arc<dyn MedicalStore> = Arc::new(MemoryStore::new());
        let ns = Namespace::generate();
        let guard = FixtureGuard::install(store.clone(), FixtureSet::standard(&ns).expect("set"))
            .await
            .expect("install");
        drop(guard);

        for _ in 0..50 {
            let rows = store
                .rows(Table::LabResults, ns.as_str())
                .await
                .expect("rows");
            if rows.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("dropped guard did not remove namespace {ns}");
    }

    #[tokio::test]
    async fn test_failed_install_removes_the_namespace() {
        let store: Arc<dyn MedicalStore> = Arc::new(MemoryStore::new());
        let ns = Namespace::generate();
        let set = FixtureSet::standard(&ns).expect("set");
        store.insert_fixtures(&set).await.expect("first insert");

        // Same keys again: rejected, and the namespace is cleared behind it.
        let err = FixtureGuard::install(store.clone(), set)
            .await
            .err()
            .expect("duplicate");
        assert!(matches!(err, HarnessError::Fixture(msg) if msg.contains("duplicate key")));
        for table in Table::INSERT_ORDER {
            assert!(store.rows(table, ns.as_str()).await.expect("rows").is_empty());
        }
    }

    #[tokio::test]
    async fn test_unscoped_sets_cannot_be_guarded() {
        let store: Arc<dyn MedicalStore> = Arc::new(MemoryStore::new());
        let err = FixtureGuard::install(store, FixtureSet::unscoped().expect("set"))
            .await
            .err()
            .expect("unscoped");
        assert!(matches!(err, HarnessError::Fixture(_)));
    }
}
