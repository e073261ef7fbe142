//! Wire models for the `medate_exam` entities.
//!
//! Field names match the table columns one to one so that the same structs serve the JSON
//! payloads of the API and the rows of the relational schema.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use medata_types::{RecordId, ResultStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Row of `patient_information`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Patient {
    #[schema(value_type = String)]
    pub patient_id: RecordId,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub primary_physician: Option<String>,
    pub insurance_provider: Option<String>,
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Row of `lab_tests`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LabTest {
    #[schema(value_type = String)]
    pub test_id: RecordId,
    #[schema(value_type = String)]
    pub patient_id: RecordId,
    pub test_name: String,
    pub order_date: NaiveDate,
    #[schema(value_type = String)]
    pub order_time: NaiveTime,
    pub ordering_physician: Option<String>,
}

impl LabTest {
    pub fn ordered_at(&self) -> NaiveDateTime {
        self.order_date.and_time(self.order_time)
    }
}

/// Row of `lab_results`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LabResult {
    pub result_id: i64,
    #[schema(value_type = String)]
    pub test_id: RecordId,
    pub result_value: Option<f64>,
    pub result_unit: Option<String>,
    pub reference_range: Option<String>,
    #[schema(value_type = String)]
    pub result_status: ResultStatus,
    pub performed_date: NaiveDate,
    #[schema(value_type = String)]
    pub performed_time: NaiveTime,
    pub reviewing_physician: Option<String>,
}

impl LabResult {
    pub fn performed_at(&self) -> NaiveDateTime {
        self.performed_date.and_time(self.performed_time)
    }

    /// Joins the owning test's name onto the result, as the lab-results endpoint does.
    pub fn with_test_name(self, test_name: impl Into<String>) -> LabResultRecord {
        LabResultRecord {
            result_id: self.result_id,
            test_id: self.test_id,
            result_value: self.result_value,
            result_unit: self.result_unit,
            reference_range: self.reference_range,
            result_status: self.result_status,
            performed_date: self.performed_date,
            performed_time: self.performed_time,
            reviewing_physician: self.reviewing_physician,
            test_name: test_name.into(),
        }
    }
}

/// One element of the `data` array returned by the lab-results endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LabResultRecord {
    pub result_id: i64,
    #[schema(value_type = String)]
    pub test_id: RecordId,
    pub result_value: Option<f64>,
    pub result_unit: Option<String>,
    pub reference_range: Option<String>,
    #[schema(value_type = String)]
    pub result_status: ResultStatus,
    pub performed_date: NaiveDate,
    #[schema(value_type = String)]
    pub performed_time: NaiveTime,
    pub reviewing_physician: Option<String>,
    pub test_name: String,
}

/// Row of `admissions`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Admission {
    #[schema(value_type = String)]
    pub hospitalization_case_number: RecordId,
    #[schema(value_type = String)]
    pub patient_id: RecordId,
    pub admission_date: NaiveDate,
    #[schema(value_type = String)]
    pub admission_time: NaiveTime,
    pub release_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>)]
    pub release_time: Option<NaiveTime>,
    pub admission_type: Option<String>,
    pub admitting_physician: Option<String>,
    pub department: Option<String>,
    pub room_number: Option<String>,
    pub diagnosis: Option<String>,
}

impl Admission {
    pub fn admitted_at(&self) -> NaiveDateTime {
        self.admission_date.and_time(self.admission_time)
    }

    /// Discharge timestamp; a release date without a time counts from midnight.
    pub fn released_at(&self) -> Option<NaiveDateTime> {
        self.release_date
            .map(|date| date.and_time(self.release_time.unwrap_or(NaiveTime::MIN)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> LabResult {
        LabResult {
            result_id: 7,
            test_id: RecordId::new("T1").expect("id"),
            result_value: Some(85.5),
            result_unit: Some("mg/dL".into()),
            reference_range: Some("70-100".into()),
            result_status: ResultStatus::Final,
            performed_date: NaiveDate::from_ymd_opt(2024, 1, 15).expect("date"),
            performed_time: NaiveTime::from_hms_opt(12, 0, 0).expect("time"),
            reviewing_physician: Some("Lab Tech 1".into()),
        }
    }

    #[test]
    fn test_lab_result_record_serialises_flat_with_test_name() {
        let record = result().with_test_name("Blood Test");
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["test_name"], "Blood Test");
        assert_eq!(json["result_status"], "Final");
        assert_eq!(json["performed_date"], "2024-01-15");
        assert_eq!(json["performed_time"], "12:00:00");
        assert_eq!(json["result_id"], 7);
    }

    #[test]
    fn test_admission_released_at_defaults_to_midnight() {
        let admission = Admission {
            hospitalization_case_number: RecordId::new("A1").expect("id"),
            patient_id: RecordId::new("P0001").expect("id"),
            admission_date: NaiveDate::from_ymd_opt(2024, 3, 14).expect("date"),
            admission_time: NaiveTime::from_hms_opt(9, 0, 0).expect("time"),
            release_date: NaiveDate::from_ymd_opt(2024, 3, 15),
            release_time: None,
            admission_type: None,
            admitting_physician: None,
            department: None,
            room_number: None,
            diagnosis: None,
        };
        let released = admission.released_at().expect("released");
        assert_eq!(released.to_string(), "2024-03-15 00:00:00");
        assert!(released >= admission.admitted_at());
    }
}
