//! Table catalogue of the `medate_exam` schema.
//!
//! Rows are kept as column-name to [`CellValue`] maps so that the store, the Parquet snapshots
//! and the row comparisons all share one representation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use api_shared::{Admission, LabResult, LabTest, Patient};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::HarnessError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    PatientInformation,
    LabTests,
    LabResults,
    Admissions,
}

impl Table {
    /// Parents before children.
    pub const INSERT_ORDER: [Table; 4] = [
        Table::PatientInformation,
        Table::LabTests,
        Table::LabResults,
        Table::Admissions,
    ];

    /// Children before parents.
    pub const DELETE_ORDER: [Table; 4] = [
        Table::LabResults,
        Table::LabTests,
        Table::Admissions,
        Table::PatientInformation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::PatientInformation => "patient_information",
            Table::LabTests => "lab_tests",
            Table::LabResults => "lab_results",
            Table::Admissions => "admissions",
        }
    }

    pub fn primary_key(self) -> &'static str {
        match self {
            Table::PatientInformation => "patient_id",
            Table::LabTests => "test_id",
            Table::LabResults => "result_id",
            Table::Admissions => "hospitalization_case_number",
        }
    }

    /// Column carrying the fixture namespace prefix. `lab_results` has a numeric key and is
    /// scoped through its owning test.
    pub fn namespace_column(self) -> &'static str {
        match self {
            Table::LabResults => "test_id",
            other => other.primary_key(),
        }
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            Table::PatientInformation => PATIENT_COLUMNS,
            Table::LabTests => LAB_TEST_COLUMNS,
            Table::LabResults => LAB_RESULT_COLUMNS,
            Table::Admissions => ADMISSION_COLUMNS,
        }
    }

    pub fn column(self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::INSERT_ORDER
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| HarnessError::InvalidInput(format!("unknown table '{s}'")))
    }
}

/// Logical column type, independent of the storage format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    BigInt,
    Float,
    Date,
    Time,
    Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
    /// `information_schema.columns.data_type` as Postgres reports it.
    pub pg_type: &'static str,
}

const fn col(name: &'static str, kind: ColumnKind, nullable: bool, pg_type: &'static str) -> Column {
    Column {
        name,
        kind,
        nullable,
        pg_type,
    }
}

const VARCHAR: &str = "character varying";
const TIME: &str = "time without time zone";
const TIMESTAMPTZ: &str = "timestamp with time zone";

const PATIENT_COLUMNS: &[Column] = &[
    col("patient_id", ColumnKind::Text, false, VARCHAR),
    col("first_name", ColumnKind::Text, false, VARCHAR),
    col("last_name", ColumnKind::Text, false, VARCHAR),
    col("date_of_birth", ColumnKind::Date, false, "date"),
    col("primary_physician", ColumnKind::Text, true, VARCHAR),
    col("insurance_provider", ColumnKind::Text, true, VARCHAR),
    col("blood_type", ColumnKind::Text, true, VARCHAR),
    col("allergies", ColumnKind::Text, true, "text"),
    col("created_at", ColumnKind::Timestamp, false, TIMESTAMPTZ),
    col("updated_at", ColumnKind::Timestamp, true, TIMESTAMPTZ),
];

const LAB_TEST_COLUMNS: &[Column] = &[
    col("test_id", ColumnKind::Text, false, VARCHAR),
    col("patient_id", ColumnKind::Text, false, VARCHAR),
    col("test_name", ColumnKind::Text, false, VARCHAR),
    col("order_date", ColumnKind::Date, false, "date"),
    col("order_time", ColumnKind::Time, false, TIME),
    col("ordering_physician", ColumnKind::Text, true, VARCHAR),
];

const LAB_RESULT_COLUMNS: &[Column] = &[
    col("result_id", ColumnKind::BigInt, false, "bigint"),
    col("test_id", ColumnKind::Text, false, VARCHAR),
    col("result_value", ColumnKind::Float, true, "double precision"),
    col("result_unit", ColumnKind::Text, true, VARCHAR),
    col("reference_range", ColumnKind::Text, true, VARCHAR),
    col("result_status", ColumnKind::Text, false, VARCHAR),
    col("performed_date", ColumnKind::Date, false, "date"),
    col("performed_time", ColumnKind::Time, false, TIME),
    col("reviewing_physician", ColumnKind::Text, true, VARCHAR),
];

const ADMISSION_COLUMNS: &[Column] = &[
    col("hospitalization_case_number", ColumnKind::Text, false, VARCHAR),
    col("patient_id", ColumnKind::Text, false, VARCHAR),
    col("admission_date", ColumnKind::Date, false, "date"),
    col("admission_time", ColumnKind::Time, false, TIME),
    col("release_date", ColumnKind::Date, true, "date"),
    col("release_time", ColumnKind::Time, true, TIME),
    col("admission_type", ColumnKind::Text, true, VARCHAR),
    col("admitting_physician", ColumnKind::Text, true, VARCHAR),
    col("department", ColumnKind::Text, true, VARCHAR),
    col("room_number", ColumnKind::Text, true, VARCHAR),
    col("diagnosis", ColumnKind::Text, true, "text"),
];

/// One cell of a table row.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub enum CellValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(DateTime<Utc>),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            CellValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("NULL"),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Int(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Date(d) => write!(f, "{d}"),
            CellValue::Time(t) => write!(f, "{t}"),
            CellValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_owned())
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::Date(value)
    }
}

impl From<NaiveTime> for CellValue {
    fn from(value: NaiveTime) -> Self {
        CellValue::Time(value)
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(value: DateTime<Utc>) -> Self {
        CellValue::Timestamp(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(CellValue::Null, Into::into)
    }
}

pub type Row = BTreeMap<String, CellValue>;

/// Entities that map onto one row of a catalogued table.
pub trait ToRow {
    const TABLE: Table;

    fn to_row(&self) -> Row;
}

fn row<const N: usize>(cells: [(&str, CellValue); N]) -> Row {
    cells
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect()
}

impl ToRow for Patient {
    const TABLE: Table = Table::PatientInformation;

    fn to_row(&self) -> Row {
        row([
            ("patient_id", self.patient_id.as_str().into()),
            ("first_name", self.first_name.clone().into()),
            ("last_name", self.last_name.clone().into()),
            ("date_of_birth", self.date_of_birth.into()),
            ("primary_physician", self.primary_physician.clone().into()),
            ("insurance_provider", self.insurance_provider.clone().into()),
            ("blood_type", self.blood_type.clone().into()),
            ("allergies", self.allergies.clone().into()),
            ("created_at", self.created_at.into()),
            ("updated_at", self.updated_at.into()),
        ])
    }
}

impl ToRow for LabTest {
    const TABLE: Table = Table::LabTests;

    fn to_row(&self) -> Row {
        row([
            ("test_id", self.test_id.as_str().into()),
            ("patient_id", self.patient_id.as_str().into()),
            ("test_name", self.test_name.clone().into()),
            ("order_date", self.order_date.into()),
            ("order_time", self.order_time.into()),
            ("ordering_physician", self.ordering_physician.clone().into()),
        ])
    }
}

impl ToRow for LabResult {
    const TABLE: Table = Table::LabResults;

    fn to_row(&self) -> Row {
        row([
            ("result_id", self.result_id.into()),
            ("test_id", self.test_id.as_str().into()),
            ("result_value", self.result_value.into()),
            ("result_unit", self.result_unit.clone().into()),
            ("reference_range", self.reference_range.clone().into()),
            ("result_status", self.result_status.as_str().into()),
            ("performed_date", self.performed_date.into()),
            ("performed_time", self.performed_time.into()),
            ("reviewing_physician", self.reviewing_physician.clone().into()),
        ])
    }
}

impl ToRow for Admission {
    const TABLE: Table = Table::Admissions;

    fn to_row(&self) -> Row {
        row([
            (
                "hospitalization_case_number",
                self.hospitalization_case_number.as_str().into(),
            ),
            ("patient_id", self.patient_id.as_str().into()),
            ("admission_date", self.admission_date.into()),
            ("admission_time", self.admission_time.into()),
            ("release_date", self.release_date.into()),
            ("release_time", self.release_time.into()),
            ("admission_type", self.admission_type.clone().into()),
            ("admitting_physician", self.admitting_physician.clone().into()),
            ("department", self.department.clone().into()),
            ("room_number", self.room_number.clone().into()),
            ("diagnosis", self.diagnosis.clone().into()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medata_types::{RecordId, ResultStatus};

    #[test]
    fn test_every_table_declares_its_keys_as_columns() {
        for table in Table::INSERT_ORDER {
            assert!(table.column(table.primary_key()).is_some(), "{table}");
            assert!(table.column(table.namespace_column()).is_some(), "{table}");
            assert!(!table.column(table.primary_key()).expect("pk").nullable);
        }
    }

    #[test]
    fn test_delete_order_reverses_dependencies() {
        let pos = |t: Table| Table::DELETE_ORDER.iter().position(|x| *x == t).expect("listed");
        assert!(pos(Table::LabResults) < pos(Table::LabTests));
        assert!(pos(Table::LabTests) < pos(Table::PatientInformation));
        assert!(pos(Table::Admissions) < pos(Table::PatientInformation));
    }

    #[test]
    fn test_table_names_parse() {
        assert_eq!("lab_results".parse::<Table>().expect("parse"), Table::LabResults);
        let err = "labs".parse::<Table>().expect_err("unknown");
        assert!(matches!(err, HarnessError::InvalidInput(msg) if msg.contains("labs")));
    }

    #[test]
    fn test_rows_cover_catalogued_columns() {
        let result = LabResult {
            result_id: 3,
            test_id: RecordId::new("T1").expect("id"),
            result_value: None,
            result_unit: Some("mg/dL".into()),
            reference_range: None,
            result_status: ResultStatus::Corrected,
            performed_date: NaiveDate::from_ymd_opt(2024, 1, 31).expect("date"),
            performed_time: NaiveTime::from_hms_opt(16, 0, 0).expect("time"),
            reviewing_physician: None,
        };
        let row = result.to_row();
        let names: Vec<&str> = Table::LabResults.columns().iter().map(|c| c.name).collect();
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
        assert_eq!(row["result_value"], CellValue::Null);
        assert_eq!(row["result_status"], CellValue::Text("Corrected".into()));
        assert_eq!(row["result_id"].as_int(), Some(3));
    }
}
