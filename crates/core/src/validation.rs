//! Response and data validators.
//!
//! Every validator is a pure function returning a [`Verdict`]. Cases chain them with `?`, and
//! the first failing check becomes the case's diagnostic.

use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use medata_types::ResultStatus;
use serde_json::Value;

use crate::tables::Row;

/// A failed check, carrying the diagnostic shown in the report.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type Verdict = Result<(), ValidationError>;

fn fail(message: impl Into<String>) -> Verdict {
    Err(ValidationError::new(message))
}

/// Expected JSON type of a payload field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    NullableString,
    Number,
    NullableNumber,
    Integer,
    /// `YYYY-MM-DD`
    Date,
    /// `HH:MM:SS` with optional fraction
    Time,
    /// RFC 3339 or naive ISO 8601
    Timestamp,
    NullableTimestamp,
    Array,
    Object,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::NullableString => value.is_null() || value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::NullableNumber => value.is_null() || value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Date => value
                .as_str()
                .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
            FieldKind::Time => value.as_str().is_some_and(|s| s.parse::<NaiveTime>().is_ok()),
            FieldKind::Timestamp => value.as_str().is_some_and(|s| parse_timestamp(s).is_some()),
            FieldKind::NullableTimestamp => {
                value.is_null() || value.as_str().is_some_and(|s| parse_timestamp(s).is_some())
            }
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::NullableString => "string or null",
            FieldKind::Number => "number",
            FieldKind::NullableNumber => "number or null",
            FieldKind::Integer => "integer",
            FieldKind::Date => "date string (YYYY-MM-DD)",
            FieldKind::Time => "time string (HH:MM:SS)",
            FieldKind::Timestamp => "timestamp string",
            FieldKind::NullableTimestamp => "timestamp string or null",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn validate_value_equality<T>(actual: &T, expected: &T, field: &str) -> Verdict
where
    T: PartialEq + Debug + ?Sized,
{
    if actual != expected {
        return fail(format!(
            "Value mismatch for {field}: Expected {expected:?}, got {actual:?}"
        ));
    }
    Ok(())
}

pub fn validate_status(actual: u16, expected: u16) -> Verdict {
    if actual != expected {
        return fail(format!("Expected status {expected}, got {actual}"));
    }
    Ok(())
}

pub fn validate_status_in(actual: u16, allowed: &[u16]) -> Verdict {
    if !allowed.contains(&actual) {
        let allowed: Vec<String> = allowed.iter().map(u16::to_string).collect();
        return fail(format!(
            "Expected status in [{}], got {actual}",
            allowed.join(", ")
        ));
    }
    Ok(())
}

pub fn validate_required_fields(body: &Value, fields: &[&str]) -> Verdict {
    let Some(object) = body.as_object() else {
        return fail(format!("Expected a JSON object, got {}", json_type(body)));
    };
    let missing: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|f| !object.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        return fail(format!("Missing required fields: {}", missing.join(", ")));
    }
    Ok(())
}

/// Checks the type of each listed field. Absent fields are left to
/// [`validate_required_fields`].
pub fn validate_field_types(body: &Value, fields: &[(&str, FieldKind)]) -> Verdict {
    for (name, kind) in fields {
        if let Some(value) = body.get(*name) {
            if !kind.accepts(value) {
                return fail(format!(
                    "Invalid type for {name}: Expected {}, got {} ({value})",
                    kind.label(),
                    json_type(value)
                ));
            }
        }
    }
    Ok(())
}

pub fn validate_range<T>(value: T, min: T, max: T, field: &str) -> Verdict
where
    T: PartialOrd + Display,
{
    if !(min <= value && value <= max) {
        return fail(format!(
            "Value out of range for {field}: Expected between {min} and {max}, got {value}"
        ));
    }
    Ok(())
}

pub fn validate_non_negative(value: f64, field: &str) -> Verdict {
    if value.is_nan() || value < 0.0 {
        return fail(format!("{field} must be non-negative, got {value}"));
    }
    Ok(())
}

/// Parses a `YYYY-MM-DD` string.
pub fn validate_date_string(value: &str, field: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        ValidationError::new(format!(
            "Invalid date for {field}: Expected YYYY-MM-DD, got '{value}'"
        ))
    })
}

/// Inclusive containment; an open bound accepts everything on its side.
pub fn validate_date_within(
    date: NaiveDate,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    field: &str,
) -> Verdict {
    let after_start = from.is_none_or(|from| date >= from);
    let before_end = to.is_none_or(|to| date <= to);
    if !(after_start && before_end) {
        let show = |d: Option<NaiveDate>| d.map_or_else(|| "..".to_string(), |d| d.to_string());
        return fail(format!(
            "{field} {date} is outside the requested window [{}, {}]",
            show(from),
            show(to)
        ));
    }
    Ok(())
}

/// Accepts RFC 3339 (`2024-01-01T00:00:00Z`, offsets) and naive ISO timestamps, which are
/// read as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    value
        .parse::<NaiveDateTime>()
        .ok()
        .map(|naive| naive.and_utc())
}

/// Naive timestamps carry no zone, so they pass when either their UTC reading or their reading
/// in the local zone is within `skew` of `now`.
pub fn validate_timestamp_near(
    value: &str,
    now: DateTime<Utc>,
    skew: Duration,
    field: &str,
) -> Verdict {
    validate_timestamp_near_in(value, now, *Local::now().offset(), skew, field)
}

fn validate_timestamp_near_in(
    value: &str,
    now: DateTime<Utc>,
    local: FixedOffset,
    skew: Duration,
    field: &str,
) -> Verdict {
    let readings = if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        vec![ts.with_timezone(&Utc)]
    } else if let Ok(naive) = value.parse::<NaiveDateTime>() {
        let mut readings = vec![naive.and_utc()];
        readings.extend(
            naive
                .and_local_timezone(local)
                .single()
                .map(|ts| ts.with_timezone(&Utc)),
        );
        readings
    } else {
        Vec::new()
    };
    let Some(distance) = readings.iter().map(|ts| (now - *ts).abs()).min() else {
        return fail(format!("Invalid timestamp for {field}: '{value}'"));
    };
    let allowed = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::MAX);
    if distance > allowed {
        return fail(format!(
            "{field} {value} is {}s away from wall-clock time (allowed {}s)",
            distance.num_seconds(),
            skew.as_secs()
        ));
    }
    Ok(())
}

pub fn validate_latency(elapsed: Duration, max: Duration) -> Verdict {
    if elapsed >= max {
        return fail(format!(
            "Response time {:.2} ms exceeds threshold of {} ms",
            elapsed.as_secs_f64() * 1000.0,
            max.as_millis()
        ));
    }
    Ok(())
}

pub fn validate_mean_latency(samples: &[Duration], max: Duration) -> Verdict {
    if samples.is_empty() {
        return fail("No latency samples recorded");
    }
    let Ok(count) = u32::try_from(samples.len()) else {
        return fail(format!("Too many latency samples: {}", samples.len()));
    };
    let total: Duration = samples.iter().sum();
    let mean = total / count;
    if mean >= max {
        return fail(format!(
            "Mean response time {:.2} ms over {} requests exceeds threshold of {} ms",
            mean.as_secs_f64() * 1000.0,
            samples.len(),
            max.as_millis()
        ));
    }
    Ok(())
}

pub fn validate_record_count(actual: usize, expected: usize, context: &str) -> Verdict {
    if actual != expected {
        let context = if context.is_empty() {
            String::new()
        } else {
            format!(" for {context}")
        };
        return fail(format!(
            "Record count mismatch{context}: Expected {expected}, got {actual}"
        ));
    }
    Ok(())
}

pub fn validate_uniqueness<I, T>(values: I, field: &str) -> Verdict
where
    I: IntoIterator<Item = T>,
    T: Eq + Hash + Display,
{
    let mut seen = HashSet::new();
    for value in values {
        let shown = value.to_string();
        if !seen.insert(value) {
            return fail(format!("Duplicate {field}: '{shown}'"));
        }
    }
    Ok(())
}

pub fn validate_string_length(value: &str, min: usize, max: usize, field: &str) -> Verdict {
    let len = value.chars().count();
    if len < min || len > max {
        return fail(format!(
            "Length of {field} must be between {min} and {max}, got {len}"
        ));
    }
    Ok(())
}

pub fn validate_result_status(value: &str) -> Verdict {
    value
        .parse::<ResultStatus>()
        .map(|_| ())
        .map_err(|e| ValidationError::new(e.to_string()))
}

pub fn validate_error_detail(body: &Value, expected: &str) -> Verdict {
    match body.get("detail").and_then(Value::as_str) {
        Some(detail) => validate_value_equality(detail, expected, "detail"),
        None => fail(format!("Expected error body with detail, got {body}")),
    }
}

/// Existence check for a keyed record; `rows` holds the lookup result.
pub fn validate_record_exists(rows: &[Row], identifier: &str, table: &str) -> Verdict {
    if rows.is_empty() {
        return fail(format!(
            "Record in {table} with identifier '{identifier}' not found"
        ));
    }
    Ok(())
}

pub fn validate_record_not_exists(rows: &[Row], identifier: &str, table: &str) -> Verdict {
    if !rows.is_empty() {
        return fail(format!(
            "Record in {table} with identifier '{identifier}' exists when it should not"
        ));
    }
    Ok(())
}

const PATIENT_FIELDS: &[(&str, FieldKind)] = &[
    ("patient_id", FieldKind::String),
    ("first_name", FieldKind::String),
    ("last_name", FieldKind::String),
    ("date_of_birth", FieldKind::Date),
    ("primary_physician", FieldKind::NullableString),
    ("insurance_provider", FieldKind::NullableString),
    ("blood_type", FieldKind::NullableString),
    ("allergies", FieldKind::NullableString),
    ("created_at", FieldKind::Timestamp),
    ("updated_at", FieldKind::NullableTimestamp),
];

const LAB_RESULT_FIELDS: &[(&str, FieldKind)] = &[
    ("result_id", FieldKind::Integer),
    ("test_id", FieldKind::String),
    ("test_name", FieldKind::String),
    ("result_value", FieldKind::NullableNumber),
    ("result_unit", FieldKind::NullableString),
    ("reference_range", FieldKind::NullableString),
    ("result_status", FieldKind::String),
    ("performed_date", FieldKind::Date),
    ("performed_time", FieldKind::Time),
    ("reviewing_physician", FieldKind::NullableString),
];

fn names(fields: &[(&'static str, FieldKind)]) -> Vec<&'static str> {
    fields.iter().map(|(name, _)| *name).collect()
}

/// Shape of the `data` object returned for one patient.
pub fn validate_patient_payload(data: &Value) -> Verdict {
    validate_required_fields(data, &names(PATIENT_FIELDS))?;
    validate_field_types(data, PATIENT_FIELDS)?;
    if let Some(id) = data["patient_id"].as_str() {
        validate_string_length(id, 1, medata_types::RecordId::MAX_LEN, "patient_id")?;
    }
    Ok(())
}

/// Shape of one element of the lab-results `data` array.
pub fn validate_lab_result_payload(record: &Value) -> Verdict {
    validate_required_fields(record, &names(LAB_RESULT_FIELDS))?;
    validate_field_types(record, LAB_RESULT_FIELDS)?;
    if let Some(status) = record["result_status"].as_str() {
        validate_result_status(status)?;
    }
    if let Some(value) = record["result_value"].as_f64() {
        validate_non_negative(value, "result_value")?;
    }
    Ok(())
}

/// Every record's `performed_date` falls inside `[from, to]`.
pub fn validate_lab_results_window(
    records: &[Value],
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Verdict {
    for record in records {
        let raw = record["performed_date"].as_str().unwrap_or_default();
        let date = validate_date_string(raw, "performed_date")?;
        validate_date_within(date, from, to, "performed_date")?;
    }
    Ok(())
}

const VOLATILE_FIELDS: &[&str] = &["timestamp", "response_time_ms"];

/// Removes timing fields at any depth so two responses can be compared.
pub fn strip_volatile_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !VOLATILE_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip_volatile_fields(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_volatile_fields).collect()),
        other => other.clone(),
    }
}

pub fn validate_idempotent(first: &Value, second: &Value) -> Verdict {
    let (a, b) = (strip_volatile_fields(first), strip_volatile_fields(second));
    if a != b {
        return fail(format!(
            "Repeated request returned a different payload: first {a}, then {b}"
        ));
    }
    Ok(())
}

/// Row-set equality after sorting both sides by `key`.
pub fn validate_rows_equal(actual: &[Row], expected: &[Row], key: &str, context: &str) -> Verdict {
    validate_record_count(actual.len(), expected.len(), context)?;

    let sorted = |rows: &[Row]| {
        let mut rows = rows.to_vec();
        rows.sort_by(|a, b| {
            a.get(key)
                .partial_cmp(&b.get(key))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows
    };
    let (actual, expected) = (sorted(actual), sorted(expected));

    let mut columns: Vec<&String> = expected.iter().chain(actual.iter()).flat_map(|r| r.keys()).collect();
    columns.sort();
    columns.dedup();

    let differences: Vec<String> = columns
        .into_iter()
        .filter(|col| {
            actual
                .iter()
                .zip(&expected)
                .any(|(a, e)| a.get(col.as_str()) != e.get(col.as_str()))
        })
        .map(|col| format!("Column '{col}' has mismatched values"))
        .collect();

    if !differences.is_empty() {
        return fail(format!(
            "Rows are not equal for {context}. Differences found: {}",
            differences.join(", ")
        ));
    }
    Ok(())
}
