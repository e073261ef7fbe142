//! Store, Parquet snapshot and API agreement on the fixture rows.

use std::collections::{HashMap, HashSet};

use api_shared::{DataEnvelope, LabResultRecord};
use arrow_schema::SchemaRef;
use chrono::{NaiveDateTime, Utc};
use medata_core::snapshot::{is_compatible_type, read_schema, read_snapshot, write_snapshot};
use medata_core::storage::snapshot_key;
use medata_core::tables::{CellValue, Row, Table};
use medata_core::validation::{
    validate_non_negative, validate_record_count, validate_record_exists,
    validate_record_not_exists, validate_result_status, validate_rows_equal, validate_status,
    validate_uniqueness, validate_value_equality,
};
use medata_core::{FixtureSet, Namespace};

use crate::case::{Case, Group};
use crate::context::CaseContext;
use crate::outcome::{CaseFailure, CaseResult};

const UPDATED_REVIEWER: &str = "Dr. Foreman";

pub fn cases() -> Vec<Case> {
    vec![
        Case::new(Group::DataValidation, "snapshot_round_trip", snapshot_round_trip)
            .with_fixtures(),
        Case::new(Group::DataValidation, "schema_compatibility", schema_compatibility),
        Case::new(Group::DataValidation, "referential_invariants", referential_invariants)
            .with_fixtures(),
        Case::new(Group::DataValidation, "crud_reflection", crud_reflection).with_fixtures(),
    ]
}

fn fixture_rows(set: &FixtureSet, table: Table) -> usize {
    match table {
        Table::PatientInformation => set.patients.len(),
        Table::LabTests => set.lab_tests.len(),
        Table::LabResults => set.lab_results.len(),
        Table::Admissions => set.admissions.len(),
    }
}

/// Writes the rows as a snapshot, reads them back and removes the object again.
async fn through_snapshot(
    ctx: &CaseContext,
    namespace: &Namespace,
    table: Table,
    rows: &[Row],
) -> Result<Vec<Row>, CaseFailure> {
    let key = snapshot_key(table, namespace, Utc::now());
    write_snapshot(ctx.storage(), &key, table, rows).await?;
    let decoded = read_snapshot(ctx.storage(), &key, table).await;
    ctx.storage().delete(&key).await?;
    Ok(decoded?)
}

async fn snapshot_round_trip(ctx: CaseContext) -> CaseResult {
    let set = ctx.fixtures()?;
    let namespace = ctx.namespace()?;
    for table in Table::INSERT_ORDER {
        let rows = ctx.store().rows(table, namespace.as_str()).await?;
        validate_record_count(rows.len(), fixture_rows(set, table), table.name())?;

        let decoded = through_snapshot(&ctx, namespace, table, &rows).await?;
        validate_rows_equal(&decoded, &rows, table.primary_key(), table.name())?;
    }
    Ok(())
}

/// Arrow schema of an empty snapshot of `table` as it lands in object storage.
async fn stored_schema(ctx: &CaseContext, table: Table) -> Result<SchemaRef, CaseFailure> {
    let key = snapshot_key(table, &Namespace::generate(), Utc::now());
    write_snapshot(ctx.storage(), &key, table, &[]).await?;
    let bytes = ctx.storage().get(&key).await;
    ctx.storage().delete(&key).await?;
    Ok(read_schema(bytes?)?)
}

async fn schema_compatibility(ctx: CaseContext) -> CaseResult {
    for table in Table::INSERT_ORDER {
        let Some(columns) = ctx.store().column_types(table).await? else {
            return Err(CaseFailure::skip("store has no column catalogue"));
        };
        let schema = stored_schema(&ctx, table).await?;
        validate_record_count(
            columns.len(),
            schema.fields().len(),
            &format!("columns of {table}"),
        )?;

        for field in schema.fields() {
            let info = columns
                .iter()
                .find(|c| c.column_name == *field.name())
                .ok_or_else(|| {
                    CaseFailure::assertion(format!("Column '{}' missing from {table}", field.name()))
                })?;
            if !is_compatible_type(field.data_type(), &info.data_type) {
                return Err(CaseFailure::assertion(format!(
                    "Column '{}' of {table}: Parquet type {} is incompatible with Postgres type {}",
                    field.name(),
                    field.data_type(),
                    info.data_type
                )));
            }
        }
    }
    Ok(())
}

fn text<'a>(row: &'a Row, column: &str) -> Result<&'a str, CaseFailure> {
    row.get(column)
        .and_then(CellValue::as_text)
        .ok_or_else(|| CaseFailure::assertion(format!("Column '{column}' is not text in {row:?}")))
}

fn timestamp(row: &Row, date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = row.get(date).and_then(CellValue::as_date)?;
    let time = row.get(time).and_then(CellValue::as_time)?;
    Some(date.and_time(time))
}

async fn referential_invariants(ctx: CaseContext) -> CaseResult {
    let prefix = ctx.namespace()?.as_str();
    let store = ctx.store();
    let patients = store.rows(Table::PatientInformation, prefix).await?;
    let tests = store.rows(Table::LabTests, prefix).await?;
    let results = store.rows(Table::LabResults, prefix).await?;
    let admissions = store.rows(Table::Admissions, prefix).await?;

    let patient_ids = patients
        .iter()
        .map(|r| text(r, "patient_id"))
        .collect::<Result<Vec<_>, _>>()?;
    validate_uniqueness(patient_ids.iter().copied(), "patient_id")?;
    let patient_ids: HashSet<&str> = patient_ids.into_iter().collect();

    let mut ordered_at: HashMap<&str, NaiveDateTime> = HashMap::new();
    for test in &tests {
        let test_id = text(test, "test_id")?;
        let owner = text(test, "patient_id")?;
        if !patient_ids.contains(owner) {
            return Err(CaseFailure::assertion(format!(
                "Lab test {test_id} references missing patient {owner}"
            )));
        }
        let ordered = timestamp(test, "order_date", "order_time").ok_or_else(|| {
            CaseFailure::assertion(format!("Lab test {test_id} has no order timestamp"))
        })?;
        if ordered_at.insert(test_id, ordered).is_some() {
            return Err(CaseFailure::assertion(format!("Duplicate test_id: '{test_id}'")));
        }
    }

    validate_uniqueness(
        results.iter().filter_map(|r| r.get("result_id").and_then(CellValue::as_int)),
        "result_id",
    )?;
    for result in &results {
        let test_id = text(result, "test_id")?;
        let Some(ordered) = ordered_at.get(test_id) else {
            return Err(CaseFailure::assertion(format!(
                "Lab result references missing test {test_id}"
            )));
        };
        let performed = timestamp(result, "performed_date", "performed_time").ok_or_else(|| {
            CaseFailure::assertion(format!("Lab result of {test_id} has no result timestamp"))
        })?;
        if performed < *ordered {
            return Err(CaseFailure::assertion(format!(
                "Lab result of {test_id} performed at {performed}, before the test was ordered at {ordered}"
            )));
        }
        validate_result_status(text(result, "result_status")?)?;
        if let Some(value) = result.get("result_value").and_then(CellValue::as_float) {
            validate_non_negative(value, "result_value")?;
        }
    }

    for admission in &admissions {
        let case_number = text(admission, "hospitalization_case_number")?;
        let patient = text(admission, "patient_id")?;
        if !patient_ids.contains(patient) {
            return Err(CaseFailure::assertion(format!(
                "Admission {case_number} references missing patient {patient}"
            )));
        }
        let admitted = timestamp(admission, "admission_date", "admission_time").ok_or_else(|| {
            CaseFailure::assertion(format!("Admission {case_number} has no admission timestamp"))
        })?;
        if let Some(release_date) = admission.get("release_date").and_then(CellValue::as_date) {
            let release_time = admission
                .get("release_time")
                .and_then(CellValue::as_time)
                .unwrap_or_default();
            let released = release_date.and_time(release_time);
            if released < admitted {
                return Err(CaseFailure::assertion(format!(
                    "Admission {case_number} released at {released}, before admission at {admitted}"
                )));
            }
        }
    }
    Ok(())
}

fn rows_with_id(rows: &[Row], result_id: i64) -> Vec<Row> {
    rows.iter()
        .filter(|r| r.get("result_id").and_then(CellValue::as_int) == Some(result_id))
        .cloned()
        .collect()
}

async fn api_records(ctx: &CaseContext, patient_id: &str) -> Result<Vec<LabResultRecord>, CaseFailure> {
    let response = ctx.client().get_lab_results(patient_id, None, None).await?;
    validate_status(response.status, 200)?;
    let envelope: DataEnvelope<Vec<LabResultRecord>> = response.decode()?;
    Ok(envelope.data)
}

/// Update and delete one lab result, then confirm the store, the API and a fresh snapshot all
/// reflect each change.
async fn crud_reflection(ctx: CaseContext) -> CaseResult {
    let set = ctx.fixtures()?;
    let namespace = ctx.namespace()?;
    let patient_id = set.known_patient_id();
    let result_id = set
        .lab_results
        .first()
        .map(|r| r.result_id)
        .ok_or_else(|| CaseFailure::Setup("fixture set has no lab results".into()))?;
    let identifier = result_id.to_string();
    let reviewer = CellValue::from(UPDATED_REVIEWER);

    if !ctx.store().update_reviewer(result_id, UPDATED_REVIEWER).await? {
        return Err(CaseFailure::assertion(format!(
            "Record in lab_results with identifier '{identifier}' not found"
        )));
    }

    let rows = ctx.store().rows(Table::LabResults, namespace.as_str()).await?;
    let updated = rows_with_id(&rows, result_id);
    validate_record_exists(&updated, &identifier, "lab_results")?;
    validate_value_equality(
        &updated.first().and_then(|r| r.get("reviewing_physician")),
        &Some(&reviewer),
        "reviewing_physician",
    )?;

    let records = api_records(&ctx, &patient_id).await?;
    let record = records
        .iter()
        .find(|r| r.result_id == result_id)
        .ok_or_else(|| CaseFailure::assertion(format!("API no longer returns result {identifier}")))?;
    validate_value_equality(
        &record.reviewing_physician.as_deref(),
        &Some(UPDATED_REVIEWER),
        "reviewing_physician",
    )?;

    let exported = through_snapshot(&ctx, namespace, Table::LabResults, &rows).await?;
    let exported = rows_with_id(&exported, result_id);
    validate_record_exists(&exported, &identifier, "lab_results snapshot")?;
    validate_value_equality(
        &exported.first().and_then(|r| r.get("reviewing_physician")),
        &Some(&reviewer),
        "reviewing_physician",
    )?;

    if !ctx.store().delete_lab_result(result_id).await? {
        return Err(CaseFailure::assertion(format!(
            "Record in lab_results with identifier '{identifier}' not found"
        )));
    }

    let rows = ctx.store().rows(Table::LabResults, namespace.as_str()).await?;
    validate_record_not_exists(&rows_with_id(&rows, result_id), &identifier, "lab_results")?;
    validate_record_count(rows.len(), set.lab_results.len() - 1, "lab_results after delete")?;

    let records = api_records(&ctx, &patient_id).await?;
    if records.iter().any(|r| r.result_id == result_id) {
        return Err(CaseFailure::assertion(format!(
            "API still returns deleted result {identifier}"
        )));
    }

    let exported = through_snapshot(&ctx, namespace, Table::LabResults, &rows).await?;
    validate_record_not_exists(
        &rows_with_id(&exported, result_id),
        &identifier,
        "lab_results snapshot",
    )?;
    validate_record_count(exported.len(), rows.len(), "lab_results snapshot")?;
    Ok(())
}
