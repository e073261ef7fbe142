//! `GET /api/v1/patients/{patient_id}`

use api_shared::{DataEnvelope, ErrorBody, Patient};
use medata_core::tables::{Row, Table};
use medata_core::validation::{
    validate_error_detail, validate_idempotent, validate_latency, validate_non_negative,
    validate_patient_payload, validate_rows_equal, validate_status, validate_value_equality,
};

use super::validate_rejected_without_data;
use crate::case::{Case, Group};
use crate::context::CaseContext;
use crate::outcome::{CaseFailure, CaseResult};

const INVALID_API_KEY: &str = "invalid_key";

pub fn cases() -> Vec<Case> {
    vec![
        Case::new(Group::Patient, "known_patient", known_patient).with_fixtures(),
        Case::new(Group::Patient, "unknown_patient", unknown_patient).with_fixtures(),
        Case::new(Group::Patient, "invalid_api_key", invalid_api_key).with_fixtures(),
        Case::new(Group::Patient, "missing_api_key", missing_api_key).with_fixtures(),
        Case::new(Group::Patient, "latency_under_threshold", latency_under_threshold)
            .with_fixtures(),
        Case::new(Group::Patient, "repeated_request_is_idempotent", repeated_request)
            .with_fixtures(),
    ]
}

async fn known_patient(ctx: CaseContext) -> CaseResult {
    let set = ctx.fixtures()?;
    let patient_id = set.known_patient_id();
    let expected = set
        .patient(&patient_id)
        .ok_or_else(|| CaseFailure::Setup(format!("fixture set lacks {patient_id}")))?;

    let response = ctx.client().get_patient(&patient_id).await?;
    ctx.record_latency(response.elapsed);
    validate_status(response.status, 200)?;

    let data = response
        .data()
        .ok_or_else(|| CaseFailure::assertion(format!("Missing data in {}", response.body)))?;
    validate_patient_payload(data)?;

    let envelope: DataEnvelope<Patient> = response.decode()?;
    validate_value_equality(envelope.data.patient_id.as_str(), patient_id.as_str(), "patient_id")?;
    validate_value_equality(&envelope.data, expected, "patient")?;
    validate_non_negative(envelope.metadata.response_time_ms, "response_time_ms")?;
    Ok(())
}

async fn unknown_patient(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.unknown_patient_id();
    let response = ctx.client().get_patient(&patient_id).await?;
    validate_status(response.status, 404)?;
    validate_error_detail(&response.body, &ErrorBody::patient_not_found(&patient_id).detail)?;
    if response.data().is_some() {
        return Err(CaseFailure::assertion(format!(
            "404 response carried data: {}",
            response.body
        )));
    }
    Ok(())
}

async fn invalid_api_key(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.known_patient_id();
    let response = ctx
        .client()
        .with_api_key(INVALID_API_KEY)
        .get_patient(&patient_id)
        .await?;
    validate_rejected_without_data(&response)?;
    Ok(())
}

async fn missing_api_key(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.known_patient_id();
    let response = ctx.client().without_api_key().get_patient(&patient_id).await?;
    validate_rejected_without_data(&response)?;
    Ok(())
}

async fn latency_under_threshold(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.known_patient_id();
    let response = ctx.client().get_patient(&patient_id).await?;
    ctx.record_latency(response.elapsed);
    validate_status(response.status, 200)?;
    validate_latency(response.elapsed, ctx.config().thresholds.max_latency)?;
    Ok(())
}

/// Namespace rows of every table, for before/after comparison.
async fn namespace_rows(ctx: &CaseContext) -> Result<Vec<(Table, Vec<Row>)>, CaseFailure> {
    let namespace = ctx.namespace()?;
    let mut snapshot = Vec::new();
    for table in Table::INSERT_ORDER {
        snapshot.push((table, ctx.store().rows(table, namespace.as_str()).await?));
    }
    Ok(snapshot)
}

async fn repeated_request(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.known_patient_id();
    let before = namespace_rows(&ctx).await?;
    let first = ctx.client().get_patient(&patient_id).await?;
    let second = ctx.client().get_patient(&patient_id).await?;
    validate_status(first.status, 200)?;
    validate_status(second.status, 200)?;
    validate_idempotent(&first.body, &second.body)?;

    let after = namespace_rows(&ctx).await?;
    for ((table, rows_before), (_, rows_after)) in before.iter().zip(&after) {
        validate_rows_equal(rows_after, rows_before, table.primary_key(), table.name())?;
    }
    Ok(())
}
