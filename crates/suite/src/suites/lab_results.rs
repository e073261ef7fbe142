//! `GET /api/v1/patients/{patient_id}/lab_results`

use api_shared::{DataEnvelope, ErrorBody, LabResultRecord};
use medata_core::fixtures::{empty_window, february_window, january_window};
use medata_core::validation::{
    validate_error_detail, validate_lab_result_payload, validate_lab_results_window,
    validate_record_count, validate_status, validate_uniqueness, validate_value_equality,
};
use medata_core::DateWindow;

use super::{data_array, validate_rejected_without_data};
use crate::case::{Case, Group};
use crate::context::CaseContext;
use crate::outcome::{CaseFailure, CaseResult};

pub fn cases() -> Vec<Case> {
    vec![
        Case::new(Group::LabResults, "january_window", |ctx| {
            window_case(ctx, january_window(), "T1")
        })
        .with_fixtures(),
        Case::new(Group::LabResults, "february_window", |ctx| {
            window_case(ctx, february_window(), "T2")
        })
        .with_fixtures(),
        Case::new(Group::LabResults, "empty_window", empty_window_case).with_fixtures(),
        Case::new(Group::LabResults, "unbounded_window", unbounded_window).with_fixtures(),
        Case::new(Group::LabResults, "patient_without_results", patient_without_results)
            .with_fixtures(),
        Case::new(Group::LabResults, "unknown_patient", unknown_patient).with_fixtures(),
        Case::new(Group::LabResults, "malformed_date", malformed_date).with_fixtures(),
        Case::new(Group::LabResults, "invalid_api_key", invalid_api_key).with_fixtures(),
    ]
}

/// Fetches the known patient's results for a window and checks them against the fixtures:
/// shape of every record, window containment, `record_count` and the exact record list.
async fn fetch_and_check(ctx: &CaseContext, window: DateWindow) -> Result<Vec<LabResultRecord>, CaseFailure> {
    let set = ctx.fixtures()?;
    let patient_id = set.known_patient_id();
    let (from, to) = window.as_query();

    let response = ctx
        .client()
        .get_lab_results(&patient_id, from.as_deref(), to.as_deref())
        .await?;
    ctx.record_latency(response.elapsed);
    validate_status(response.status, 200)?;

    let records = data_array(&response)?;
    for record in records {
        validate_lab_result_payload(record)?;
    }
    validate_lab_results_window(records, window.from, window.to)?;

    let envelope: DataEnvelope<Vec<LabResultRecord>> = response.decode()?;
    let reported = envelope.metadata.record_count.ok_or_else(|| {
        CaseFailure::assertion(format!("Missing metadata.record_count in {}", response.body))
    })?;
    validate_record_count(reported, envelope.data.len(), "metadata.record_count")?;
    validate_uniqueness(envelope.data.iter().map(|r| r.result_id), "result_id")?;

    let expected = set.expected_lab_results(&patient_id, window);
    validate_record_count(envelope.data.len(), expected.len(), "lab_results")?;
    validate_value_equality(&envelope.data, &expected, "data")?;
    Ok(envelope.data)
}

async fn window_case(ctx: CaseContext, window: DateWindow, local_test: &'static str) -> CaseResult {
    let records = fetch_and_check(&ctx, window).await?;
    if records.is_empty() {
        return Err(CaseFailure::assertion("Expected results inside the window, got none"));
    }
    let test_id = ctx.fixtures()?.test_id(local_test);
    for record in &records {
        validate_value_equality(record.test_id.as_str(), test_id.as_str(), "test_id")?;
    }
    Ok(())
}

async fn empty_window_case(ctx: CaseContext) -> CaseResult {
    let records = fetch_and_check(&ctx, empty_window()).await?;
    validate_record_count(records.len(), 0, "empty window")?;
    Ok(())
}

async fn unbounded_window(ctx: CaseContext) -> CaseResult {
    let records = fetch_and_check(&ctx, DateWindow::default()).await?;
    let total = ctx.fixtures()?.lab_results.len();
    validate_record_count(records.len(), total, "unbounded window")?;
    Ok(())
}

async fn patient_without_results(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.patient_without_results_id();
    let response = ctx.client().get_lab_results(&patient_id, None, None).await?;
    validate_status(response.status, 200)?;
    let records = data_array(&response)?;
    validate_record_count(records.len(), 0, &patient_id)?;
    Ok(())
}

async fn unknown_patient(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.unknown_patient_id();
    let response = ctx.client().get_lab_results(&patient_id, None, None).await?;
    validate_status(response.status, 404)?;
    validate_error_detail(&response.body, &ErrorBody::patient_not_found(&patient_id).detail)?;
    Ok(())
}

async fn malformed_date(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.known_patient_id();
    for (from, to) in [
        (Some("2024-13-45"), None),
        (Some("not-a-date"), Some("2024-01-31")),
        (None, Some("31/01/2024")),
    ] {
        let response = ctx.client().get_lab_results(&patient_id, from, to).await?;
        validate_status(response.status, 400)?;
    }
    Ok(())
}

async fn invalid_api_key(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.known_patient_id();
    let response = ctx
        .client()
        .with_api_key("invalid_key")
        .get_lab_results(&patient_id, None, None)
        .await?;
    validate_rejected_without_data(&response)?;
    Ok(())
}
