//! Latency batches. Every case here is flaky: a slow run is retried before it is recorded.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use medata_core::validation::{validate_latency, validate_mean_latency, validate_status};
use medata_core::{ApiResponse, HarnessResult};

use crate::case::{Case, Group};
use crate::context::CaseContext;
use crate::outcome::{CaseFailure, CaseResult};

pub fn cases() -> Vec<Case> {
    vec![
        Case::new(Group::Performance, "sequential_patient_batch", sequential_patient_batch)
            .with_fixtures()
            .flaky(),
        Case::new(Group::Performance, "sequential_lab_results_batch", sequential_lab_results_batch)
            .with_fixtures()
            .flaky(),
        Case::new(Group::Performance, "concurrent_patient_batch", concurrent_patient_batch)
            .with_fixtures()
            .flaky(),
    ]
}

/// Max and mean latency of a batch against the configured thresholds.
fn check_batch(ctx: &CaseContext, responses: &[ApiResponse]) -> CaseResult {
    let thresholds = &ctx.config().thresholds;
    let mut samples: Vec<Duration> = Vec::with_capacity(responses.len());
    for response in responses {
        validate_status(response.status, 200)?;
        ctx.record_latency(response.elapsed);
        samples.push(response.elapsed);
    }
    let slowest = samples.iter().max().copied().unwrap_or_default();
    validate_latency(slowest, thresholds.max_latency)?;
    validate_mean_latency(&samples, thresholds.mean_latency)?;
    tracing::debug!(
        requests = samples.len(),
        slowest_ms = slowest.as_secs_f64() * 1000.0,
        "batch within thresholds"
    );
    Ok(())
}

async fn sequential_patient_batch(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.known_patient_id();
    let mut responses = Vec::new();
    for _ in 0..ctx.config().thresholds.batch_size {
        responses.push(ctx.client().get_patient(&patient_id).await?);
    }
    check_batch(&ctx, &responses)
}

async fn sequential_lab_results_batch(ctx: CaseContext) -> CaseResult {
    let patient_id = ctx.fixtures()?.known_patient_id();
    let mut responses = Vec::new();
    for _ in 0..ctx.config().thresholds.batch_size {
        responses.push(
            ctx.client()
                .get_lab_results(&patient_id, Some("2024-01-01"), Some("2024-12-31"))
                .await?,
        );
    }
    check_batch(&ctx, &responses)
}

async fn concurrent_patient_batch(ctx: CaseContext) -> CaseResult {
    let concurrency = ctx.config().thresholds.concurrency;
    if concurrency <= 1 {
        return Err(CaseFailure::skip("PERF_CONCURRENCY is 1"));
    }
    let patient_id = ctx.fixtures()?.known_patient_id();
    let client = ctx.client().clone();

    let results: Vec<HarnessResult<ApiResponse>> = stream::iter(0..ctx.config().thresholds.batch_size)
        .map(|_| {
            let client = client.clone();
            let patient_id = patient_id.clone();
            async move { client.get_patient(&patient_id).await }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    let responses = results.into_iter().collect::<HarnessResult<Vec<_>>>()?;
    check_batch(&ctx, &responses)
}
