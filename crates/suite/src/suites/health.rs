//! Health endpoint and backend reachability.

use api_shared::{HealthRes, HEALTHY_STATUS};
use chrono::Utc;
use medata_core::validation::{
    validate_latency, validate_status, validate_timestamp_near, validate_value_equality,
};

use crate::case::{Case, Group};
use crate::context::CaseContext;
use crate::outcome::{CaseFailure, CaseResult};

pub fn cases() -> Vec<Case> {
    vec![
        Case::new(Group::Health, "healthy_status", healthy_status),
        Case::new(Group::Health, "timestamp_within_skew", timestamp_within_skew),
        Case::new(Group::Health, "no_api_key_required", no_api_key_required),
        Case::new(Group::Health, "database_reachable", database_reachable),
        Case::new(Group::Health, "object_storage_reachable", object_storage_reachable),
    ]
}

async fn healthy_status(ctx: CaseContext) -> CaseResult {
    let response = ctx.client().health().await?;
    ctx.record_latency(response.elapsed);
    validate_status(response.status, 200)?;

    let health: HealthRes = response.decode()?;
    validate_value_equality(health.status.as_str(), HEALTHY_STATUS, "status")?;
    validate_latency(response.elapsed, ctx.config().thresholds.max_latency)?;
    Ok(())
}

async fn timestamp_within_skew(ctx: CaseContext) -> CaseResult {
    let response = ctx.client().health().await?;
    validate_status(response.status, 200)?;

    let health: HealthRes = response.decode()?;
    validate_timestamp_near(
        &health.timestamp,
        Utc::now(),
        ctx.config().thresholds.health_skew,
        "timestamp",
    )?;
    Ok(())
}

async fn no_api_key_required(ctx: CaseContext) -> CaseResult {
    let response = ctx.client().without_api_key().health().await?;
    validate_status(response.status, 200)?;
    Ok(())
}

fn require_infra_checks(ctx: &CaseContext) -> CaseResult {
    if !ctx.config().infra_checks {
        return Err(CaseFailure::skip("infra checks disabled (INFRA_CHECKS=false)"));
    }
    Ok(())
}

async fn database_reachable(ctx: CaseContext) -> CaseResult {
    require_infra_checks(&ctx)?;
    ctx.store().ping().await?;
    tracing::debug!(backend = ?ctx.store().backend(), "database reachable");
    Ok(())
}

async fn object_storage_reachable(ctx: CaseContext) -> CaseResult {
    require_infra_checks(&ctx)?;
    ctx.storage().check_access().await?;
    tracing::debug!(bucket = ctx.storage().bucket(), "object storage reachable");
    Ok(())
}
