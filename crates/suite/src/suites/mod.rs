//! The five case groups.

pub mod data_validation;
pub mod health;
pub mod lab_results;
pub mod patient;
pub mod performance;

use medata_core::validation::{validate_status_in, Verdict};
use medata_core::{ApiResponse, ValidationError};
use serde_json::Value;

use crate::outcome::CaseFailure;

/// Statuses accepted for a rejected API key.
pub(crate) const AUTH_REJECTED: &[u16] = &[401, 403];

/// The `data` array of a collection response.
pub(crate) fn data_array(response: &ApiResponse) -> Result<&[Value], CaseFailure> {
    response
        .data()
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| {
            CaseFailure::assertion(format!(
                "Expected a data array from {}, got {}",
                response.url, response.body
            ))
        })
}

/// A rejected request must carry no payload.
pub(crate) fn validate_rejected_without_data(response: &ApiResponse) -> Verdict {
    validate_status_in(response.status, AUTH_REJECTED)?;
    if response.data().is_some() {
        return Err(ValidationError::new(format!(
            "Rejected request to {} leaked data: {}",
            response.url, response.body
        )));
    }
    Ok(())
}
