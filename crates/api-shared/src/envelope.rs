use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{LabResultRecord, Patient};

/// Success body of the `/api/v1` endpoints: the payload plus timing metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[aliases(
    PatientEnvelope = DataEnvelope<Patient>,
    LabResultsEnvelope = DataEnvelope<Vec<LabResultRecord>>
)]
pub struct DataEnvelope<T> {
    pub data: T,
    pub metadata: ResponseMetadata,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResponseMetadata {
    /// Server-side handling time, rounded to two decimals.
    pub response_time_ms: f64,
    /// Present on collection responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
}

impl ResponseMetadata {
    pub fn timed(elapsed: std::time::Duration) -> Self {
        let ms = elapsed.as_secs_f64() * 1000.0;
        Self {
            response_time_ms: (ms * 100.0).round() / 100.0,
            record_count: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.record_count = Some(count);
        self
    }
}

/// Error body: `{"detail": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub detail: String,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }

    pub fn patient_not_found(patient_id: &str) -> Self {
        Self::new(format!("Patient {patient_id} not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_metadata_rounds_to_two_decimals() {
        let meta = ResponseMetadata::timed(Duration::from_micros(12_344));
        assert_eq!(meta.response_time_ms, 12.34);
        assert_eq!(meta.record_count, None);
    }

    #[test]
    fn test_metadata_omits_record_count_when_absent() {
        let json = serde_json::to_value(ResponseMetadata::timed(Duration::ZERO)).expect("json");
        assert!(json.get("record_count").is_none());

        let json = serde_json::to_value(ResponseMetadata::timed(Duration::ZERO).with_count(3))
            .expect("json");
        assert_eq!(json["record_count"], 3);
    }

    #[test]
    fn test_patient_not_found_detail() {
        assert_eq!(
            ErrorBody::patient_not_found("NONEXISTENT").detail,
            "Patient NONEXISTENT not found"
        );
    }
}
