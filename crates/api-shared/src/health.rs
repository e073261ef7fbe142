use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Value of `status` reported by a healthy API.
pub const HEALTHY_STATUS: &str = "healthy";

/// Body of `GET /health`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub status: String,
    /// RFC 3339 wall-clock time at which the check ran.
    pub timestamp: String,
}

/// Simple health service used by the reference API
///
/// This service provides a standardised way to produce the health payload. It can be used both
/// as a static utility and as an instantiated service.
#[derive(Clone)]
pub struct HealthService;

impl HealthService {
    pub fn new() -> Self {
        Self
    }

    /// Static method to check health without creating an instance
    ///
    /// # Returns
    /// A `HealthRes` with `status = "healthy"` stamped with the current UTC time.
    pub fn check_health() -> HealthRes {
        HealthRes {
            status: HEALTHY_STATUS.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Payload reported when a backend probe failed.
    pub fn unhealthy(reason: &str) -> HealthRes {
        HealthRes {
            status: format!("unhealthy: {reason}"),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl Default for HealthService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_health_reports_healthy_with_parseable_timestamp() {
        let res = HealthService::check_health();
        assert_eq!(res.status, HEALTHY_STATUS);
        let parsed = chrono::DateTime::parse_from_rfc3339(&res.timestamp).expect("rfc3339");
        let skew = (Utc::now() - parsed.with_timezone(&Utc)).num_seconds().abs();
        assert!(skew < 5);
    }

    #[test]
    fn test_unhealthy_carries_reason() {
        let res = HealthService::unhealthy("database unreachable");
        assert_ne!(res.status, HEALTHY_STATUS);
        assert!(res.status.contains("database unreachable"));
    }
}
