//! # API Shared
//!
//! Shared wire definitions for the medical-data API contract.
//!
//! Contains:
//! - Entity wire models (`models` module)
//! - Response envelopes and error bodies (`envelope` module)
//! - The health payload and `HealthService`
//! - API-key authentication utilities
//!
//! Used by `medata-core` (to decode and validate responses) and by `api-rest` (the reference
//! stub that serves the same contract).

pub mod auth;
pub mod envelope;
pub mod health;
pub mod models;

pub use auth::{validate_api_key, AuthError, API_KEY_HEADER};
pub use envelope::{DataEnvelope, ErrorBody, ResponseMetadata};
pub use health::{HealthRes, HealthService, HEALTHY_STATUS};
pub use models::{Admission, LabResult, LabResultRecord, LabTest, Patient};
