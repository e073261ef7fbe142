//! Constants used throughout the medata core crate.
//!
//! This module contains the schema, endpoint and default-threshold constants to ensure
//! consistency across the codebase and make maintenance easier.

/// Postgres schema holding the medical tables.
pub const DEFAULT_DB_SCHEMA: &str = "medate_exam";

/// Default object-storage bucket for Parquet snapshots.
pub const DEFAULT_S3_BUCKET: &str = "external-medate-exam-data";

/// Default AWS region.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Default API base URL when `API_BASE_URL` is not set.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Versioned prefix of the patient endpoints.
pub const DEFAULT_API_VERSION: &str = "api/v1";

/// API key used by the reference environment.
pub const DEFAULT_API_KEY: &str = "test_api_key";

/// Path of the health endpoint (unversioned).
pub const HEALTH_PATH: &str = "health";

/// Path segment of the patient collection.
pub const PATIENTS_SEGMENT: &str = "patients";

/// Path segment of the lab results sub-collection.
pub const LAB_RESULTS_SEGMENT: &str = "lab_results";

/// Leading component of every fixture namespace (`TEST_<8 hex>_`).
pub const FIXTURE_PREFIX: &str = "TEST";

/// Prefix for snapshots written during fixture-scoped checks.
pub const RAW_SNAPSHOT_PREFIX: &str = "raw/parquet";

/// Prefix for full-table exports.
pub const EXPORT_PREFIX: &str = "parquet";

/// Individual request latency ceiling in milliseconds.
pub const DEFAULT_MAX_LATENCY_MS: u64 = 500;

/// Mean request latency ceiling in milliseconds.
pub const DEFAULT_MEAN_LATENCY_MS: u64 = 200;

/// Requests per performance batch.
pub const DEFAULT_PERF_BATCH_SIZE: usize = 20;

/// Allowed distance between the health timestamp and wall-clock time, in seconds.
pub const DEFAULT_HEALTH_SKEW_SECS: u64 = 300;

/// DDL for the `medate_exam` schema.
pub const SCHEMA_DDL: &str = include_str!("../sql/medate_exam.sql");
