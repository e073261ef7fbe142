//! # Medata Core
//!
//! Building blocks of the medical-data API contract harness:
//! - Configuration resolved once at startup (`config`)
//! - HTTP client for the API under test (`client`)
//! - Pure response and data validators (`validation`)
//! - Table catalogue, fixtures and fixture stores (`tables`, `fixtures`, `store`)
//! - Object storage and Parquet snapshots (`storage`, `snapshot`)
//!
//! **No runner concerns**: case scheduling, retries and reporting live in `medata-suite`.

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod fixtures;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod tables;
pub mod validation;

pub use client::{ApiClient, ApiResponse};
pub use config::{HarnessConfig, StorageBackend, StoreBackend};
pub use error::{HarnessError, HarnessResult};
pub use fixtures::{FixtureGuard, FixtureSet, Namespace};
pub use storage::ObjectStorage;
pub use store::{DateWindow, MedicalStore, MemoryStore, PgStore};
pub use tables::{CellValue, Row, Table};
pub use validation::{ValidationError, Verdict};

use std::sync::Arc;

/// Opens the store selected by the configuration.
///
/// Postgres pools are created lazily so that an unreachable database fails the cases that
/// need it rather than the whole run.
pub fn open_store(config: &HarnessConfig) -> HarnessResult<Arc<dyn MedicalStore>> {
    Ok(match config.store {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Postgres => Arc::new(PgStore::connect_lazy(&config.postgres)?),
    })
}
