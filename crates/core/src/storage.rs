//! Object storage for Parquet snapshots and exports.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::{aws::AmazonS3Builder, memory::InMemory, path::Path, ObjectStore, PutPayload};

use crate::config::{StorageBackend, StorageSettings};
use crate::constants::{EXPORT_PREFIX, RAW_SNAPSHOT_PREFIX};
use crate::fixtures::Namespace;
use crate::tables::Table;
use crate::{HarnessError, HarnessResult};

/// Key of a fixture-scoped snapshot:
/// `raw/parquet/<table>/<table>_<namespace>_<YYYYMMDDTHHMMSS>.parquet`.
pub fn snapshot_key(table: Table, namespace: &Namespace, at: DateTime<Utc>) -> String {
    let name = table.name();
    format!(
        "{RAW_SNAPSHOT_PREFIX}/{name}/{name}_{}{}.parquet",
        namespace.as_str(),
        at.format("%Y%m%dT%H%M%S")
    )
}

/// Key of the full-table export: `parquet/<table>/<table>.parquet`.
pub fn export_key(table: Table) -> String {
    let name = table.name();
    format!("{EXPORT_PREFIX}/{name}/{name}.parquet")
}

#[derive(Clone, Debug)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    backend: StorageBackend,
}

impl ObjectStorage {
    pub fn from_settings(settings: &StorageSettings) -> HarnessResult<Self> {
        match settings.backend {
            StorageBackend::Memory => {
                tracing::info!("Using in-memory object store");
                Ok(Self::in_memory(&settings.bucket))
            }
            StorageBackend::S3 => {
                tracing::info!(
                    bucket = %settings.bucket,
                    region = %settings.region,
                    "Using S3 object store"
                );
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(&settings.bucket)
                    .with_region(&settings.region);
                if let Some(endpoint) = &settings.endpoint {
                    tracing::info!("Using custom S3 endpoint: {}", endpoint);
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }
                if let Some(key) = &settings.access_key_id {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(secret) = &settings.secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                let store = builder.build().map_err(|e| {
                    HarnessError::Config(format!("invalid S3 configuration: {e}"))
                })?;
                Ok(Self {
                    store: Arc::new(store),
                    bucket: settings.bucket.clone(),
                    backend: StorageBackend::S3,
                })
            }
        }
    }

    pub fn in_memory(bucket: &str) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            bucket: bucket.to_owned(),
            backend: StorageBackend::Memory,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn backend(&self) -> StorageBackend {
        self.backend
    }

    /// Lists the bucket root to confirm credentials and reachability.
    pub async fn check_access(&self) -> HarnessResult<()> {
        self.store
            .list_with_delimiter(None)
            .await
            .map_err(|e| HarnessError::StorageUnavailable(format!("bucket {}: {e}", self.bucket)))?;
        Ok(())
    }

    pub async fn put(&self, key: &str, bytes: Bytes) -> HarnessResult<()> {
        let size = bytes.len();
        self.store
            .put(&Path::from(key), PutPayload::from(bytes))
            .await?;
        tracing::debug!(bucket = %self.bucket, key, size, "object written");
        Ok(())
    }

    pub async fn get(&self, key: &str) -> HarnessResult<Bytes> {
        let result = self.store.get(&Path::from(key)).await?;
        Ok(result.bytes().await?)
    }

    pub async fn exists(&self, key: &str) -> HarnessResult<bool> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, key: &str) -> HarnessResult<()> {
        self.store.delete(&Path::from(key)).await?;
        Ok(())
    }

    /// Keys under `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> HarnessResult<Vec<String>> {
        let prefix = Path::from(prefix);
        let mut keys: Vec<String> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_keys_follow_bucket_layout() {
        let ns = Namespace::parse("TEST_1a2b3c4d_").expect("ns");
        let at = Utc
            .with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
            .single()
            .expect("timestamp");
        assert_eq!(
            snapshot_key(Table::LabResults, &ns, at),
            "raw/parquet/lab_results/lab_results_TEST_1a2b3c4d_20240305T140709.parquet"
        );
        assert_eq!(
            export_key(Table::PatientInformation),
            "parquet/patient_information/patient_information.parquet"
        );
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let storage = ObjectStorage::in_memory("bucket");
        storage.check_access().await.expect("access");
        assert!(!storage.exists("parquet/a/a.parquet").await.expect("exists"));

        storage
            .put("parquet/a/a.parquet", Bytes::from_static(b"one"))
            .await
            .expect("put");
        storage
            .put("parquet/b/b.parquet", Bytes::from_static(b"two"))
            .await
            .expect("put");
        storage
            .put("raw/parquet/a/x.parquet", Bytes::from_static(b"three"))
            .await
            .expect("put");

        assert_eq!(
            storage.get("parquet/b/b.parquet").await.expect("get"),
            Bytes::from_static(b"two")
        );
        assert_eq!(
            storage.list("parquet").await.expect("list"),
            vec!["parquet/a/a.parquet", "parquet/b/b.parquet"]
        );

        storage.delete("parquet/a/a.parquet").await.expect("delete");
        assert!(!storage.exists("parquet/a/a.parquet").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_missing_object_is_a_storage_error() {
        let storage = ObjectStorage::in_memory("bucket");
        let err = storage.get("nope.parquet").await.expect_err("missing");
        assert!(matches!(
            err,
            HarnessError::Storage(object_store::Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_s3_settings_build_a_client() {
        let settings = StorageSettings {
            backend: StorageBackend::S3,
            bucket: "external-medate-exam-data".into(),
            region: "us-east-1".into(),
            endpoint: Some("http://localhost:9000".into()),
            access_key_id: Some("minio".into()),
            secret_access_key: Some("minio123".into()),
        };
        let storage = ObjectStorage::from_settings(&settings).expect("s3");
        assert_eq!(storage.backend(), StorageBackend::S3);
        assert_eq!(storage.bucket(), "external-medate-exam-data");
    }
}
