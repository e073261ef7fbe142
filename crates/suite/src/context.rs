//! Shared suite environment and the per-attempt case context.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use medata_core::{
    open_store, ApiClient, FixtureSet, HarnessConfig, HarnessResult, MedicalStore, Namespace,
    ObjectStorage,
};

use crate::outcome::CaseFailure;

/// Everything cases share: configuration, client and backends.
#[derive(Clone)]
pub struct SuiteEnv {
    pub config: HarnessConfig,
    pub client: ApiClient,
    pub store: Arc<dyn MedicalStore>,
    pub storage: ObjectStorage,
}

impl SuiteEnv {
    /// Opens the client and backends selected by the configuration.
    pub fn from_config(config: HarnessConfig) -> HarnessResult<Self> {
        let store = open_store(&config)?;
        let storage = ObjectStorage::from_settings(&config.storage)?;
        Self::new(config, store, storage)
    }

    pub fn new(
        config: HarnessConfig,
        store: Arc<dyn MedicalStore>,
        storage: ObjectStorage,
    ) -> HarnessResult<Self> {
        let client = ApiClient::new(&config.api)?;
        Ok(Self {
            config,
            client,
            store,
            storage,
        })
    }
}

/// Latency samples collected by one attempt.
#[derive(Clone, Debug, Default)]
pub struct LatencyRecorder(Arc<Mutex<Vec<Duration>>>);

impl LatencyRecorder {
    pub fn record(&self, elapsed: Duration) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(elapsed);
    }

    pub fn samples(&self) -> Vec<Duration> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// What a case body sees.
#[derive(Clone)]
pub struct CaseContext {
    env: Arc<SuiteEnv>,
    fixtures: Option<FixtureSet>,
    latencies: LatencyRecorder,
}

impl CaseContext {
    pub fn new(env: Arc<SuiteEnv>, fixtures: Option<FixtureSet>, latencies: LatencyRecorder) -> Self {
        Self {
            env,
            fixtures,
            latencies,
        }
    }

    pub fn env(&self) -> &SuiteEnv {
        &self.env
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.env.config
    }

    pub fn client(&self) -> &ApiClient {
        &self.env.client
    }

    pub fn store(&self) -> &Arc<dyn MedicalStore> {
        &self.env.store
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.env.storage
    }

    /// The installed fixture set. Only cases built `with_fixtures` have one.
    pub fn fixtures(&self) -> Result<&FixtureSet, CaseFailure> {
        self.fixtures
            .as_ref()
            .ok_or_else(|| CaseFailure::Setup("case runs without fixtures".into()))
    }

    pub fn namespace(&self) -> Result<&Namespace, CaseFailure> {
        self.fixtures()?
            .namespace
            .as_ref()
            .ok_or_else(|| CaseFailure::Setup("fixture set has no namespace".into()))
    }

    pub fn record_latency(&self, elapsed: Duration) {
        self.latencies.record(elapsed);
    }

    pub fn latencies(&self) -> Vec<Duration> {
        self.latencies.samples()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medata_core::MemoryStore;

    fn env() -> Arc<SuiteEnv> {
        let config = HarnessConfig::from_lookup(|_| None).expect("config");
        let storage = ObjectStorage::in_memory("bucket");
        Arc::new(SuiteEnv::new(config, Arc::new(MemoryStore::new()), storage).expect("env"))
    }

    #[test]
    fn test_recorder_is_shared_between_clones() {
        let recorder = LatencyRecorder::default();
        let ctx = CaseContext::new(env(), None, recorder.clone());
        ctx.record_latency(Duration::from_millis(3));
        ctx.clone().record_latency(Duration::from_millis(5));
        assert_eq!(
            recorder.samples(),
            vec![Duration::from_millis(3), Duration::from_millis(5)]
        );
    }

    #[test]
    fn test_missing_fixtures_is_a_setup_failure() {
        let ctx = CaseContext::new(env(), None, LatencyRecorder::default());
        let err = ctx.fixtures().expect_err("no fixtures");
        assert!(matches!(err, CaseFailure::Setup(_)));
    }

    #[test]
    fn test_namespace_comes_from_fixtures() {
        let ns = Namespace::generate();
        let set = FixtureSet::standard(&ns).expect("set");
        let ctx = CaseContext::new(env(), Some(set), LatencyRecorder::default());
        assert_eq!(ctx.namespace().expect("namespace"), &ns);
    }
}
