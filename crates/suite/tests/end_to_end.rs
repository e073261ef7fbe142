//! Runs every case group against the reference API served on an ephemeral port.
//!
//! The harness and the server share one in-memory store, so fixtures installed by the runner
//! are visible through HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use api_rest::{router, ApiState};
use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use medata_core::tables::Table;
use medata_core::{HarnessConfig, MedicalStore, MemoryStore, ObjectStorage};
use medata_suite::{all_cases, run_suite, Group, Outcome, Runner, SuiteEnv};

const KEY: &str = "test_api_key";

async fn serve(store: Arc<MemoryStore>) -> String {
    serve_app(router(ApiState::new(store, KEY))).await
}

async fn serve_app(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn config(base_url: &str, overrides: &[(&str, &str)]) -> HarnessConfig {
    let mut vars: HashMap<String, String> = [
        ("API_BASE_URL", base_url),
        ("API_KEY", KEY),
        ("MAX_LATENCY_MS", "2000"),
        ("MEAN_LATENCY_MS", "1000"),
        ("PERF_CONCURRENCY", "4"),
        ("INFRA_CHECKS", "true"),
        ("CASE_TIMEOUT_MS", "20000"),
        ("RETRY_DELAY_MS", "10"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();
    for (k, v) in overrides {
        vars.insert((*k).to_owned(), (*v).to_owned());
    }
    HarnessConfig::from_lookup(|key| vars.get(key).cloned()).expect("config")
}

async fn env(overrides: &[(&str, &str)]) -> (Arc<SuiteEnv>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let base_url = serve(Arc::clone(&store)).await;
    let env = SuiteEnv::new(
        config(&base_url, overrides),
        Arc::clone(&store) as Arc<dyn MedicalStore>,
        ObjectStorage::in_memory("external-medate-exam-data"),
    )
    .expect("env");
    (Arc::new(env), store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_group_passes_against_the_reference_api() {
    let (env, store) = env(&[]).await;
    let report = run_suite(Arc::clone(&env), &[]).await;

    for case in &report.cases {
        let expected = if case.group == Group::DataValidation && case.name == "schema_compatibility"
        {
            // The in-memory store has no column catalogue.
            Outcome::Skipped
        } else {
            Outcome::Passed
        };
        assert_eq!(
            case.outcome, expected,
            "{}::{} -> {:?}",
            case.group, case.name, case.detail
        );
    }
    assert_eq!(report.cases.len(), all_cases().len());
    assert!(report.is_success(), "{report}");

    let perf = report
        .case(Group::Performance, "sequential_patient_batch")
        .expect("perf case");
    assert_eq!(perf.latency.as_ref().expect("latency").count, 20);

    // Every fixture namespace was torn down.
    for table in Table::INSERT_ORDER {
        assert!(
            store.rows(table, "").await.expect("rows").is_empty(),
            "{table} still has rows"
        );
    }
    assert!(env.storage.list("raw").await.expect("list").is_empty());
}

#[tokio::test]
async fn test_wrong_harness_key_fails_patient_cases() {
    let (env, _store) = env(&[("API_KEY", "not_the_server_key")]).await;
    let report = run_suite(env, &[Group::Patient]).await;

    let known = report
        .case(Group::Patient, "known_patient")
        .expect("known_patient");
    assert_eq!(known.outcome, Outcome::Failed);
    assert_eq!(
        known.detail.as_deref(),
        Some("Expected status 200, got 401")
    );
    // Rejection cases send their own keys and still pass.
    assert_eq!(
        report
            .case(Group::Patient, "missing_api_key")
            .expect("missing_api_key")
            .outcome,
        Outcome::Passed
    );
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_unreachable_api_is_not_a_pass() {
    let env = SuiteEnv::new(
        config("http://127.0.0.1:1", &[("REQUEST_TIMEOUT_MS", "500")]),
        Arc::new(MemoryStore::new()),
        ObjectStorage::in_memory("bucket"),
    )
    .expect("env");
    let report = Runner::new(Arc::new(env))
        .run(medata_suite::cases_for(&[Group::Health]))
        .await;

    let status = report
        .case(Group::Health, "healthy_status")
        .expect("healthy_status");
    assert!(status.outcome.is_problem(), "{:?}", status.outcome);
    assert_eq!(
        report
            .case(Group::Health, "database_reachable")
            .expect("database_reachable")
            .outcome,
        Outcome::Passed
    );
}

#[tokio::test]
async fn test_health_backend_checks_skip_when_disabled() {
    let (env, _store) = env(&[("INFRA_CHECKS", "false")]).await;
    let report = run_suite(env, &[Group::Health]).await;
    let skipped = report.group(Group::Health).expect("health").skipped;
    assert_eq!(skipped, 2);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_patient_read_that_writes_is_not_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let server_store = Arc::clone(&store);
    // Answers like the real endpoint but rewrites the first lab result's reviewer on every read.
    let app = Router::new().route(
        "/api/v1/patients/:patient_id",
        get(move |Path(patient_id): Path<String>| {
            let store = Arc::clone(&server_store);
            async move {
                store.update_reviewer(1, "Dr. Kutner").await.expect("update");
                let patient = store.find_patient(&patient_id).await.expect("find");
                Json(serde_json::json!({
                    "data": patient,
                    "metadata": {"response_time_ms": 0.5}
                }))
            }
        }),
    );
    let base_url = serve_app(app).await;
    let env = SuiteEnv::new(
        config(&base_url, &[]),
        Arc::clone(&store) as Arc<dyn MedicalStore>,
        ObjectStorage::in_memory("bucket"),
    )
    .expect("env");

    let cases = medata_suite::cases_for(&[Group::Patient])
        .into_iter()
        .filter(|c| c.name == "repeated_request_is_idempotent")
        .collect();
    let report = Runner::new(Arc::new(env)).run(cases).await;

    let case = &report.cases[0];
    assert_eq!(case.outcome, Outcome::Failed);
    assert!(
        case.detail
            .as_deref()
            .is_some_and(|d| d.contains("reviewing_physician")),
        "{:?}",
        case.detail
    );
}
