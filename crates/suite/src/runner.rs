//! Parallel case runner.
//!
//! Cases run on the tokio runtime, bounded by `RunnerSettings::workers`. Every attempt runs in
//! its own task so that a panic fails only that case, and under `case_timeout` so that a hung
//! case is aborted and reported as timed out. Flaky cases get `retry_count` extra attempts.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use medata_core::config::RunnerSettings;
use medata_core::{FixtureGuard, FixtureSet, Namespace};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::case::Case;
use crate::context::{CaseContext, LatencyRecorder, SuiteEnv};
use crate::outcome::{CaseFailure, CaseResult, Outcome};
use crate::report::{CaseReport, SuiteReport};
use crate::stats::LatencyStats;

pub struct Runner {
    env: Arc<SuiteEnv>,
    settings: RunnerSettings,
}

impl Runner {
    pub fn new(env: Arc<SuiteEnv>) -> Self {
        let settings = env.config.runner.clone();
        Self { env, settings }
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runs every case and reports them in the order given.
    pub async fn run(&self, cases: Vec<Case>) -> SuiteReport {
        let started_at = Utc::now();
        let started = Instant::now();
        tracing::info!(
            cases = cases.len(),
            workers = self.settings.workers,
            "starting run"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();
        for (index, case) in cases.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let env = Arc::clone(&self.env);
            let settings = self.settings.clone();
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                (index, run_case(env, &settings, case).await)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!(error = %e, "case scheduler task failed"),
            }
        }
        reports.sort_by_key(|(index, _)| *index);

        let report = SuiteReport::new(
            started_at,
            started.elapsed(),
            reports.into_iter().map(|(_, r)| r).collect(),
        );
        tracing::info!(summary = %report.totals, "run finished");
        report
    }
}

async fn run_case(env: Arc<SuiteEnv>, settings: &RunnerSettings, case: Case) -> CaseReport {
    let started = Instant::now();
    let max_attempts = if case.flaky {
        settings.retry_count + 1
    } else {
        1
    };

    let mut attempts = 0;
    let (result, latencies) = loop {
        attempts += 1;
        let (result, latencies) = run_attempt(&env, settings.case_timeout, &case).await;
        let failed = result.as_ref().is_err_and(|f| f.outcome().is_problem());
        if failed && attempts < max_attempts {
            if let Err(failure) = &result {
                tracing::warn!(case = %case.id(), attempt = attempts, %failure, "flaky case failed, retrying");
            }
            tokio::time::sleep(settings.retry_delay).await;
            continue;
        }
        break (result, latencies);
    };

    let (outcome, detail) = match result {
        Ok(()) => (Outcome::Passed, None),
        Err(CaseFailure::Skip(reason)) => (Outcome::Skipped, Some(reason)),
        Err(failure) => (failure.outcome(), Some(failure.to_string())),
    };
    match outcome {
        Outcome::Passed | Outcome::Skipped => {
            tracing::debug!(case = %case.id(), %outcome, "case finished")
        }
        _ => tracing::warn!(case = %case.id(), %outcome, detail = detail.as_deref().unwrap_or_default(), "case finished"),
    }

    CaseReport {
        group: case.group,
        name: case.name.to_owned(),
        outcome,
        detail,
        attempts,
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        latency: LatencyStats::from_samples(&latencies),
    }
}

async fn run_attempt(
    env: &Arc<SuiteEnv>,
    timeout: Duration,
    case: &Case,
) -> (CaseResult, Vec<Duration>) {
    let recorder = LatencyRecorder::default();
    let task = tokio::spawn(attempt(Arc::clone(env), case.clone(), recorder.clone()));
    let abort = task.abort_handle();
    let result = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) if join.is_panic() => Err(CaseFailure::assertion(format!(
            "panicked: {}",
            panic_message(join.into_panic())
        ))),
        Ok(Err(join)) => Err(CaseFailure::Setup(format!("case task cancelled: {join}"))),
        Err(_) => {
            // Dropping the guard inside the aborted task schedules the fixture cleanup.
            abort.abort();
            Err(CaseFailure::Timeout(format!(
                "case exceeded {} ms",
                timeout.as_millis()
            )))
        }
    };
    (result, recorder.samples())
}

/// One attempt inside its own task: fixtures, body, teardown.
async fn attempt(env: Arc<SuiteEnv>, case: Case, recorder: LatencyRecorder) -> CaseResult {
    let guard = if case.fixtures {
        let set = FixtureSet::standard(&Namespace::generate())?;
        Some(FixtureGuard::install(Arc::clone(&env.store), set).await?)
    } else {
        None
    };

    let ctx = CaseContext::new(env, guard.as_ref().map(|g| g.set().clone()), recorder);
    let result = case.start(ctx).await;

    if let Some(guard) = guard {
        if let Err(e) = guard.teardown().await {
            tracing::warn!(case = %case.id(), error = %e, "fixture teardown failed");
        }
    }
    result
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Group;
    use medata_core::tables::Table;
    use medata_core::{HarnessConfig, MedicalStore, MemoryStore, ObjectStorage, PgStore};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn env_with(store: Arc<MemoryStore>) -> Arc<SuiteEnv> {
        let config = HarnessConfig::from_lookup(|_| None).expect("config");
        Arc::new(
            SuiteEnv::new(config, store, ObjectStorage::in_memory("bucket")).expect("env"),
        )
    }

    fn settings(timeout_ms: u64, retries: u32) -> RunnerSettings {
        RunnerSettings {
            workers: 2,
            case_timeout: Duration::from_millis(timeout_ms),
            retry_count: retries,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn runner(store: Arc<MemoryStore>, timeout_ms: u64, retries: u32) -> Runner {
        Runner::new(env_with(store)).with_settings(settings(timeout_ms, retries))
    }

    #[tokio::test]
    async fn test_outcomes_are_reported_in_case_order() {
        let cases = vec![
            Case::new(Group::Health, "passes", |_ctx| async { Ok(()) }),
            Case::new(Group::Health, "fails", |_ctx| async {
                Err(CaseFailure::assertion("Expected status 200, got 500"))
            }),
            Case::new(Group::Health, "skips", |_ctx| async {
                Err(CaseFailure::skip("infra checks disabled"))
            }),
            Case::new(Group::Health, "errors", |_ctx| async {
                Err(CaseFailure::Setup("database unreachable".into()))
            }),
        ];
        let report = runner(Arc::new(MemoryStore::new()), 1_000, 0).run(cases).await;

        let outcomes: Vec<(String, Outcome)> = report
            .cases
            .iter()
            .map(|c| (c.name.clone(), c.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("passes".to_owned(), Outcome::Passed),
                ("fails".to_owned(), Outcome::Failed),
                ("skips".to_owned(), Outcome::Skipped),
                ("errors".to_owned(), Outcome::Errored),
            ]
        );
        assert_eq!(report.cases[2].detail.as_deref(), Some("infra checks disabled"));
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_unreachable_database_errors_only_fixture_cases() {
        let mut config = HarnessConfig::from_lookup(|_| None).expect("config");
        config.postgres.host = "127.0.0.1".into();
        config.postgres.port = 1;
        let store = PgStore::connect_lazy(&config.postgres).expect("lazy pool");
        let env = SuiteEnv::new(config, Arc::new(store), ObjectStorage::in_memory("bucket"))
            .expect("env");
        let cases = vec![
            Case::new(Group::Patient, "needs_database", |_ctx| async { Ok(()) }).with_fixtures(),
            Case::new(Group::Health, "no_database", |_ctx| async { Ok(()) }),
        ];
        let report = Runner::new(Arc::new(env))
            .with_settings(settings(30_000, 0))
            .run(cases)
            .await;

        let needs = &report.cases[0];
        assert_eq!(needs.outcome, Outcome::Errored);
        assert!(
            needs.detail.as_deref().is_some_and(|d| d.contains("database unreachable")),
            "{:?}",
            needs.detail
        );
        // One pool timeout, no second wait for the cleanup.
        assert!(needs.duration_ms < 9_000.0, "{} ms", needs.duration_ms);
        assert_eq!(report.cases[1].outcome, Outcome::Passed);
    }

    #[tokio::test]
    async fn test_panic_fails_only_that_case() {
        let cases = vec![
            Case::new(Group::Patient, "panics", |_ctx| async {
                if true {
                    panic!("boom");
                }
                Ok(())
            }),
            Case::new(Group::Patient, "passes", |_ctx| async { Ok(()) }),
        ];
        let report = runner(Arc::new(MemoryStore::new()), 1_000, 0).run(cases).await;
        assert_eq!(report.cases[0].outcome, Outcome::Failed);
        assert_eq!(report.cases[0].detail.as_deref(), Some("panicked: boom"));
        assert_eq!(report.cases[1].outcome, Outcome::Passed);
    }

    #[tokio::test]
    async fn test_hung_case_times_out_and_fixtures_are_removed() {
        let store = Arc::new(MemoryStore::new());
        let cases = vec![Case::new(Group::LabResults, "hangs", |_ctx| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .with_fixtures()];
        let report = runner(Arc::clone(&store), 50, 0).run(cases).await;
        assert_eq!(report.cases[0].outcome, Outcome::TimedOut);

        // Cleanup is spawned from the guard's drop inside the aborted task.
        for _ in 0..50 {
            if store.rows(Table::PatientInformation, "").await.expect("rows").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store
            .rows(Table::PatientInformation, "")
            .await
            .expect("rows")
            .is_empty());
    }

    #[tokio::test]
    async fn test_flaky_case_is_retried_until_it_passes() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let cases = vec![Case::new(Group::Performance, "eventually", move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CaseFailure::assertion("too slow"))
                } else {
                    Ok(())
                }
            }
        })
        .flaky()];
        let report = runner(Arc::new(MemoryStore::new()), 1_000, 2).run(cases).await;
        assert_eq!(report.cases[0].outcome, Outcome::Passed);
        assert_eq!(report.cases[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_flaky_case_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let cases = vec![Case::new(Group::Patient, "once", move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(CaseFailure::assertion("wrong")) }
        })];
        let report = runner(Arc::new(MemoryStore::new()), 1_000, 5).run(cases).await;
        assert_eq!(report.cases[0].attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fixtures_are_installed_for_the_body_and_removed_after() {
        let store = Arc::new(MemoryStore::new());
        let cases = vec![Case::new(Group::Patient, "sees_fixtures", |ctx: CaseContext| async move {
            let set = ctx.fixtures()?;
            let found = ctx.store().find_patient(&set.known_patient_id()).await?;
            match found {
                Some(p) if p.first_name == "John" => Ok(()),
                other => Err(CaseFailure::assertion(format!("unexpected patient {other:?}"))),
            }
        })
        .with_fixtures()];
        let report = runner(Arc::clone(&store), 1_000, 0).run(cases).await;
        assert_eq!(report.cases[0].outcome, Outcome::Passed, "{:?}", report.cases[0].detail);
        assert!(store
            .rows(Table::LabResults, "")
            .await
            .expect("rows")
            .is_empty());
    }

    #[tokio::test]
    async fn test_latency_samples_reach_the_report() {
        let cases = vec![Case::new(Group::Performance, "timed", |ctx: CaseContext| async move {
            ctx.record_latency(Duration::from_millis(10));
            ctx.record_latency(Duration::from_millis(30));
            Ok(())
        })];
        let report = runner(Arc::new(MemoryStore::new()), 1_000, 0).run(cases).await;
        let latency = report.cases[0].latency.as_ref().expect("latency");
        assert_eq!(latency.count, 2);
        assert_eq!(latency.mean_ms, 20.0);
    }
}
