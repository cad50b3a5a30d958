//! End-to-end runs against in-process fake clusters, plus `#[ignore]`d runs against real
//! database binaries configured through `CONFIG_PATH`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use wire_conformance::control_commands;
use wire_conformance::control_commands_for;
use wire_conformance::protocol::Command;
use wire_conformance::protocol::Reply;
use wire_conformance::CaseState;
use wire_conformance::ClusterSpec;
use wire_conformance::CommandExpectation;
use wire_conformance::ConformanceSuiteRunner;
use wire_conformance::ConnectError;
use wire_conformance::Error;
use wire_conformance::ErrorPattern;
use wire_conformance::FixtureRow;
use wire_conformance::HarnessConfig;
use wire_conformance::KvSessionOpener;
use wire_conformance::Predicate;
use wire_conformance::ProcessClusterManager;
use wire_conformance::ProtocolSessionFactory;
use wire_conformance::ReadinessConfig;
use wire_conformance::ReadinessPoller;
use wire_conformance::SchemaFixtureHelper;
use wire_conformance::SuiteLifecycle;
use wire_conformance::SuiteOutcome;
use wire_conformance::SuiteProfile;
use wire_conformance::TestFixtureSchema;
use wire_conformance::CONTROL_SUITE;

use crate::common::enable_logger;
use crate::common::fake_config;
use crate::common::lifecycle;
use crate::common::FakeClusterLauncher;
use crate::common::STATUS_PATH;

#[tokio::test]
async fn cluster_of_three_and_three_becomes_ready() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();
    let manager = ProcessClusterManager::with_launcher(Arc::new(launcher.clone()));
    let mut spec = ClusterSpec::new(3, 3, Duration::from_secs(50));
    spec.coordinator.binary = "fake-coordinator".into();
    spec.worker.binary = "fake-worker".into();

    let mut handle = manager.start(&spec).await.unwrap();
    assert_eq!(handle.coordinator_endpoints().len(), 3);
    assert_eq!(handle.worker_endpoints().len(), 3);

    let readiness = ReadinessConfig {
        poll_interval_in_ms: 50,
        status_path: STATUS_PATH.to_string(),
        ..Default::default()
    };
    let poller = ReadinessPoller::from_config(&readiness).unwrap();
    assert!(poller.await_ready(&handle, 3, Duration::from_secs(50)).await);
    assert_eq!(handle.health().map(|h| h.serving.len()), Some(3));

    manager.stop(&mut handle).await;
    assert!(handle.is_stopped());
    assert_eq!(launcher.state.terminated().len(), 6);
    // workers go first
    assert!(launcher.state.terminated()[..3].iter().all(|n| n.starts_with("worker")));
}

#[tokio::test]
async fn readiness_timeout_reports_not_ready_and_tears_down() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();
    launcher.state.limit_serving(1);
    let mut config = fake_config(1, 3);
    config.readiness.timeout_in_ms = Some(600);

    let outcome = lifecycle(config, &launcher)
        .run(&CancellationToken::new(), |_ctx| async { Ok(()) }.boxed())
        .await
        .unwrap();

    assert_eq!(outcome, SuiteOutcome::NotReady);
    assert_eq!(launcher.state.terminated().len(), 4);
}

#[tokio::test]
async fn fixture_table_round_trips_derived_rows() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();
    let mut config = fake_config(1, 3);
    config.tabular.page_size = 2;

    let rows = lifecycle(config, &launcher)
        .run(&CancellationToken::new(), |ctx| {
            async move {
                let helper = SchemaFixtureHelper::from_config(ctx.factory.tabular_config());
                let schema = TestFixtureSchema::standard("t1");
                let mut session = ctx.factory.open_tabular(ctx.handle).await?;
                assert_eq!(session.keyspace(), Some("conformance"));

                helper.create_schema(&mut session, &schema).await?;
                helper.populate(&mut session, &schema, 5).await?;
                let rows = helper.select_all(&mut session, &schema).collect_all().await?;
                helper.drop(&mut session, &schema).await?;
                session.close().await?;
                rows.iter().map(FixtureRow::from_row).collect::<wire_conformance::Result<Vec<_>>>()
            }
            .boxed()
        })
        .await
        .unwrap();

    let SuiteOutcome::Completed(rows) = rows else {
        panic!("cluster not ready");
    };
    assert_eq!(rows.len(), 5);
    assert_eq!(
        rows[0],
        FixtureRow {
            h1: 0,
            h2: "h0".to_string(),
            r1: 100,
            r2: "r100".to_string(),
            v1: 1000,
            v2: "v1000".to_string(),
        }
    );
    assert_eq!(rows, FixtureRow::derive_all(5).unwrap());
}

#[tokio::test]
async fn schema_is_restartable_across_sessions() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();

    let outcome = lifecycle(fake_config(1, 2), &launcher)
        .run(&CancellationToken::new(), |ctx| {
            async move {
                let helper = SchemaFixtureHelper::default();
                let schema = TestFixtureSchema::unique("restart");
                for _ in 0..2 {
                    // a new session, most likely on another worker, each time
                    let mut session = ctx.factory.open_tabular(ctx.handle).await?;
                    let rows = helper.round_trip(&mut session, &schema, 3).await?;
                    assert_eq!(rows, FixtureRow::derive_all(3).unwrap());
                    session.close().await?;
                }

                let mut session = ctx.factory.open_tabular(ctx.handle).await?;
                let empty = helper
                    .run_select(&mut session, &schema.select_all_statement())
                    .await;
                Ok(empty.is_err())
            }
            .boxed()
        })
        .await
        .unwrap();

    // the table is gone, so selecting from it fails
    assert_eq!(outcome, SuiteOutcome::Completed(true));
    assert!(launcher.state.tables.lock().unwrap().is_empty());
}

#[tokio::test]
async fn control_suite_passes_in_full_profile() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();
    let mut config = fake_config(1, 3);
    config.keyvalue.suite_profile = SuiteProfile::Full;
    config.keyvalue.monitor_timeout_in_ms = 5_000;

    let outcome = lifecycle(config, &launcher)
        .run(&CancellationToken::new(), |ctx| {
            async move {
                let opener = KvSessionOpener::new(ctx.factory, ctx.handle);
                let runner = ConformanceSuiteRunner::new(CONTROL_SUITE, &opener);
                Ok(runner
                    .run_with_fresh_sessions(&control_commands_for(&ctx.config.keyvalue))
                    .await)
            }
            .boxed()
        })
        .await
        .unwrap();

    let SuiteOutcome::Completed(report) = outcome else {
        panic!("cluster not ready");
    };
    assert!(report.is_success(), "{report}");
    assert_eq!(report.passed(), 14);
    assert_eq!(
        report.case("monitor").and_then(|c| c.observed.clone()).as_deref(),
        Some("observed 5/5 INCR lines")
    );
    assert_eq!(launcher.state.kv.config_value("maxmemory").as_deref(), Some("0"));
}

#[tokio::test]
async fn control_suite_compat_profile_runs_only_enabled_cases() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();

    let outcome = lifecycle(fake_config(1, 1), &launcher)
        .run(&CancellationToken::new(), |ctx| {
            async move {
                let opener = KvSessionOpener::new(ctx.factory, ctx.handle);
                let runner = ConformanceSuiteRunner::new(CONTROL_SUITE, &opener);
                Ok(runner
                    .run_with_fresh_sessions(&control_commands(SuiteProfile::Compat))
                    .await)
            }
            .boxed()
        })
        .await
        .unwrap();

    let SuiteOutcome::Completed(report) = outcome else {
        panic!("cluster not ready");
    };
    assert!(report.is_success(), "{report}");
    assert_eq!(report.passed(), 4);
    assert_eq!(report.skipped(), 10);
    assert!(report
        .skipped_reasons()
        .iter()
        .all(|(_, reason)| *reason == "disabled"));
    // one session per enabled case, none for skipped ones
    let sessions: usize = launcher.state.keyvalue_accepts().values().sum();
    assert_eq!(sessions, 4);
    assert_eq!(
        report.case("config get m*").map(|c| c.state),
        Some(CaseState::Passed)
    );
}

#[tokio::test]
async fn save_twice_passes_through_ok_or_save_in_progress() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();

    let outcome = lifecycle(fake_config(1, 1), &launcher)
        .run(&CancellationToken::new(), |ctx| {
            async move {
                let save = || {
                    CommandExpectation::new("save", Command::new("SAVE"))
                        .exact(Reply::ok())
                        .error_matching(ErrorPattern::literal("background save already in progress"))
                };
                let bgsave = CommandExpectation::new("bgsave", Command::new("BGSAVE"))
                    .holds(Predicate::any());
                let opener = KvSessionOpener::new(ctx.factory, ctx.handle);
                let runner = ConformanceSuiteRunner::new("save", &opener);
                let mut session = ctx.factory.open_configured_key_value(ctx.handle).await?;
                let quiet = runner.run_on_session(&mut session, &[save(), save()]).await;
                let busy = runner
                    .run_on_session(&mut session, &[bgsave, save(), save()])
                    .await;
                session.close().await?;
                Ok((quiet, busy))
            }
            .boxed()
        })
        .await
        .unwrap();

    let SuiteOutcome::Completed((quiet, busy)) = outcome else {
        panic!("cluster not ready");
    };
    assert_eq!(quiet.passed(), 2, "{quiet}");
    assert_eq!(busy.passed(), 3, "{busy}");
    assert_eq!(
        busy.cases[1].observed.as_deref(),
        Some("(error) ERR Background save already in progress")
    );
}

#[tokio::test]
async fn sessions_fail_over_past_a_broken_worker() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();
    let state = launcher.state.clone();

    let outcome = lifecycle(fake_config(1, 3), &launcher)
        .run(&CancellationToken::new(), move |ctx| {
            async move {
                // still SERVING in the health snapshot, but refusing connections
                state.break_worker(1).await;
                for _ in 0..3 {
                    let session = ctx.factory.open_configured_key_value(ctx.handle).await?;
                    session.close().await?;
                    let session = ctx.factory.open_tabular(ctx.handle).await?;
                    session.close().await?;
                }
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(outcome, SuiteOutcome::Completed(()));
    let accepts = launcher.state.keyvalue_accepts();
    assert!(!accepts.contains_key(&1));
    assert_eq!(accepts.values().sum::<usize>(), 3);
    assert_eq!(launcher.state.tabular_accepts().values().sum::<usize>(), 3);
}

#[tokio::test]
async fn sessions_stay_on_serving_workers() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();
    launcher.state.limit_serving(2);
    let mut config = fake_config(1, 3);
    config.readiness.min_workers = Some(2);

    let outcome = lifecycle(config, &launcher)
        .run(&CancellationToken::new(), |ctx| {
            async move {
                for _ in 0..4 {
                    let session = ctx.factory.open_configured_key_value(ctx.handle).await?;
                    session.close().await?;
                }
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(outcome, SuiteOutcome::Completed(()));
    let accepts = launcher.state.keyvalue_accepts();
    assert_eq!(accepts.get(&0), Some(&2));
    assert_eq!(accepts.get(&1), Some(&2));
    assert_eq!(accepts.get(&2), None);
}

#[tokio::test]
async fn unmatched_host_is_a_connect_error_not_a_suite_abort() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();
    let mut config = fake_config(1, 1);
    config.keyvalue.host = "db.example.invalid".to_string();

    let outcome = lifecycle(config, &launcher)
        .run(&CancellationToken::new(), |ctx| {
            async move {
                let opened = ctx.factory.open_configured_key_value(ctx.handle).await;
                Ok(matches!(opened, Err(ConnectError::NoEndpoint { .. })))
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(outcome, SuiteOutcome::Completed(true));
}

#[tokio::test]
async fn cancellation_tears_the_cluster_down() {
    enable_logger();
    let launcher = FakeClusterLauncher::default();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let result = lifecycle(fake_config(1, 2), &launcher)
        .run::<(), _>(&cancel, move |_ctx| {
            async move {
                trigger.cancel();
                std::future::pending::<()>().await;
                Ok(())
            }
            .boxed()
        })
        .await;

    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert_eq!(launcher.state.terminated().len(), 3);
}

//-----------------------------------------------------------
// Real cluster (needs database binaries in the CONFIG_PATH configuration)

fn live_lifecycle() -> SuiteLifecycle {
    let config = HarnessConfig::new().and_then(HarnessConfig::validate).unwrap();
    SuiteLifecycle::from_config(config).unwrap()
}

#[tokio::test]
#[ignore = "needs database binaries configured through CONFIG_PATH"]
async fn live_fixture_round_trip() {
    enable_logger();
    let outcome = live_lifecycle()
        .run(&CancellationToken::new(), |ctx| {
            async move {
                let helper = SchemaFixtureHelper::from_config(ctx.factory.tabular_config());
                let mut session = ctx.factory.open_tabular(ctx.handle).await?;
                let rows = helper
                    .round_trip(&mut session, &TestFixtureSchema::unique("live"), 5)
                    .await?;
                session.close().await?;
                Ok(rows)
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SuiteOutcome::Completed(FixtureRow::derive_all(5).unwrap())
    );
}

#[tokio::test]
#[ignore = "needs database binaries configured through CONFIG_PATH"]
async fn live_control_commands() {
    enable_logger();
    let outcome = live_lifecycle()
        .run(&CancellationToken::new(), |ctx| {
            async move {
                let opener = KvSessionOpener::new(ctx.factory, ctx.handle);
                let runner = ConformanceSuiteRunner::new(CONTROL_SUITE, &opener);
                Ok(runner
                    .run_with_fresh_sessions(&control_commands_for(&ctx.config.keyvalue))
                    .await)
            }
            .boxed()
        })
        .await
        .unwrap();

    let SuiteOutcome::Completed(report) = outcome else {
        panic!("cluster not ready");
    };
    println!("{report}");
    assert!(report.is_success());
}

#[test]
fn factory_defaults_match_configuration_defaults() {
    let config = HarnessConfig::default();
    let factory = ProtocolSessionFactory::from_config(&config);
    assert_eq!(factory.keyvalue_config().host, "localhost");
    assert_eq!(factory.tabular_config().keyspace.as_deref(), Some("conformance"));
}
