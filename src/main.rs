use std::process::ExitCode;

use futures::FutureExt;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wire_conformance::control_commands_for;
use wire_conformance::CaseReport;
use wire_conformance::CaseState;
use wire_conformance::ConformanceSuiteRunner;
use wire_conformance::FixtureRow;
use wire_conformance::HarnessConfig;
use wire_conformance::KvSessionOpener;
use wire_conformance::Result;
use wire_conformance::SchemaFixtureHelper;
use wire_conformance::SuiteContext;
use wire_conformance::SuiteLifecycle;
use wire_conformance::SuiteOutcome;
use wire_conformance::SuiteReport;
use wire_conformance::TestFixtureSchema;
use wire_conformance::CONTROL_SUITE;

const SCHEMA_SUITE: &str = "schema";
const SMOKE_ROWS: usize = 5;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("harness run failed: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run() -> Result<bool> {
    let config = HarnessConfig::new()?.validate()?;
    info!(?config, "configuration loaded");

    let cancel = CancellationToken::new();
    tokio::spawn(graceful_shutdown(cancel.clone()));

    let lifecycle = SuiteLifecycle::from_config(config)?;
    let outcome = lifecycle
        .run(&cancel, |ctx| run_suites(ctx).boxed())
        .await?;

    let reports = match outcome {
        SuiteOutcome::Completed(reports) => reports,
        SuiteOutcome::NotReady => {
            error!("cluster did not become ready; no suite was run");
            return Ok(false);
        }
    };

    for report in &reports {
        println!("{report}");
    }
    Ok(reports.iter().all(SuiteReport::is_success))
}

async fn run_suites(ctx: SuiteContext<'_>) -> Result<Vec<SuiteReport>> {
    let mut schema = SuiteReport::new(SCHEMA_SUITE);
    schema.push(schema_smoke_test(ctx).await);

    let opener = KvSessionOpener::new(ctx.factory, ctx.handle);
    let runner = ConformanceSuiteRunner::new(CONTROL_SUITE, &opener);
    let control = runner
        .run_with_fresh_sessions(&control_commands_for(&ctx.config.keyvalue))
        .await;

    Ok(vec![schema, control])
}

/// Create a fresh table, write the derived rows, read them back and drop it
async fn schema_smoke_test(ctx: SuiteContext<'_>) -> CaseReport {
    let started = Instant::now();
    let schema = TestFixtureSchema::unique("smoke");
    let description = format!("round trip of {SMOKE_ROWS} rows through {}", schema.name);
    let helper = SchemaFixtureHelper::from_config(ctx.factory.tabular_config());

    let result = round_trip(ctx, &helper, &schema).await;

    let (state, observed) = match (result, FixtureRow::derive_all(SMOKE_ROWS)) {
        (Ok(rows), Ok(expected)) if rows == expected => {
            (CaseState::Passed, format!("{} rows", rows.len()))
        }
        (Ok(rows), Ok(_)) => (CaseState::Failed, format!("read back {rows:?}")),
        (Err(e), _) | (_, Err(e)) => (CaseState::Failed, e.to_string()),
    };
    CaseReport::custom(
        "schema round trip",
        description,
        state,
        Some(observed),
        started.elapsed(),
    )
}

async fn round_trip(
    ctx: SuiteContext<'_>,
    helper: &SchemaFixtureHelper,
    schema: &TestFixtureSchema,
) -> Result<Vec<FixtureRow>> {
    let mut session = ctx.factory.open_tabular(ctx.handle).await?;
    let rows = helper.round_trip(&mut session, schema, SMOKE_ROWS).await;
    session.close().await?;
    rows
}

async fn graceful_shutdown(cancel: CancellationToken) {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("failed to install signal handlers: {e}");
            return;
        }
    };
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }
    cancel.cancel();
}
