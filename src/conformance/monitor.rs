//! The MONITOR case: the only case that runs two sessions at once.
//!
//! The primary session subscribes to the feed and only after the server acknowledged the
//! subscription does it release the auxiliary session, which issues `INCR key` a fixed number
//! of times on the same endpoint. Both sides are joined before the case is judged.

use std::net::SocketAddr;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use super::runner::describe;
use super::CommandExecutor;
use super::CommandExpectation;
use super::MonitorPlan;
use super::SessionOpener;
use super::Verdict;
use crate::protocol::Command;
use crate::Error;
use crate::Result;

pub(crate) async fn run_monitor_case(
    opener: &dyn SessionOpener,
    case: &CommandExpectation,
    plan: &MonitorPlan,
) -> (Verdict, String) {
    let mut primary = match opener.open().await {
        Ok(session) => session,
        Err(e) => return (Verdict::Fail, format!("connect: {e}")),
    };

    let outcome = observe(primary.as_mut(), opener, case, plan).await;
    if let Err(e) = primary.shutdown().await {
        warn!(case = %case.name, "monitor session close failed: {e}");
    }
    outcome
}

async fn observe(
    primary: &mut dyn CommandExecutor,
    opener: &dyn SessionOpener,
    case: &CommandExpectation,
    plan: &MonitorPlan,
) -> (Verdict, String) {
    let subscribed = primary.execute(&case.command).await;
    if case.judge(&subscribed) == Verdict::Fail {
        return (Verdict::Fail, describe(&subscribed));
    }

    let (release, released) = oneshot::channel::<()>();
    let auxiliary = increment(opener, primary.peer(), released, plan);
    // acknowledged above; the auxiliary may start now
    let _ = release.send(());
    let feed = count_increments(primary, plan);

    let (auxiliary, seen) = tokio::join!(auxiliary, feed);
    debug!(case = %case.name, seen, expected = plan.count, "monitor feed observed");

    let observed = format!("observed {seen}/{} INCR lines", plan.count);
    match auxiliary {
        Ok(()) if seen >= plan.count => (Verdict::Pass, observed),
        Ok(()) => (Verdict::Fail, observed),
        Err(e) => (Verdict::Fail, format!("{observed}; auxiliary session: {e}")),
    }
}

/// Auxiliary side: wait for the release, then `INCR key` `count` times on a session of its own
async fn increment(
    opener: &dyn SessionOpener,
    target: Option<SocketAddr>,
    released: oneshot::Receiver<()>,
    plan: &MonitorPlan,
) -> Result<()> {
    released
        .await
        .map_err(|_| Error::Fatal("monitor subscription was abandoned".to_string()))?;

    let mut session = match target {
        Some(endpoint) => opener.open_to(endpoint).await?,
        None => opener.open().await?,
    };
    let command = Command::new("INCR").arg(&plan.key);
    let mut outcome = Ok(());
    for _ in 0..plan.count {
        if let Err(e) = session.execute(&command).await {
            outcome = Err(e);
            break;
        }
    }
    if let Err(e) = session.shutdown().await {
        debug!("auxiliary session close failed: {e}");
    }
    outcome
}

/// Read feed lines until `count` of them mention INCR or the plan's timeout passes
async fn count_increments(
    primary: &mut dyn CommandExecutor,
    plan: &MonitorPlan,
) -> usize {
    let deadline = Instant::now() + plan.timeout;
    let mut seen = 0;
    while seen < plan.count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match primary.next_reply(remaining).await {
            Ok(line) => {
                let mentions_incr = line
                    .as_text()
                    .is_some_and(|text| text.to_ascii_uppercase().contains("INCR"));
                if mentions_incr {
                    seen += 1;
                }
            }
            Err(e) => {
                debug!("monitor feed ended: {e}");
                break;
            }
        }
    }
    seen
}
