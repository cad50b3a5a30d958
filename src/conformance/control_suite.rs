//! Server control commands checked against Redis semantics.

use std::time::Duration;

use super::CommandExpectation;
use super::ErrorPattern;
use super::MonitorPlan;
use super::PollPolicy;
use super::Predicate;
use crate::protocol::Command;
use crate::protocol::Reply;
use crate::KeyValueConfig;
use crate::SuiteProfile;

pub const CONTROL_SUITE: &str = "control-commands";

/// Reason recorded for cases the reference run excluded without saying why
pub const DISABLED: &str = "disabled";

pub(crate) const MONITOR_KEY: &str = "foobared";
pub(crate) const MONITOR_INCREMENTS: usize = 5;
const DEFAULT_MONITOR_TIMEOUT: Duration = Duration::from_secs(10);

const SAVE_IN_PROGRESS: &str = "background save already in progress";

/// Control-command cases; under [`SuiteProfile::Compat`] the excluded ones are `Skip`
pub fn control_commands(profile: SuiteProfile) -> Vec<CommandExpectation> {
    build(profile, DEFAULT_MONITOR_TIMEOUT)
}

/// Cases with the profile and monitor budget from `config`
pub fn control_commands_for(config: &KeyValueConfig) -> Vec<CommandExpectation> {
    build(config.suite_profile, config.monitor_timeout())
}

fn build(
    profile: SuiteProfile,
    monitor_timeout: Duration,
) -> Vec<CommandExpectation> {
    let enabled = |case: CommandExpectation| case;
    let excluded = |case: CommandExpectation| match profile {
        SuiteProfile::Compat => case.skip(DISABLED),
        SuiteProfile::Full => case,
    };

    vec![
        excluded(
            CommandExpectation::new("save", Command::new("SAVE"))
                .exact(Reply::ok())
                .error_matching(ErrorPattern::literal(SAVE_IN_PROGRESS)),
        ),
        excluded(
            CommandExpectation::new("bgsave", Command::new("BGSAVE"))
                .exact(Reply::status("Background saving started"))
                .error_matching(ErrorPattern::literal(SAVE_IN_PROGRESS)),
        ),
        excluded(
            CommandExpectation::new("bgrewriteaof", Command::new("BGREWRITEAOF")).holds(
                Predicate::one_of_status(&[
                    "Background append only file rewriting scheduled",
                    "Background append only file rewriting started",
                ]),
            ),
        ),
        excluded(
            CommandExpectation::new("lastsave", Command::new("LASTSAVE"))
                .holds(Predicate::integer_positive())
                .polled(PollPolicy::new(
                    Duration::from_millis(100),
                    Duration::from_secs(5),
                )),
        ),
        enabled(CommandExpectation::new("info", Command::new("INFO")).holds(Predicate::non_null())),
        enabled(
            CommandExpectation::new("info server", Command::new("INFO").arg("server"))
                .holds(Predicate::non_null()),
        ),
        excluded(
            CommandExpectation::new("readonly", Command::new("READONLY"))
                .holds(Predicate::any())
                .error_matching(ErrorPattern::literal(
                    "this instance has cluster support disabled",
                )),
        ),
        excluded(
            CommandExpectation::new("monitor", Command::new("MONITOR"))
                .exact(Reply::ok())
                .with_monitor(MonitorPlan {
                    key: MONITOR_KEY.to_string(),
                    count: MONITOR_INCREMENTS,
                    timeout: monitor_timeout,
                }),
        ),
        enabled(
            CommandExpectation::new("config get m*", Command::from_args(["CONFIG", "GET", "m*"]))
                .holds(Predicate::non_null()),
        ),
        excluded(
            CommandExpectation::new(
                "config set maxmemory",
                Command::from_args(["CONFIG", "SET", "maxmemory", "200"]),
            )
            .exact(Reply::ok())
            .restoring_config("maxmemory"),
        ),
        enabled(CommandExpectation::new("sync", Command::new("SYNC")).holds(Predicate::any())),
        excluded(
            CommandExpectation::new("debug object", Command::from_args(["DEBUG", "OBJECT", "foo"]))
                .with_setup(Command::from_args(["SET", "foo", "bar"]))
                .holds(Predicate::non_null()),
        ),
        excluded(
            CommandExpectation::new("debug reload", Command::from_args(["DEBUG", "RELOAD"]))
                .holds(Predicate::non_null()),
        ),
        excluded(
            CommandExpectation::new("wait", Command::from_args(["WAIT", "1", "100"]))
                .exact(Reply::Integer(1)),
        ),
    ]
}
