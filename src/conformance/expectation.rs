use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use regex::RegexBuilder;

use crate::protocol::Command;
use crate::protocol::Reply;
use crate::Error;
use crate::Result;

type Check = dyn Fn(&Reply) -> bool + Send + Sync;

/// A named boolean check over a reply
#[derive(Clone)]
pub struct Predicate {
    name: String,
    check: Arc<Check>,
}

impl Predicate {
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&Reply) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holds(
        &self,
        reply: &Reply,
    ) -> bool {
        (self.check)(reply)
    }

    /// Anything but a null bulk or null array
    pub fn non_null() -> Self {
        Self::new("non_null", |r| !r.is_null())
    }

    pub fn any() -> Self {
        Self::new("any", |_| true)
    }

    pub fn integer_positive() -> Self {
        Self::new("integer_positive", |r| r.as_integer().is_some_and(|i| i > 0))
    }

    /// Status or bulk text equal to one of `options`
    pub fn one_of_status<S: AsRef<str>>(options: &[S]) -> Self {
        let options: Vec<String> = options.iter().map(|s| s.as_ref().to_string()).collect();
        Self::new(format!("one_of_status{options:?}"), move |r| {
            r.as_text()
                .is_some_and(|text| options.iter().any(|o| o == text.as_ref()))
        })
    }

    pub fn contains_text(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::new(format!("contains_text({needle:?})"), move |r| {
            r.as_text().is_some_and(|text| text.contains(needle.as_str()))
        })
    }

    pub fn non_empty_array() -> Self {
        Self::new("non_empty_array", |r| {
            r.as_array().is_some_and(|items| !items.is_empty())
        })
    }
}

impl fmt::Debug for Predicate {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Predicate({})", self.name)
    }
}

/// Case-insensitive regex searched anywhere in a server error text
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    regex: Regex,
}

impl ErrorPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Fatal(format!("invalid error pattern {pattern:?}: {e}")))?;
        Ok(Self { regex })
    }

    /// Pattern matching `text` literally.
    ///
    /// # Panics
    /// Only if the escaped literal exceeds the regex size limit.
    pub fn literal(text: &str) -> Self {
        let regex = RegexBuilder::new(&regex::escape(text))
            .case_insensitive(true)
            .build()
            .expect("escaped literal is a valid regex");
        Self { regex }
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn matches(
        &self,
        message: &str,
    ) -> bool {
        self.regex.is_match(message)
    }
}

/// One acceptable result of a command
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Reply equal to this one; status and bulk replies compare by text
    ExactValue(Reply),
    PredicateHolds(Predicate),
    /// Server error reply whose text matches
    ErrorMatches(ErrorPattern),
    /// Not executed at all
    Skip(String),
}

impl Outcome {
    fn accepts_reply(
        &self,
        reply: &Reply,
    ) -> bool {
        match self {
            Outcome::ExactValue(expected) => same_value(expected, reply),
            Outcome::PredicateHolds(predicate) => predicate.holds(reply),
            Outcome::ErrorMatches(_) | Outcome::Skip(_) => false,
        }
    }

    fn accepts_error(
        &self,
        message: &str,
    ) -> bool {
        matches!(self, Outcome::ErrorMatches(pattern) if pattern.matches(message))
    }
}

impl fmt::Display for Outcome {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Outcome::ExactValue(reply) => write!(f, "exactly {reply}"),
            Outcome::PredicateHolds(p) => write!(f, "{}", p.name()),
            Outcome::ErrorMatches(pattern) => write!(f, "error matching /{}/i", pattern.as_str()),
            Outcome::Skip(reason) => write!(f, "skip ({reason})"),
        }
    }
}

fn same_value(
    expected: &Reply,
    observed: &Reply,
) -> bool {
    if expected == observed {
        return true;
    }
    match (expected, observed) {
        (Reply::Status(_) | Reply::Bulk(Some(_)), Reply::Status(_) | Reply::Bulk(Some(_))) => {
            expected.as_text() == observed.as_text()
        }
        _ => false,
    }
}

/// Re-issue policy for commands whose effect shows up asynchronously
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self { interval, timeout }
    }
}

/// Auxiliary traffic the monitor case expects to observe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorPlan {
    /// Key the auxiliary session increments
    pub key: String,
    /// Number of `INCR` lines the monitor feed must show
    pub count: usize,
    pub timeout: Duration,
}

/// A command together with the outcomes that count as conformant
#[derive(Debug, Clone)]
pub struct CommandExpectation {
    pub name: String,
    pub command: Command,
    pub accepted: Vec<Outcome>,
    pub poll: Option<PollPolicy>,
    /// Issued before `command`; their replies are not classified
    pub setup: Vec<Command>,
    /// Config parameters read before `setup` and written back once the case is judged
    pub restores: Vec<String>,
    pub monitor: Option<MonitorPlan>,
}

/// How one executed command was judged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

impl CommandExpectation {
    pub fn new(
        name: impl Into<String>,
        command: Command,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            accepted: Vec::new(),
            poll: None,
            setup: Vec::new(),
            restores: Vec::new(),
            monitor: None,
        }
    }

    /// Accept `outcome` in addition to what is already accepted
    pub fn or(
        mut self,
        outcome: Outcome,
    ) -> Self {
        self.accepted.push(outcome);
        self
    }

    pub fn exact(
        self,
        reply: Reply,
    ) -> Self {
        self.or(Outcome::ExactValue(reply))
    }

    pub fn holds(
        self,
        predicate: Predicate,
    ) -> Self {
        self.or(Outcome::PredicateHolds(predicate))
    }

    pub fn error_matching(
        self,
        pattern: ErrorPattern,
    ) -> Self {
        self.or(Outcome::ErrorMatches(pattern))
    }

    /// Replace every accepted outcome with a skip
    pub fn skip(
        mut self,
        reason: impl Into<String>,
    ) -> Self {
        self.accepted = vec![Outcome::Skip(reason.into())];
        self
    }

    pub fn polled(
        mut self,
        policy: PollPolicy,
    ) -> Self {
        self.poll = Some(policy);
        self
    }

    pub fn with_setup(
        mut self,
        command: Command,
    ) -> Self {
        self.setup.push(command);
        self
    }

    /// Put `param` back to its current value after the case, whatever the verdict
    pub fn restoring_config(
        mut self,
        param: impl Into<String>,
    ) -> Self {
        self.restores.push(param.into());
        self
    }

    pub fn with_monitor(
        mut self,
        plan: MonitorPlan,
    ) -> Self {
        self.monitor = Some(plan);
        self
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.accepted.iter().find_map(|o| match o {
            Outcome::Skip(reason) => Some(reason.as_str()),
            _ => None,
        })
    }

    /// Classify an executed command; any error other than a matching server error fails
    pub fn judge(
        &self,
        result: &Result<Reply>,
    ) -> Verdict {
        let accepted = match result {
            Ok(reply) => self.accepted.iter().any(|o| o.accepts_reply(reply)),
            Err(e) => match e.server_message() {
                Some(message) => self.accepted.iter().any(|o| o.accepts_error(message)),
                None => false,
            },
        };
        if accepted {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn describe_accepted(&self) -> String {
        self.accepted
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
