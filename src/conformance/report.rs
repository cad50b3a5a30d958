use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::CaseState;
use super::CommandExpectation;

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub command: String,
    pub state: CaseState,
    /// Observed reply or error text; the skip reason for skipped cases
    pub observed: Option<String>,
    /// Accepted outcomes, for failure messages
    pub expected: String,
    pub elapsed: Duration,
}

impl CaseReport {
    pub fn new(
        case: &CommandExpectation,
        state: CaseState,
        observed: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            name: case.name.clone(),
            command: case.command.to_string(),
            state,
            observed,
            expected: case.describe_accepted(),
            elapsed,
        }
    }

    /// Entry for a check that is not a key-value command (e.g. a schema smoke test)
    pub fn custom(
        name: impl Into<String>,
        description: impl Into<String>,
        state: CaseState,
        observed: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command: description.into(),
            state,
            observed,
            expected: String::new(),
            elapsed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub name: String,
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
        }
    }

    pub fn push(
        &mut self,
        case: CaseReport,
    ) {
        self.cases.push(case);
    }

    pub fn passed(&self) -> usize {
        self.count(CaseState::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(CaseState::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(CaseState::Skipped)
    }

    /// `(case, reason)` for every skipped case
    pub fn skipped_reasons(&self) -> Vec<(&str, &str)> {
        self.cases
            .iter()
            .filter(|c| c.state == CaseState::Skipped)
            .map(|c| (c.name.as_str(), c.observed.as_deref().unwrap_or_default()))
            .collect()
    }

    /// No failed case and every case reached a terminal state
    pub fn is_success(&self) -> bool {
        self.cases
            .iter()
            .all(|c| c.state == CaseState::Passed || c.state == CaseState::Skipped)
    }

    pub fn case(
        &self,
        name: &str,
    ) -> Option<&CaseReport> {
        self.cases.iter().find(|c| c.name == name)
    }

    fn count(
        &self,
        state: CaseState,
    ) -> usize {
        self.cases.iter().filter(|c| c.state == state).count()
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(
            f,
            "{}: {} passed, {} failed, {} skipped",
            self.name,
            self.passed(),
            self.failed(),
            self.skipped()
        )?;
        let width = self.cases.iter().map(|c| c.name.len()).max().unwrap_or(0);
        for case in &self.cases {
            write!(
                f,
                "  {:<7}  {:<width$}  {:>6}ms  {}",
                case.state.to_string(),
                case.name,
                case.elapsed.as_millis(),
                case.command,
            )?;
            if let Some(observed) = &case.observed {
                write!(f, "  -> {observed}")?;
            }
            if case.state == CaseState::Failed && !case.expected.is_empty() {
                write!(f, "  (expected {})", case.expected)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
