// ABOUTME: Per-iteration outcome accumulator for the reconciliation loops.
// ABOUTME: Counts what happened to each candidate and logs failures as they are recorded.

use std::collections::BTreeMap;
use std::fmt;

/// Outcome counts collected during one loop iteration.
#[derive(Debug, Default)]
pub struct Observations {
    counts: BTreeMap<&'static str, u64>,
    failures: Vec<Failure>,
}

/// A candidate whose processing raised an error.
#[derive(Debug, Clone)]
pub struct Failure {
    pub subject: String,
    pub message: String,
}

impl Observations {
    pub fn record(&mut self, outcome: &'static str) {
        *self.counts.entry(outcome).or_default() += 1;
    }

    /// Record a failed candidate, auto-logging it via tracing.
    pub fn fail(&mut self, subject: impl fmt::Display, error: impl fmt::Display) {
        let failure = Failure {
            subject: subject.to_string(),
            message: error.to_string(),
        };
        tracing::error!(subject = %failure.subject, "{}", failure.message);
        self.record("failed");
        self.failures.push(failure);
    }

    pub fn count(&self, outcome: &str) -> u64 {
        self.counts.get(outcome).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Log the iteration summary under the loop's name.
    pub fn log(&self, loop_name: &str) {
        if self.has_failures() {
            let failed: Vec<&str> = self
                .failures()
                .iter()
                .map(|f| f.subject.as_str())
                .collect();
            tracing::warn!(loop_name, failed = ?failed, "iteration: {}", self);
        } else if self.total() == 0 {
            tracing::debug!(loop_name, "iteration idle");
        } else {
            tracing::info!(loop_name, "iteration: {}", self);
        }
    }
}

impl fmt::Display for Observations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (outcome, count) in &self.counts {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{outcome}={count}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observations_start_empty() {
        let obs = Observations::default();
        assert_eq!(obs.total(), 0);
        assert!(!obs.has_failures());
        assert_eq!(obs.to_string(), "");
    }

    #[test]
    fn observations_count_outcomes_and_failures() {
        let mut obs = Observations::default();
        obs.record("ready");
        obs.record("ready");
        obs.fail("w1", "backend down");

        assert_eq!(obs.count("ready"), 2);
        assert_eq!(obs.count("failed"), 1);
        assert_eq!(obs.total(), 3);
        assert_eq!(obs.failures()[0].subject, "w1");
        assert_eq!(obs.to_string(), "failed=1 ready=2");
    }
}
