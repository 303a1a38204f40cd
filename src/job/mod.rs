//! Job runner: batch stages that (re)compute derived artifacts
//!
//! A stage enumerates its targets through the category map and the naming
//! convention, skips targets whose result already exists for the requested
//! input versions, computes the rest and commits each result on its own.
//!
//! ## Failure policy
//!
//! A failing iteration is logged, recorded in the [`BatchReport`] and
//! skipped; the batch continues. A stage returns
//! [`Error::StageExecution`](crate::Error::StageExecution) only when it had
//! work to do and not a single iteration succeeded.
//!
//! ## State
//!
//! `IDLE -> RUNNING(stage) -> IDLE`, one stage at a time per repository.

mod runner;

use crate::lineage::VersionRef;
use crate::store::VersionSelector;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Batch stage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Evaluate calibrated models on data
    Evaluation,
    /// Train models
    Training,
    /// Compute measures on evaluations
    Measures,
}

impl Stage {
    const fn code(self) -> u8 {
        match self {
            Self::Evaluation => 1,
            Self::Training => 2,
            Self::Measures => 3,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Evaluation),
            2 => Some(Self::Training),
            3 => Some(Self::Measures),
            _ => None,
        }
    }

    /// Lowercase stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evaluation => "evaluation",
            Self::Training => "training",
            Self::Measures => "measures",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage (if any) is running on a repository.
#[derive(Debug, Default)]
pub struct JobState {
    running: AtomicU8,
}

impl JobState {
    /// Enter `stage`; the returned guard returns the state to idle on drop.
    ///
    /// # Errors
    /// Returns [`Error::StageInProgress`] if another stage is running.
    pub fn begin(&self, stage: Stage) -> Result<StageGuard<'_>> {
        self.running
            .compare_exchange(0, stage.code(), Ordering::AcqRel, Ordering::Acquire)
            .map_err(|current| {
                Error::StageInProgress(
                    Stage::from_code(current).map_or("unknown", Stage::as_str).to_string(),
                )
            })?;
        Ok(StageGuard { state: self })
    }

    /// Currently running stage.
    #[must_use]
    pub fn current(&self) -> Option<Stage> {
        Stage::from_code(self.running.load(Ordering::Acquire))
    }
}

/// Marks a stage as running until dropped.
#[derive(Debug)]
pub struct StageGuard<'a> {
    state: &'a JobState,
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.state.running.store(0, Ordering::Release);
    }
}

/// Cooperative cancellation flag, checked between stage iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Ask the running stage to stop after its current iteration.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Names (and versions) a stage operates on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Targets {
    /// Every member of the relevant categories, at their latest versions
    #[default]
    All,
    /// Explicit names with version selectors
    Names(Vec<(String, VersionSelector)>),
}

impl Targets {
    /// Explicit names at their latest versions.
    pub fn latest<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::Names(
            names
                .into_iter()
                .map(|n| (n.into(), VersionSelector::Latest))
                .collect(),
        )
    }

    /// A single name at a specific selector.
    pub fn one(name: impl Into<String>, selector: VersionSelector) -> Self {
        Self::Names(vec![(name.into(), selector)])
    }
}

/// One failed stage iteration, with enough detail to retry it alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Name of the artifact that was to be produced
    pub target: String,
    /// Input versions the iteration was attempted with
    pub inputs: BTreeMap<String, u64>,
    /// Error message
    pub error: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs: Vec<String> = self.inputs.iter().map(|(n, v)| format!("{n}@{v}")).collect();
        write!(f, "{} [{}]: {}", self.target, inputs.join(", "), self.error)
    }
}

/// Outcome of a batch stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    stage: Stage,
    committed: Vec<VersionRef>,
    up_to_date: Vec<String>,
    failures: Vec<StageFailure>,
    cancelled: bool,
}

impl BatchReport {
    pub(crate) const fn new(stage: Stage) -> Self {
        Self {
            stage,
            committed: Vec::new(),
            up_to_date: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
        }
    }

    pub(crate) fn fail(&mut self, target: impl Into<String>, inputs: BTreeMap<String, u64>, error: impl fmt::Display) {
        let failure = StageFailure {
            target: target.into(),
            inputs,
            error: error.to_string(),
        };
        tracing::warn!(stage = %self.stage, failure = %failure, "stage iteration failed");
        self.failures.push(failure);
    }

    /// Stage that produced this report.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Newly committed artifacts, in commit order.
    #[must_use]
    pub fn committed(&self) -> &[VersionRef] {
        &self.committed
    }

    /// Targets skipped because their result already existed.
    #[must_use]
    pub fn up_to_date(&self) -> &[String] {
        &self.up_to_date
    }

    /// Failed iterations.
    #[must_use]
    pub fn failures(&self) -> &[StageFailure] {
        &self.failures
    }

    /// Number of failed iterations.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Whether the stage stopped early on request.
    #[must_use]
    pub const fn cancelled(&self) -> bool {
        self.cancelled
    }

    /// Turn a report with failures and no success into an error.
    fn into_result(self) -> Result<Self> {
        if self.committed.is_empty() && !self.failures.is_empty() {
            return Err(Error::StageExecution {
                stage: self.stage.to_string(),
                failures: self.failures.iter().map(ToString::to_string).collect(),
            });
        }
        tracing::info!(
            stage = %self.stage,
            committed = self.committed.len(),
            up_to_date = self.up_to_date.len(),
            failed = self.failures.len(),
            cancelled = self.cancelled,
            "stage finished"
        );
        Ok(self)
    }
}
