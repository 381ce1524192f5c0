use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(25);

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;

pub fn is_remaining_time_enough(elapsed: Duration, budget: Duration) -> bool {
    elapsed < budget
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    RestoreDatabase,
    RewriteUrls,
    MigrateFiles,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RestoreDatabase => "restore_database",
            Self::RewriteUrls => "rewrite_urls",
            Self::MigrateFiles => "migrate_files",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub done: bool,
    pub error: bool,
    pub next: Option<StepKind>,
    pub status: String,
}

impl StepState {
    pub fn pending(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn finish(&mut self, next: Option<StepKind>, status: impl Into<String>) {
        self.done = true;
        self.error = false;
        self.next = next;
        self.status = status.into();
    }

    pub fn fail(&mut self, status: impl Into<String>) {
        self.done = false;
        self.error = true;
        self.next = None;
        self.status = status.into();
    }
}

pub trait TaskStep {
    fn kind(&self) -> StepKind;

    fn init(&mut self) -> Result<()>;

    fn run(&mut self) -> i32;

    fn state(&self) -> &StepState;

    fn is_step_done(&self) -> bool {
        self.state().done
    }

    fn next_step(&self) -> Option<StepKind> {
        self.state().next
    }

    fn has_error(&self) -> bool {
        self.state().error
    }

    fn status(&self) -> &str {
        &self.state().status
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    Finished,
    Failed { step: StepKind, status: String },
    Handoff { next: StepKind },
}

pub struct StepDriver {
    budget: Duration,
    started_at: Instant,
}

impl StepDriver {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn drive<'s, F>(&self, start: StepKind, mut make_step: F) -> Result<DriveOutcome>
    where
        F: FnMut(StepKind) -> Result<Box<dyn TaskStep + 's>>,
    {
        let mut current = Some(start);
        let mut first = true;
        while let Some(kind) = current {
            if !first && !is_remaining_time_enough(self.elapsed(), self.budget) {
                log::info!(
                    "time budget of {:?} spent after {:?}; handing off at {}",
                    self.budget,
                    self.elapsed(),
                    kind.as_str()
                );
                return Ok(DriveOutcome::Handoff { next: kind });
            }
            first = false;

            let mut step = make_step(kind)?;
            step.init()?;
            let code = step.run();
            log::info!(
                "step {} exited with {code}: {}",
                kind.as_str(),
                step.status()
            );
            if code != EXIT_OK || step.has_error() || !step.is_step_done() {
                return Ok(DriveOutcome::Failed {
                    step: kind,
                    status: step.status().to_string(),
                });
            }
            current = step.next_step();
        }
        Ok(DriveOutcome::Finished)
    }
}
