//! The step contract.
//!
//! A step never touches the store itself. `plan` describes the one operation
//! it wants (or `Skip`), the executor runs it, and `reduce` folds the outcome
//! into the next stash.

use std::fmt;
use std::time::Duration;

use backon::ExponentialBuilder;
use serde::Serialize;
use serde_json::Value;

use super::context::{PipelineExecutionContext, StashContext};
use super::error::PipelineError;
use crate::config::RetrySettings;
use crate::utils::retry::read_backoff;
use crate::writer::{OperationError, StoreOperation, StoreOutput};

/// What a step's failure does to the whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Failure aborts the pipeline.
    Hard,
    /// Failure is logged; the stash stays as it was before the step.
    Soft,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hard => f.write_str("hard"),
            Self::Soft => f.write_str("soft"),
        }
    }
}

/// Whether the executor may re-issue a step's read after a transient fault.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    #[default]
    Never,
    Transient {
        min_delay: Duration,
        max_delay: Duration,
        max_times: usize,
    },
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::Transient {
            min_delay: settings.min_delay(),
            max_delay: settings.max_delay(),
            max_times: settings.max_times,
        }
    }

    pub fn backoff(&self) -> Option<ExponentialBuilder> {
        match self {
            Self::Never => None,
            Self::Transient {
                min_delay,
                max_delay,
                max_times,
            } => Some(read_backoff(*min_delay, *max_delay, *max_times)),
        }
    }
}

/// Output of `plan`.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Execute(StoreOperation),
    /// Nothing to do; `reduce` still runs with `StepInput::Skipped`.
    Skip,
}

/// What `reduce` is told about the planned operation.
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
    Skipped,
    Succeeded(StoreOutput),
    Failed(OperationError),
}

/// Result of `reduce`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Proceed with this stash.
    Continue(StashContext),
    /// Stop the pipeline with this error.
    Abort(PipelineError),
    /// Stop the pipeline successfully with this result.
    Complete(Value),
}

/// One stage of a pipeline.
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &str;

    /// Declared at construction; the executor enforces it.
    fn failure_policy(&self) -> FailurePolicy;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::Never
    }

    fn plan(&self, ctx: &PipelineExecutionContext) -> Result<Plan, PipelineError>;

    fn reduce(&self, ctx: &PipelineExecutionContext, input: StepInput) -> StepOutcome;
}
