//! Pipeline executor.
//!
//! Runs the steps of a pipeline strictly in order. For each step: `plan`,
//! run the planned operation through the conditional writer (or skip), then
//! `reduce`. The executor enforces each step's failure policy itself:
//!
//! - soft step failed (operation or plan): stash restored, step degraded,
//!   execution continues
//! - hard step hit a conflict, transient or invalid operation: abort
//! - hard step hit a missing item: its `reduce` decides
//!
//! Writes committed by earlier steps are never undone.

use std::fmt;
use std::time::Duration;

use backon::Retryable;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, debug_span, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::context::PipelineExecutionContext;
use super::error::PipelineError;
use super::step::{FailurePolicy, PipelineStep, Plan, StepInput, StepOutcome};
use crate::writer::{ConditionalWriter, OperationError, StoreOperation, StoreOutput};

/// Named, ordered list of steps for one logical write.
pub struct Pipeline {
    name: String,
    steps: Vec<Box<dyn PipelineStep>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl PipelineStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn boxed_step(mut self, step: Box<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Lifecycle of one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionState {
    Ready,
    Running(usize),
    Succeeded(Value),
    Failed(PipelineError),
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }

    /// Move to `next`. Terminal states stay where they are.
    fn advance(&mut self, next: ExecutionState) {
        if !self.is_terminal() {
            *self = next;
        }
    }
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", content = "reason", rename_all = "snake_case")]
pub enum StepDisposition {
    Executed,
    Skipped,
    /// Soft step failed; the execution went on without its effect.
    Degraded(String),
    /// Step ended the execution with an error.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub policy: FailurePolicy,
    pub disposition: StepDisposition,
}

static NULL: Value = Value::Null;

/// Outcome of one execution, with what each step did.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub pipeline: String,
    pub state: ExecutionState,
    pub steps: Vec<StepRecord>,
}

impl ExecutionReport {
    pub fn result(&self) -> Result<&Value, &PipelineError> {
        match &self.state {
            ExecutionState::Succeeded(value) => Ok(value),
            ExecutionState::Failed(err) => Err(err),
            ExecutionState::Ready | ExecutionState::Running(_) => Ok(&NULL),
        }
    }

    pub fn into_result(self) -> Result<Value, PipelineError> {
        match self.state {
            ExecutionState::Succeeded(value) => Ok(value),
            ExecutionState::Failed(err) => Err(err),
            ExecutionState::Ready | ExecutionState::Running(_) => Ok(Value::Null),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self.state, ExecutionState::Succeeded(_))
    }

    pub fn degraded_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|r| matches!(r.disposition, StepDisposition::Degraded(_)))
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn disposition(&self, step: &str) -> Option<&StepDisposition> {
        self.steps
            .iter()
            .find(|r| r.name == step)
            .map(|r| &r.disposition)
    }
}

/// What happened to one step, before it is folded into the report.
enum StepResult {
    Continue(StepDisposition),
    Complete(Value),
    Abort(PipelineError),
}

/// Runs pipelines against one conditional writer.
#[derive(Clone)]
pub struct PipelineExecutor {
    writer: ConditionalWriter,
}

impl PipelineExecutor {
    pub fn new(writer: ConditionalWriter) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &ConditionalWriter {
        &self.writer
    }

    /// Execute and return just the result.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        ctx: PipelineExecutionContext,
    ) -> Result<Value, PipelineError> {
        self.execute(pipeline, ctx).await.into_result()
    }

    /// Execute a pipeline to a terminal state.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        ctx: PipelineExecutionContext,
    ) -> ExecutionReport {
        let span = info_span!(
            "pipeline",
            pipeline = %pipeline.name,
            execution_id = %ctx.execution_id,
            subject = %ctx.identity.subject_id,
        );
        self.execute_steps(pipeline, ctx).instrument(span).await
    }

    async fn execute_steps(
        &self,
        pipeline: &Pipeline,
        mut ctx: PipelineExecutionContext,
    ) -> ExecutionReport {
        let mut state = ExecutionState::Ready;
        let mut records = Vec::with_capacity(pipeline.steps.len());

        for (index, step) in pipeline.steps.iter().enumerate() {
            state.advance(ExecutionState::Running(index));
            let policy = step.failure_policy();
            let span = debug_span!("step", step = step.name(), index, policy = %policy);

            let result = self
                .run_step(step.as_ref(), &mut ctx)
                .instrument(span)
                .await;

            let disposition = match result {
                StepResult::Continue(disposition) => disposition,
                StepResult::Complete(value) => {
                    records.push(StepRecord {
                        name: step.name().to_string(),
                        policy,
                        disposition: StepDisposition::Executed,
                    });
                    state.advance(ExecutionState::Succeeded(value));
                    break;
                }
                StepResult::Abort(err) => {
                    records.push(StepRecord {
                        name: step.name().to_string(),
                        policy,
                        disposition: StepDisposition::Aborted,
                    });
                    state.advance(ExecutionState::Failed(err));
                    break;
                }
            };

            records.push(StepRecord {
                name: step.name().to_string(),
                policy,
                disposition,
            });
        }

        let result = ctx.stash.previous_result().cloned().unwrap_or(Value::Null);
        state.advance(ExecutionState::Succeeded(result));

        match &state {
            ExecutionState::Failed(err) => {
                info!(code = %err.code(), error = %err, "Pipeline failed");
            }
            _ => {
                let degraded = records
                    .iter()
                    .filter(|r| matches!(r.disposition, StepDisposition::Degraded(_)))
                    .count();
                info!(steps = records.len(), degraded, "Pipeline succeeded");
            }
        }

        ExecutionReport {
            execution_id: ctx.execution_id,
            pipeline: pipeline.name.clone(),
            state,
            steps: records,
        }
    }

    async fn run_step(
        &self,
        step: &dyn PipelineStep,
        ctx: &mut PipelineExecutionContext,
    ) -> StepResult {
        let policy = step.failure_policy();

        let input = match step.plan(ctx) {
            Ok(Plan::Skip) => {
                debug!("Step skipped");
                StepInput::Skipped
            }
            Ok(Plan::Execute(operation)) => {
                debug!(operation = operation.kind(), "Executing store operation");
                match self.perform(step, &operation).await {
                    Ok(output) => StepInput::Succeeded(output),
                    Err(err) => StepInput::Failed(err),
                }
            }
            Err(err) => {
                return match policy {
                    FailurePolicy::Soft => {
                        warn!(error = %err, "Soft step could not plan, continuing");
                        StepResult::Continue(StepDisposition::Degraded(err.to_string()))
                    }
                    FailurePolicy::Hard => StepResult::Abort(err),
                };
            }
        };

        let skipped = matches!(input, StepInput::Skipped);
        let failure = match &input {
            StepInput::Failed(err) => Some(err.clone()),
            _ => None,
        };

        let outcome = step.reduce(ctx, input);

        match (policy, failure) {
            (FailurePolicy::Soft, Some(err)) => {
                if !matches!(&outcome, StepOutcome::Continue(stash) if *stash == ctx.stash) {
                    debug!("Discarding reduce outcome of failed soft step");
                }
                warn!(error = %err, "Soft step failed, continuing with unchanged stash");
                return StepResult::Continue(StepDisposition::Degraded(err.to_string()));
            }
            (FailurePolicy::Hard, Some(err)) if !matches!(err, OperationError::NotFound(_)) => {
                return StepResult::Abort(err.into());
            }
            _ => {}
        }

        match outcome {
            StepOutcome::Continue(stash) => {
                ctx.stash = stash;
                if skipped {
                    StepResult::Continue(StepDisposition::Skipped)
                } else {
                    StepResult::Continue(StepDisposition::Executed)
                }
            }
            StepOutcome::Complete(value) => StepResult::Complete(value),
            StepOutcome::Abort(err) => match policy {
                FailurePolicy::Hard => StepResult::Abort(err),
                FailurePolicy::Soft => {
                    warn!(error = %err, "Soft step asked to abort, continuing");
                    StepResult::Continue(StepDisposition::Degraded(err.to_string()))
                }
            },
        }
    }

    /// Run the operation, re-issuing reads only when the step asked for it.
    async fn perform(
        &self,
        step: &dyn PipelineStep,
        operation: &StoreOperation,
    ) -> Result<StoreOutput, OperationError> {
        match step.retry_policy().backoff() {
            Some(backoff) if operation.is_read() => {
                (|| async { self.writer.execute(operation).await })
                    .retry(backoff)
                    .when(|e: &OperationError| e.is_transient())
                    .notify(|err: &OperationError, dur: Duration| {
                        warn!(error = %err, delay = ?dur, "Transient read failure, retrying");
                    })
                    .await
            }
            _ => self.writer.execute(operation).await,
        }
    }
}
