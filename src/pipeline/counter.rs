//! Denormalized counters.
//!
//! A counter step adds a delta to a numeric field of some other item (vote
//! tallies, reply counts). It is always soft: drift in a counter never blocks
//! the primary write.

use serde_json::Number;
use tracing::debug;

use super::context::PipelineExecutionContext;
use super::error::PipelineError;
use super::step::{FailurePolicy, PipelineStep, Plan, StepInput, StepOutcome};
use super::steps::{KeyFn, SkipFn};
use crate::interfaces::{item_exists, ConflictReason, ItemKey, Precondition, UpdateOp};
use crate::writer::StoreOperation;

type DeltaFn = Box<dyn Fn(&PipelineExecutionContext) -> Number + Send + Sync>;

/// Build a counter step: `ADD delta` at `field_path` on the item named by
/// `target_key`.
pub fn denormalized_counter(
    name: impl Into<String>,
    target_key: impl Fn(&PipelineExecutionContext) -> Result<ItemKey, PipelineError>
        + Send
        + Sync
        + 'static,
    field_path: impl Into<String>,
    delta: impl Fn(&PipelineExecutionContext) -> Number + Send + Sync + 'static,
) -> CounterStep {
    CounterStep {
        name: name.into(),
        target_key: Box::new(target_key),
        field_path: field_path.into(),
        delta: Box::new(delta),
        skip_when: None,
        require_existing: false,
    }
}

/// Counter step adding one.
pub fn increment(
    name: impl Into<String>,
    target_key: impl Fn(&PipelineExecutionContext) -> Result<ItemKey, PipelineError>
        + Send
        + Sync
        + 'static,
    field_path: impl Into<String>,
) -> CounterStep {
    denormalized_counter(name, target_key, field_path, |_| Number::from(1))
}

pub struct CounterStep {
    name: String,
    target_key: KeyFn,
    field_path: String,
    delta: DeltaFn,
    skip_when: Option<SkipFn>,
    require_existing: bool,
}

impl CounterStep {
    pub fn skip_when(
        mut self,
        predicate: impl Fn(&PipelineExecutionContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip_when = Some(Box::new(predicate));
        self
    }

    /// Only count onto an item that already exists.
    pub fn only_if_exists(mut self) -> Self {
        self.require_existing = true;
        self
    }

    pub fn field_path(&self) -> &str {
        &self.field_path
    }
}

impl PipelineStep for CounterStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Soft
    }

    fn plan(&self, ctx: &PipelineExecutionContext) -> Result<Plan, PipelineError> {
        if self.skip_when.as_ref().is_some_and(|skip| skip(ctx)) {
            return Ok(Plan::Skip);
        }

        let key = (self.target_key)(ctx)?;
        let delta = (self.delta)(ctx);
        debug!(counter = %self.field_path, target = %key, delta = %delta, "Planning counter delta");

        let mut operation =
            StoreOperation::update(key, vec![UpdateOp::add(self.field_path.clone(), delta)]);
        if self.require_existing {
            operation = operation.when(Precondition::new(
                item_exists(),
                ConflictReason::PRECONDITION_FAILED,
            ));
        }
        Ok(Plan::Execute(operation))
    }

    /// Counters never change the stash or the previous result.
    fn reduce(&self, ctx: &PipelineExecutionContext, _input: StepInput) -> StepOutcome {
        StepOutcome::Continue(ctx.stash.clone())
    }
}
