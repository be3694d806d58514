//! Reusable steps built from closures.
//!
//! Each step takes its key (and payload) from the execution context, so one
//! type serves every entity. Steps that read or write an item publish it as
//! the previous result and may also stash it under a name.

use serde_json::Value;

use super::context::PipelineExecutionContext;
use super::error::PipelineError;
use super::step::{FailurePolicy, PipelineStep, Plan, RetryPolicy, StepInput, StepOutcome};
use crate::interfaces::{
    item_exists, Attributes, ConflictReason, ItemKey, Precondition, QueryRequest, UpdateOp,
};
use crate::writer::{ConflictError, OperationError, StoreOperation, StoreOutput};

/// Derives an item key from the context.
pub type KeyFn = Box<dyn Fn(&PipelineExecutionContext) -> Result<ItemKey, PipelineError> + Send + Sync>;
/// Decides whether a step has nothing to do.
pub type SkipFn = Box<dyn Fn(&PipelineExecutionContext) -> bool + Send + Sync>;
pub type AttributesFn =
    Box<dyn Fn(&PipelineExecutionContext) -> Result<Attributes, PipelineError> + Send + Sync>;
pub type UpdateFn =
    Box<dyn Fn(&PipelineExecutionContext) -> Result<Vec<UpdateOp>, PipelineError> + Send + Sync>;
pub type PreconditionFn =
    Box<dyn Fn(&PipelineExecutionContext) -> Result<Precondition, PipelineError> + Send + Sync>;
pub type QueryFn =
    Box<dyn Fn(&PipelineExecutionContext) -> Result<QueryRequest, PipelineError> + Send + Sync>;

fn should_skip(skip_when: &Option<SkipFn>, ctx: &PipelineExecutionContext) -> bool {
    skip_when.as_ref().is_some_and(|skip| skip(ctx))
}

/// Stash the output under `stash_as` and publish it as the previous result.
fn record_output(
    ctx: &PipelineExecutionContext,
    output: &StoreOutput,
    stash_as: Option<&'static str>,
) -> StepOutcome {
    let value = output.to_value();
    let mut stash = ctx.stash.clone();
    if let Some(name) = stash_as {
        stash.set(name, value.clone());
    }
    stash.set_previous_result(value);
    StepOutcome::Continue(stash)
}

/// Reads one item.
pub struct GetItem {
    name: String,
    policy: FailurePolicy,
    key: KeyFn,
    skip_when: Option<SkipFn>,
    stash_as: Option<&'static str>,
    optional: bool,
    retry: RetryPolicy,
}

impl GetItem {
    pub fn new(
        name: impl Into<String>,
        policy: FailurePolicy,
        key: impl Fn(&PipelineExecutionContext) -> Result<ItemKey, PipelineError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            key: Box::new(key),
            skip_when: None,
            stash_as: None,
            optional: false,
            retry: RetryPolicy::Never,
        }
    }

    pub fn skip_when(
        mut self,
        predicate: impl Fn(&PipelineExecutionContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip_when = Some(Box::new(predicate));
        self
    }

    pub fn stash_as(mut self, name: &'static str) -> Self {
        self.stash_as = Some(name);
        self
    }

    /// A missing item is nothing to do rather than an abort.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl PipelineStep for GetItem {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn plan(&self, ctx: &PipelineExecutionContext) -> Result<Plan, PipelineError> {
        if should_skip(&self.skip_when, ctx) {
            return Ok(Plan::Skip);
        }
        Ok(Plan::Execute(StoreOperation::get((self.key)(ctx)?)))
    }

    fn reduce(&self, ctx: &PipelineExecutionContext, input: StepInput) -> StepOutcome {
        match input {
            StepInput::Skipped => StepOutcome::Continue(ctx.stash.clone()),
            StepInput::Succeeded(output) => record_output(ctx, &output, self.stash_as),
            StepInput::Failed(OperationError::NotFound(_)) if self.optional => {
                StepOutcome::Continue(ctx.stash.clone())
            }
            StepInput::Failed(e) => StepOutcome::Abort(e.into()),
        }
    }
}

/// Fails with a conflict when an item already exists. Always hard.
pub struct CheckNotExists {
    name: String,
    key: KeyFn,
    reason: ConflictReason,
}

impl CheckNotExists {
    pub fn new(
        name: impl Into<String>,
        reason: ConflictReason,
        key: impl Fn(&PipelineExecutionContext) -> Result<ItemKey, PipelineError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            key: Box::new(key),
            reason,
        }
    }
}

impl PipelineStep for CheckNotExists {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Hard
    }

    fn plan(&self, ctx: &PipelineExecutionContext) -> Result<Plan, PipelineError> {
        Ok(Plan::Execute(StoreOperation::get((self.key)(ctx)?)))
    }

    fn reduce(&self, ctx: &PipelineExecutionContext, input: StepInput) -> StepOutcome {
        match input {
            StepInput::Succeeded(output) => match output.into_item() {
                Some(item) => StepOutcome::Abort(PipelineError::Conflict(ConflictError {
                    reason: self.reason.clone(),
                    key: item.key,
                })),
                None => StepOutcome::Continue(ctx.stash.clone()),
            },
            StepInput::Failed(OperationError::NotFound(_)) | StepInput::Skipped => {
                StepOutcome::Continue(ctx.stash.clone())
            }
            StepInput::Failed(e) => StepOutcome::Abort(e.into()),
        }
    }
}

/// Creates or replaces an item.
pub struct PutItem {
    name: String,
    policy: FailurePolicy,
    key: KeyFn,
    attributes: AttributesFn,
    precondition: Option<PreconditionFn>,
    stash_as: Option<&'static str>,
}

impl PutItem {
    pub fn new(
        name: impl Into<String>,
        policy: FailurePolicy,
        key: impl Fn(&PipelineExecutionContext) -> Result<ItemKey, PipelineError> + Send + Sync + 'static,
        attributes: impl Fn(&PipelineExecutionContext) -> Result<Attributes, PipelineError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            key: Box::new(key),
            attributes: Box::new(attributes),
            precondition: None,
            stash_as: None,
        }
    }

    pub fn when(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(Box::new(
            move |_: &PipelineExecutionContext| -> Result<Precondition, PipelineError> {
                Ok(precondition.clone())
            },
        ));
        self
    }

    pub fn stash_as(mut self, name: &'static str) -> Self {
        self.stash_as = Some(name);
        self
    }
}

impl PipelineStep for PutItem {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn plan(&self, ctx: &PipelineExecutionContext) -> Result<Plan, PipelineError> {
        let mut operation = StoreOperation::put((self.key)(ctx)?, (self.attributes)(ctx)?);
        if let Some(precondition) = &self.precondition {
            operation = operation.when(precondition(ctx)?);
        }
        Ok(Plan::Execute(operation))
    }

    fn reduce(&self, ctx: &PipelineExecutionContext, input: StepInput) -> StepOutcome {
        match input {
            StepInput::Skipped => StepOutcome::Continue(ctx.stash.clone()),
            StepInput::Succeeded(output) => record_output(ctx, &output, self.stash_as),
            StepInput::Failed(e) => StepOutcome::Abort(e.into()),
        }
    }
}

/// Applies update operations to an existing item.
pub struct UpdateItem {
    name: String,
    policy: FailurePolicy,
    key: KeyFn,
    ops: UpdateFn,
    precondition: Option<PreconditionFn>,
    skip_when: Option<SkipFn>,
    stash_as: Option<&'static str>,
}

impl UpdateItem {
    pub fn new(
        name: impl Into<String>,
        policy: FailurePolicy,
        key: impl Fn(&PipelineExecutionContext) -> Result<ItemKey, PipelineError> + Send + Sync + 'static,
        ops: impl Fn(&PipelineExecutionContext) -> Result<Vec<UpdateOp>, PipelineError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            key: Box::new(key),
            ops: Box::new(ops),
            precondition: None,
            skip_when: None,
            stash_as: None,
        }
    }

    pub fn when(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(Box::new(
            move |_: &PipelineExecutionContext| -> Result<Precondition, PipelineError> {
                Ok(precondition.clone())
            },
        ));
        self
    }

    /// Precondition computed from the context (caller identity, clock).
    pub fn when_with(
        mut self,
        precondition: impl Fn(&PipelineExecutionContext) -> Result<Precondition, PipelineError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.precondition = Some(Box::new(precondition));
        self
    }

    /// Guard against creating an item that does not exist yet.
    pub fn only_if_exists(self) -> Self {
        self.when(Precondition::new(
            item_exists(),
            ConflictReason::PRECONDITION_FAILED,
        ))
    }

    pub fn skip_when(
        mut self,
        predicate: impl Fn(&PipelineExecutionContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip_when = Some(Box::new(predicate));
        self
    }

    pub fn stash_as(mut self, name: &'static str) -> Self {
        self.stash_as = Some(name);
        self
    }
}

impl PipelineStep for UpdateItem {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn plan(&self, ctx: &PipelineExecutionContext) -> Result<Plan, PipelineError> {
        if should_skip(&self.skip_when, ctx) {
            return Ok(Plan::Skip);
        }
        let mut operation = StoreOperation::update((self.key)(ctx)?, (self.ops)(ctx)?);
        if let Some(precondition) = &self.precondition {
            operation = operation.when(precondition(ctx)?);
        }
        Ok(Plan::Execute(operation))
    }

    fn reduce(&self, ctx: &PipelineExecutionContext, input: StepInput) -> StepOutcome {
        match input {
            StepInput::Skipped => StepOutcome::Continue(ctx.stash.clone()),
            StepInput::Succeeded(output) => record_output(ctx, &output, self.stash_as),
            StepInput::Failed(e) => StepOutcome::Abort(e.into()),
        }
    }
}

/// Reads one page of a partition or index.
pub struct QueryItems {
    name: String,
    policy: FailurePolicy,
    request: QueryFn,
    stash_as: Option<&'static str>,
    retry: RetryPolicy,
}

impl QueryItems {
    pub fn new(
        name: impl Into<String>,
        policy: FailurePolicy,
        request: impl Fn(&PipelineExecutionContext) -> Result<QueryRequest, PipelineError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            request: Box::new(request),
            stash_as: None,
            retry: RetryPolicy::Never,
        }
    }

    pub fn stash_as(mut self, name: &'static str) -> Self {
        self.stash_as = Some(name);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl PipelineStep for QueryItems {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn plan(&self, ctx: &PipelineExecutionContext) -> Result<Plan, PipelineError> {
        Ok(Plan::Execute(StoreOperation::Query((self.request)(ctx)?)))
    }

    fn reduce(&self, ctx: &PipelineExecutionContext, input: StepInput) -> StepOutcome {
        match input {
            StepInput::Skipped => StepOutcome::Continue(ctx.stash.clone()),
            StepInput::Succeeded(output) => record_output(ctx, &output, self.stash_as),
            StepInput::Failed(e) => StepOutcome::Abort(e.into()),
        }
    }
}

/// Ends the pipeline with a value computed from the stash.
pub struct Finish {
    name: String,
    result: Box<dyn Fn(&PipelineExecutionContext) -> Value + Send + Sync>,
}

impl Finish {
    pub fn new(
        name: impl Into<String>,
        result: impl Fn(&PipelineExecutionContext) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            result: Box::new(result),
        }
    }
}

impl PipelineStep for Finish {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Hard
    }

    fn plan(&self, _ctx: &PipelineExecutionContext) -> Result<Plan, PipelineError> {
        Ok(Plan::Skip)
    }

    fn reduce(&self, ctx: &PipelineExecutionContext, _input: StepInput) -> StepOutcome {
        StepOutcome::Complete((self.result)(ctx))
    }
}
