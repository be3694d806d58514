//! Pipeline engine.
//!
//! - `context`: identity, arguments and the stash seen by every step
//! - `step`: the `PipelineStep` contract and its plan/reduce types
//! - `steps`: closure-driven steps for common reads and writes
//! - `counter`: soft denormalized counter steps
//! - `executor`: runs a pipeline and enforces step failure policies

pub mod context;
pub mod counter;
pub mod error;
pub mod executor;
pub mod step;
pub mod steps;

pub use context::{Identity, PipelineExecutionContext, StashContext, StashKey};
pub use counter::{denormalized_counter, increment, CounterStep};
pub use error::{PipelineError, ValidationError};
pub use executor::{
    ExecutionReport, ExecutionState, Pipeline, PipelineExecutor, StepDisposition, StepRecord,
};
pub use step::{FailurePolicy, PipelineStep, Plan, RetryPolicy, StepInput, StepOutcome};
pub use steps::{CheckNotExists, Finish, GetItem, PutItem, QueryItems, UpdateItem};
