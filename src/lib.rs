//! Stashflow - pipeline write engine
//!
//! Runs multi-step denormalized writes over a single-table key-value store.
//! An operation is an ordered pipeline of steps; each step plans one store
//! operation, the executor issues it through a conditional writer, and the
//! step folds the outcome into a per-execution stash. Partial failure is
//! governed by an explicit hard/soft policy on every step.

pub mod config;
pub mod interfaces;
pub mod keys;
pub mod operations;
pub mod pipeline;
pub mod storage;
pub mod utils;
pub mod writer;

pub use interfaces::{
    Attributes, Condition, ConflictReason, Item, ItemKey, KeyValueStore, Precondition,
    QueryPage, QueryRequest, StoreError, UpdateOp,
};
pub use pipeline::{
    ExecutionReport, ExecutionState, FailurePolicy, Identity, Pipeline, PipelineError,
    PipelineExecutionContext, PipelineExecutor, PipelineStep, Plan, StashContext, StepInput,
    StepOutcome,
};
pub use writer::{ConditionalWriter, ConflictError, OperationError, StoreOperation, StoreOutput};
