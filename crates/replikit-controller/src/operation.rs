//! Control-flow protocol shared by every reconciliation step.
//!
//! An adapter exposes an ordered list of operations. [`reconcile_handler`]
//! runs them in order and stops at the first result that is not
//! [`OperationResult::Continue`]. Running out of operations counts as `Stop`.

use std::fmt::Debug;

use async_trait::async_trait;
use tracing::trace;

use crate::error::ControllerError;

/// Outcome of a single reconciliation step.
#[derive(Debug)]
pub enum OperationResult {
    /// Run the next step.
    Continue,
    /// Finish the run successfully.
    Stop,
    /// Finish the run and schedule another one right away.
    Requeue,
    /// Finish the run and retry with backoff.
    RequeueWithError(ControllerError),
}

impl OperationResult {
    pub fn is_continue(&self) -> bool {
        matches!(self, OperationResult::Continue)
    }
}

pub fn continue_processing() -> OperationResult {
    OperationResult::Continue
}

pub fn stop_processing() -> OperationResult {
    OperationResult::Stop
}

pub fn requeue() -> OperationResult {
    OperationResult::Requeue
}

pub fn requeue_with_error(err: impl Into<ControllerError>) -> OperationResult {
    OperationResult::RequeueWithError(err.into())
}

/// `Continue` on success, `RequeueWithError` otherwise.
pub fn requeue_on_error_or_continue<T, E: Into<ControllerError>>(result: Result<T, E>) -> OperationResult {
    match result {
        Ok(_) => OperationResult::Continue,
        Err(e) => OperationResult::RequeueWithError(e.into()),
    }
}

/// `Stop` on success, `RequeueWithError` otherwise.
pub fn requeue_on_error_or_stop<T, E: Into<ControllerError>>(result: Result<T, E>) -> OperationResult {
    match result {
        Ok(_) => OperationResult::Stop,
        Err(e) => OperationResult::RequeueWithError(e.into()),
    }
}

/// An object-specific pipeline of reconciliation steps.
#[async_trait]
pub trait Adapter: Send {
    type Operation: Copy + Debug + Send + Sync + 'static;

    /// Steps in execution order.
    fn operations(&self) -> &'static [Self::Operation];

    async fn execute(&mut self, operation: Self::Operation) -> OperationResult;
}

/// Run every operation of `adapter` in order until one does not continue.
pub async fn reconcile_handler<A: Adapter>(adapter: &mut A) -> OperationResult {
    for &operation in adapter.operations() {
        let result = adapter.execute(operation).await;
        trace!(?operation, ?result, "operation finished");
        if !result.is_continue() {
            return result;
        }
    }
    OperationResult::Stop
}
