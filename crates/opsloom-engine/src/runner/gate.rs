//! In-process approval delivery

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::EngineError;
use crate::workflow::ApprovalSignal;

/// Routes approval signals to suspended runs
///
/// One waiter per run; registering again for the same run displaces the
/// previous waiter. Resolving a run with no registered waiter is an
/// error, which is how callers learn they signalled a run that is not
/// waiting.
#[derive(Default)]
pub struct ApprovalGate {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ApprovalSignal>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the run and get the receiving end
    pub(crate) fn register(&self, run_id: Uuid) -> oneshot::Receiver<ApprovalSignal> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(run_id, tx);
        rx
    }

    /// Drop the waiter for a run, if any
    pub(crate) fn unregister(&self, run_id: Uuid) {
        self.pending.lock().remove(&run_id);
    }

    /// Deliver a signal to the run's waiter
    pub fn resolve(&self, run_id: Uuid, signal: ApprovalSignal) -> Result<(), EngineError> {
        let sender = self
            .pending
            .lock()
            .remove(&run_id)
            .ok_or(EngineError::NoPendingApproval(run_id))?;
        sender
            .send(signal)
            .map_err(|_| EngineError::NoPendingApproval(run_id))
    }

    /// Whether a waiter is registered for the run
    pub fn is_waiting(&self, run_id: Uuid) -> bool {
        self.pending.lock().contains_key(&run_id)
    }
}
