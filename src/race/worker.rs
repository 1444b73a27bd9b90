//! A single race worker.
//!
//! Each worker opens its own session, waits for the rest of the workers at the
//! start barrier, claims a ledger row, then writes its own argument into the
//! lowest ledger row and reads it back. Reading back anything other than its own
//! argument is a violation and ends the worker.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Barrier;
use tracing::instrument;

use super::store::{Observation, RaceStore, StoreError, TxnMode};

/// Worker index, also the value the worker writes into the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorkerId(pub i32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A worker read back a value it did not write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub worker: WorkerId,
    /// Counter value this worker claimed
    pub claimed: i32,
    /// Ledger row the worker updated
    pub ledger_id: i32,
    pub expected: i32,
    pub observed: Option<i32>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worker {} wrote {} to ledger row {} but read back {:?}",
            self.worker, self.expected, self.ledger_id, self.observed
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Violation(Violation),
}

/// What a worker that finished cleanly saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSuccess {
    pub worker: WorkerId,
    pub claimed: i32,
    pub observation: Observation,
}

/// Run one worker to completion.
///
/// The barrier is always waited on, even when the session cannot be opened,
/// so a failed connect never leaves the other workers stuck.
#[instrument(name = "race::worker", skip(store, barrier), fields(backend = store.backend()))]
pub async fn run_worker(
    store: Arc<dyn RaceStore>,
    barrier: Arc<Barrier>,
    worker: WorkerId,
    mode: TxnMode,
) -> Result<WorkerSuccess, WorkerError> {
    let session = store.session().await;
    barrier.wait().await;
    let mut session = session?;

    let claimed = session.claim().await?;
    tracing::debug!(claimed, "Claimed ledger row");

    let observation = session.write_and_verify(worker.0, mode).await?;
    tracing::debug!(
        ledger_id = observation.ledger_id,
        read_back = ?observation.read_back,
        "Wrote and read back ledger row"
    );

    check_observation(worker, claimed, observation)
}

fn check_observation(
    worker: WorkerId,
    claimed: i32,
    observation: Observation,
) -> Result<WorkerSuccess, WorkerError> {
    if observation.read_back == Some(worker.0) {
        Ok(WorkerSuccess {
            worker,
            claimed,
            observation,
        })
    } else {
        Err(WorkerError::Violation(Violation {
            worker,
            claimed,
            ledger_id: observation.ledger_id,
            expected: worker.0,
            observed: observation.read_back,
        }))
    }
}
